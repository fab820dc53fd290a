//! Safe access to files shared between processes
//!
//! Reads take a shared advisory lock and writes an exclusive one, both with
//! a bounded wait. Writes create missing parent directories, can fsync, and
//! leave the file with a predictable owner, group and permission. An atomic
//! variant replaces the file through a temporary file and rename.
//!
//! The free functions operate on the real filesystem. [`SafeFile`] exposes
//! the same operations over any [`fs::FileSystem`], which is how the
//! in-memory filesystem (feature `test-support`) is plugged in.
//!
//! ```rust
//! use safe_file::FileOptions;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let path = dir.path().join("run/state.json");
//!
//! safe_file::write_json(&path, &serde_json::json!({"pid": 42}), &FileOptions::new()).unwrap();
//! let state = safe_file::read_json(&path, &FileOptions::new()).unwrap();
//! assert_eq!(state["pid"], 42);
//!
//! let options = FileOptions::new().raise_on_missing(false).value_on_missing("none");
//! assert_eq!(safe_file::read(dir.path().join("absent"), &options).unwrap(), "none");
//! ```

pub mod fs;
pub mod io;
pub mod logging;
pub mod options;
pub mod text;

pub use io::{
    AccessSnapshot, ErrorKind, LockError, Result, SafeFile, SafeFileError, WriteOptions,
};
pub use options::{
    FileOptions, OptionKey, Principal, DEFAULT_LOCK_TIMEOUT, DEFAULT_PERMISSION, MIN_LOCK_TIMEOUT,
};

use fs::FileHandle;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

/// Read a file as UTF-8; see [`SafeFile::read`]
pub fn read(path: impl AsRef<Path>, options: &FileOptions) -> Result<String> {
    SafeFile::new().read(path, options)
}

/// Read a file as bytes; see [`SafeFile::read_bytes`]
pub fn read_bytes(path: impl AsRef<Path>, options: &FileOptions) -> Result<Vec<u8>> {
    SafeFile::new().read_bytes(path, options)
}

/// Read a JSON file; see [`SafeFile::read_json`]
pub fn read_json(path: impl AsRef<Path>, options: &FileOptions) -> Result<serde_json::Value> {
    SafeFile::new().read_json(path, options)
}

/// Read a JSON file into `T`; see [`SafeFile::read_json_as`]
pub fn read_json_as<T: DeserializeOwned>(
    path: impl AsRef<Path>,
    options: &FileOptions,
) -> Result<T> {
    SafeFile::new().read_json_as(path, options)
}

/// See [`SafeFile::write`]
pub fn write(
    path: impl AsRef<Path>,
    content: impl AsRef<[u8]>,
    options: &FileOptions,
) -> Result<()> {
    SafeFile::new().write(path, content, options)
}

/// See [`SafeFile::atomic_write`]
pub fn atomic_write(
    path: impl AsRef<Path>,
    content: impl AsRef<[u8]>,
    options: &FileOptions,
) -> Result<()> {
    SafeFile::new().atomic_write(path, content, options)
}

/// See [`SafeFile::write_json`]
pub fn write_json<T: Serialize + ?Sized>(
    path: impl AsRef<Path>,
    data: &T,
    options: &FileOptions,
) -> Result<()> {
    SafeFile::new().write_json(path, data, options)
}

/// See [`SafeFile::append`]
pub fn append(
    path: impl AsRef<Path>,
    content: impl AsRef<[u8]>,
    options: &FileOptions,
) -> Result<()> {
    SafeFile::new().append(path, content, options)
}

/// See [`SafeFile::touch`]
pub fn touch(path: impl AsRef<Path>, options: &FileOptions) -> Result<()> {
    SafeFile::new().touch(path, options)
}

/// See [`SafeFile::change_access`]
pub fn change_access(
    path: impl AsRef<Path>,
    owner: Option<&Principal>,
    group: Option<&Principal>,
    permission: Option<u32>,
) -> Result<()> {
    SafeFile::new().change_access(path, owner, group, permission)
}

/// Take a shared lock on an already open handle, waiting up to the
/// options' timeout
pub fn flock_shared<H: FileHandle + ?Sized>(
    handle: &H,
    options: &FileOptions,
) -> std::result::Result<(), LockError> {
    io::lock::flock_shared(handle, options)
}

/// Take an exclusive lock on an already open handle, waiting up to the
/// options' timeout
pub fn flock_exclusive<H: FileHandle + ?Sized>(
    handle: &H,
    options: &FileOptions,
) -> std::result::Result<(), LockError> {
    io::lock::flock_exclusive(handle, options)
}
