//! Locked file operations with a single error boundary
//!
//! Each operation follows the same sequence:
//!
//! ```text
//! ensure directory -> open -> lock -> read/write -> flush (optional)
//!     -> close (releases lock) -> chown/chmod (writes only)
//! ```
//!
//! Lower layers hand back raw lock and I/O errors; this is the only place
//! they are turned into [`SafeFileError`].

use crate::fs::{FileHandle, FileSystem, LockMode, OpenMode, StdFileSystem};
use crate::io::access;
use crate::io::atomic::replace_file;
use crate::io::error::{Operation, Result, SafeFileError};
use crate::io::lock::{self, LockError};
use crate::io::write_options::WriteOptions;
use crate::options::{FileOptions, OptionKey, Principal};
use crate::text::decode_content;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{self, Read, Write};
use std::path::Path;

/// File operations over a [`FileSystem`]
///
/// `SafeFile::new()` works on the host filesystem; `SafeFile::with_fs`
/// accepts any other implementation.
#[derive(Debug, Clone, Default)]
pub struct SafeFile<F: FileSystem = StdFileSystem> {
    fs: F,
}

impl SafeFile<StdFileSystem> {
    pub fn new() -> Self {
        Self { fs: StdFileSystem }
    }
}

impl<F: FileSystem> SafeFile<F> {
    pub fn with_fs(fs: F) -> Self {
        Self { fs }
    }

    pub fn fs(&self) -> &F {
        &self.fs
    }

    /// Acquire a shared lock on an open handle (see [`lock::flock_shared`]),
    /// timed by this filesystem's clock
    pub fn flock_shared<H>(
        &self,
        handle: &H,
        options: &FileOptions,
    ) -> std::result::Result<(), LockError>
    where
        H: FileHandle + ?Sized,
    {
        lock::acquire_with(handle, LockMode::Shared, options.lock_timeout(), self.fs.clock())
    }

    /// Acquire an exclusive lock on an open handle (see
    /// [`lock::flock_exclusive`])
    pub fn flock_exclusive<H>(
        &self,
        handle: &H,
        options: &FileOptions,
    ) -> std::result::Result<(), LockError>
    where
        H: FileHandle + ?Sized,
    {
        lock::acquire_with(handle, LockMode::Exclusive, options.lock_timeout(), self.fs.clock())
    }

    /// Read the whole file as UTF-8 under a shared lock.
    ///
    /// With `scrub_encoding` set, invalid UTF-8 is replaced instead of being
    /// an error.
    ///
    /// # Errors
    ///
    /// - `Locked` if the lock is not obtained within the timeout; this is
    ///   returned even when `raise_on_missing` is false
    /// - `Missing` / `Read` when the file cannot be read, unless
    ///   `raise_on_missing` is false, in which case `value_on_missing`
    ///   (default empty) is returned
    pub fn read(&self, path: impl AsRef<Path>, options: &FileOptions) -> Result<String> {
        let text = self.read_text(path.as_ref(), options)?;
        Ok(text.unwrap_or_else(|| options.value_on_missing.clone().unwrap_or_default()))
    }

    /// Read the whole file as bytes under a shared lock.
    ///
    /// Same locking and missing-file policy as [`SafeFile::read`];
    /// `scrub_encoding` does not apply.
    pub fn read_bytes(&self, path: impl AsRef<Path>, options: &FileOptions) -> Result<Vec<u8>> {
        let path = path.as_ref();
        let bytes = match self.read_locked(path, options) {
            Ok(bytes) => Some(bytes),
            Err(e) => self.unreadable(path, options, e)?,
        };
        Ok(bytes.unwrap_or_else(|| {
            options
                .value_on_missing
                .clone()
                .map(String::into_bytes)
                .unwrap_or_default()
        }))
    }

    /// Read and decode a JSON file.
    ///
    /// When the file cannot be read and `raise_on_missing` is false, the
    /// result is an empty JSON object; `value_on_missing` is ignored.
    pub fn read_json(
        &self,
        path: impl AsRef<Path>,
        options: &FileOptions,
    ) -> Result<serde_json::Value> {
        self.read_json_as(path, options)
    }

    /// Read a JSON file into `T`.
    ///
    /// An unreadable file (with `raise_on_missing` false) decodes from `{}`,
    /// so `T` should accept an empty object.
    pub fn read_json_as<T>(&self, path: impl AsRef<Path>, options: &FileOptions) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let path = path.as_ref();
        let parsed = match self.read_text(path, options)? {
            Some(text) => serde_json::from_str(&text),
            None => serde_json::from_value(serde_json::Value::Object(serde_json::Map::new())),
        };
        parsed.map_err(|e| {
            tracing::warn!(path = %path.display(), error = %e, "JSON parse failed");
            SafeFileError::Parse {
                path: path.to_path_buf(),
                source: e,
            }
        })
    }

    /// Create the file if needed and update its modification time, then
    /// apply owner, group and permission.
    ///
    /// Only `mtime` is used for the touch itself. Unlike the write
    /// operations there is no default permission: it changes only when
    /// `mode` or `perm` is set.
    pub fn touch(&self, path: impl AsRef<Path>, options: &FileOptions) -> Result<()> {
        let path = path.as_ref();
        let write_options = WriteOptions::capture(&self.fs, Some(path), options);
        let touch_options = write_options.select([OptionKey::Mtime]);

        write_options
            .ensure_parent_directory()
            .and_then(|()| self.fs.touch(path, touch_options.mtime))
            .map_err(|e| write_failed(path, LockError::Io(e)))?;

        self.change_access(
            path,
            write_options.owner().as_ref(),
            write_options.group().as_ref(),
            write_options.perm(None),
        )
    }

    /// Replace the file's content under an exclusive lock, creating it and
    /// its parent directory as needed.
    ///
    /// Afterwards owner and group are set to the requested values, or back
    /// to what they were before the call, and the permission to
    /// `mode`/`perm` (default 0o644).
    pub fn write(
        &self,
        path: impl AsRef<Path>,
        content: impl AsRef<[u8]>,
        options: &FileOptions,
    ) -> Result<()> {
        self.write_locked(path.as_ref(), OpenMode::Truncate, content.as_ref(), options)
    }

    /// Append to the file under an exclusive lock, creating it as needed.
    ///
    /// Same options and errors as [`SafeFile::write`].
    pub fn append(
        &self,
        path: impl AsRef<Path>,
        content: impl AsRef<[u8]>,
        options: &FileOptions,
    ) -> Result<()> {
        self.write_locked(path.as_ref(), OpenMode::Append, content.as_ref(), options)
    }

    /// Replace the file's content through a temporary file and rename.
    ///
    /// Concurrent readers see either the previous or the new content in
    /// full, and a crash never leaves a truncated file behind. Options and
    /// errors are the same as for [`SafeFile::write`]; the new content is
    /// always synced before the rename.
    pub fn atomic_write(
        &self,
        path: impl AsRef<Path>,
        content: impl AsRef<[u8]>,
        options: &FileOptions,
    ) -> Result<()> {
        let path = path.as_ref();
        let content = content.as_ref();
        let write_options = WriteOptions::capture(&self.fs, Some(path), options);

        replace_file(&self.fs, path, &write_options, content)
            .map_err(|e| write_failed(path, e))?;

        tracing::debug!(path = %path.display(), bytes = content.len(), "atomic write complete");
        self.apply_access(path, &write_options)
    }

    /// Serialize `data` as pretty-printed JSON and [`atomic_write`] it.
    ///
    /// [`atomic_write`]: SafeFile::atomic_write
    pub fn write_json<T>(
        &self,
        path: impl AsRef<Path>,
        data: &T,
        options: &FileOptions,
    ) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let path = path.as_ref();
        let content = serde_json::to_vec_pretty(data).map_err(|e| SafeFileError::Encode {
            path: path.to_path_buf(),
            source: e,
        })?;
        self.atomic_write(path, content, options)
    }

    /// Change owner, group and/or permission of an existing file.
    ///
    /// See [`access::change_access`].
    pub fn change_access(
        &self,
        path: impl AsRef<Path>,
        owner: Option<&Principal>,
        group: Option<&Principal>,
        permission: Option<u32>,
    ) -> Result<()> {
        access::change_access(&self.fs, path.as_ref(), owner, group, permission)
    }

    fn write_locked(
        &self,
        path: &Path,
        mode: OpenMode,
        content: &[u8],
        options: &FileOptions,
    ) -> Result<()> {
        let write_options = WriteOptions::capture(&self.fs, Some(path), options);

        write_options
            .write_exclusive(mode, |file| file.write_all(content))
            .map_err(|e| write_failed(path, e))?;

        tracing::debug!(path = %path.display(), ?mode, bytes = content.len(), "write complete");
        self.apply_access(path, &write_options)
    }

    fn apply_access(&self, path: &Path, write_options: &WriteOptions<'_, F>) -> Result<()> {
        self.change_access(
            path,
            write_options.owner().as_ref(),
            write_options.group().as_ref(),
            Some(write_options.permission()),
        )
    }

    fn read_locked(
        &self,
        path: &Path,
        options: &FileOptions,
    ) -> std::result::Result<Vec<u8>, LockError> {
        let open = || self.fs.open(path, OpenMode::Read, None);
        let timeout = options.lock_timeout();
        let mut handle = lock::lock_path(&self.fs, path, LockMode::Shared, timeout, open)?;
        let mut content = Vec::new();
        handle.read_to_end(&mut content)?;
        Ok(content)
    }

    /// Read and decode; `None` when the file is unreadable and the caller
    /// asked not to fail
    fn read_text(&self, path: &Path, options: &FileOptions) -> Result<Option<String>> {
        let bytes = match self.read_locked(path, options) {
            Ok(bytes) => bytes,
            Err(e) => return self.unreadable(path, options, e),
        };
        match decode_content(bytes, options.scrub_encoding.as_deref()) {
            Ok(text) => Ok(Some(text)),
            Err(e) => {
                let source = io::Error::new(io::ErrorKind::InvalidData, e);
                self.unreadable(path, options, LockError::Io(source))
            }
        }
    }

    /// Apply the missing-file policy to a failed read
    fn unreadable<T>(
        &self,
        path: &Path,
        options: &FileOptions,
        err: LockError,
    ) -> Result<Option<T>> {
        let source = match err {
            LockError::TimedOut { timeout, .. } => {
                tracing::warn!(path = %path.display(), ?timeout, "read lock timed out");
                return Err(SafeFileError::Locked {
                    operation: Operation::Read,
                    path: path.to_path_buf(),
                    timeout,
                });
            }
            LockError::Io(source) => source,
        };

        if !options.should_raise_on_missing() {
            tracing::debug!(
                path = %path.display(),
                error = %source,
                "read failed, using fallback value"
            );
            return Ok(None);
        }

        tracing::warn!(path = %path.display(), error = %source, "read failed");
        if source.kind() == io::ErrorKind::NotFound {
            Err(SafeFileError::Missing {
                path: path.to_path_buf(),
            })
        } else {
            Err(SafeFileError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    }
}

fn write_failed(path: &Path, err: LockError) -> SafeFileError {
    match err {
        LockError::TimedOut { timeout, .. } => {
            tracing::warn!(path = %path.display(), ?timeout, "write lock timed out");
            SafeFileError::Locked {
                operation: Operation::Write,
                path: path.to_path_buf(),
                timeout,
            }
        }
        LockError::Io(source) => {
            tracing::warn!(path = %path.display(), error = %source, "write failed");
            SafeFileError::Write {
                path: path.to_path_buf(),
                source,
            }
        }
    }
}
