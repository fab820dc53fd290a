//! Locked and atomic file I/O
//!
//! - **Locking**: advisory `flock` with a bounded, backed-off wait
//!   ([`lock`])
//! - **Writes**: create parent directory, exclusive lock, optional fsync,
//!   then owner/group/permission ([`write_options`], [`access`])
//! - **Atomic replace**: temporary file plus rename ([`atomic`])
//! - **Errors**: one taxonomy, applied at the [`SafeFile`] boundary
//!   ([`error`])
//!
//! # Example
//!
//! ```rust,no_run
//! use safe_file::io::SafeFile;
//! use safe_file::FileOptions;
//!
//! let files = SafeFile::new();
//! let options = FileOptions::new().perm(0o600).flush(true);
//! files.atomic_write("/var/lib/app/state.json", r#"{"pid": 42}"#, &options).unwrap();
//!
//! let state = files.read_json("/var/lib/app/state.json", &FileOptions::new()).unwrap();
//! assert_eq!(state["pid"], 42);
//! ```

pub mod access;
pub mod atomic;
pub mod error;
pub mod lock;
pub mod safe_file;
pub mod write_options;

pub use error::{ErrorKind, Operation, Result, SafeFileError};
pub use lock::LockError;
pub use safe_file::SafeFile;
pub use write_options::{AccessSnapshot, WriteOptions};
