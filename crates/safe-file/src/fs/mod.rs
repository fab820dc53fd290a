//! Filesystem capability used by the file operations
//!
//! All disk access goes through the [`FileSystem`] trait so the operations
//! can run against the real filesystem ([`StdFileSystem`]) or an in-memory
//! simulation (`MemoryFileSystem`, available in tests and with the
//! `test-support` feature).
//!
//! Locks are advisory and follow `flock(2)` semantics: they belong to the
//! open handle, any number of shared holders may coexist, an exclusive holder
//! excludes everyone else, and dropping the handle releases the lock.
//!
//! Lock deadlines are measured with the filesystem's [`Clock`], so the
//! in-memory filesystem can run timeouts without waiting on the wall clock.

#[cfg(any(test, feature = "test-support"))]
pub mod memory;
pub mod std_fs;

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

#[cfg(any(test, feature = "test-support"))]
pub use memory::{ManualClock, MemoryFileSystem};
pub use std_fs::StdFileSystem;

/// Advisory lock mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Any number of concurrent holders (readers)
    Shared,
    /// Single holder, excludes shared holders (writer)
    Exclusive,
}

impl std::fmt::Display for LockMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockMode::Shared => f.write_str("shared"),
            LockMode::Exclusive => f.write_str("exclusive"),
        }
    }
}

/// How a file is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Read only; the file must exist
    Read,
    /// Read/write, created if missing, truncated if present
    Truncate,
    /// Append, created if missing
    Append,
    /// Read/write, created if missing, existing content kept
    Update,
    /// Read/write; the file must exist and is not truncated
    Existing,
}

/// Subset of file metadata the operations rely on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    /// Device and inode; together they identify the file behind a path
    pub dev: u64,
    pub ino: u64,
    pub uid: u32,
    pub gid: u32,
    /// Permission bits only (no file type bits)
    pub permissions: u32,
    pub len: u64,
    pub modified: SystemTime,
}

impl FileStat {
    /// Whether both stats describe the same file, regardless of its path
    pub fn same_file(&self, other: &FileStat) -> bool {
        self.dev == other.dev && self.ino == other.ino
    }
}

/// Time source for lock deadlines
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    fn sleep(&self, duration: Duration);
}

/// The wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// An open file
pub trait FileHandle: Read + Write + Send {
    /// Attempt to take an advisory lock without blocking.
    ///
    /// Returns `Ok(false)` when the lock is held elsewhere in a conflicting
    /// mode.
    fn try_lock(&self, mode: LockMode) -> io::Result<bool>;

    /// Force written data to stable storage.
    fn sync_all(&self) -> io::Result<()>;

    /// Truncate or extend the file to `len` bytes.
    fn set_len(&self, len: u64) -> io::Result<()>;

    /// Metadata of the open file, which may no longer be the file at its
    /// original path.
    fn metadata(&self) -> io::Result<FileStat>;
}

/// Filesystem operations
pub trait FileSystem: Send + Sync {
    type Handle: FileHandle;

    /// Open `path` in `mode`; `perm` applies only when the file is created.
    fn open(&self, path: &Path, mode: OpenMode, perm: Option<u32>) -> io::Result<Self::Handle>;

    fn metadata(&self, path: &Path) -> io::Result<FileStat>;

    fn exists(&self, path: &Path) -> bool {
        self.metadata(path).is_ok()
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    fn remove_file(&self, path: &Path) -> io::Result<()>;

    /// Create `path` if missing and set its modification time (now if `None`).
    fn touch(&self, path: &Path, mtime: Option<SystemTime>) -> io::Result<()>;

    /// Change owner and/or group; `None` leaves that id unchanged.
    fn chown(&self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> io::Result<()>;

    fn chmod(&self, path: &Path, permissions: u32) -> io::Result<()>;

    /// Resolve a user name to its uid.
    fn user_id(&self, name: &str) -> io::Result<u32>;

    /// Resolve a group name to its gid.
    fn group_id(&self, name: &str) -> io::Result<u32>;

    fn clock(&self) -> &dyn Clock {
        &SystemClock
    }
}

/// Parent directory of `path`, `.` when it has no directory component
pub fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_dir() {
        assert_eq!(parent_dir(Path::new("found")), PathBuf::from("."));
        assert_eq!(parent_dir(Path::new("dir1/dir2/found")), PathBuf::from("dir1/dir2"));
        assert_eq!(parent_dir(Path::new("/abs/found.ext")), PathBuf::from("/abs"));
    }

    #[test]
    fn test_same_file_ignores_everything_but_identity() {
        let stat = FileStat {
            dev: 1,
            ino: 42,
            uid: 0,
            gid: 0,
            permissions: 0o644,
            len: 3,
            modified: SystemTime::UNIX_EPOCH,
        };
        let grown = FileStat {
            len: 10,
            permissions: 0o600,
            ..stat
        };
        let replaced = FileStat { ino: 43, ..stat };

        assert!(stat.same_file(&grown));
        assert!(!stat.same_file(&replaced));
    }

    #[test]
    fn test_system_clock_advances() {
        let clock = SystemClock;
        let start = clock.now();
        clock.sleep(Duration::from_millis(5));
        assert!(clock.now() - start >= Duration::from_millis(5));
    }

    #[test]
    fn test_lock_mode_display() {
        assert_eq!(LockMode::Shared.to_string(), "shared");
        assert_eq!(LockMode::Exclusive.to_string(), "exclusive");
    }
}
