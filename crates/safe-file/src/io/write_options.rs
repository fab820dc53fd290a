//! Write-side option handling
//!
//! [`WriteOptions`] interprets a [`FileOptions`] for one write call: it
//! resolves the permission, owner and group to apply, and runs the
//! "create parent directory, open, lock, write, flush" sequence.
//!
//! Owner and group fall back to the values the file had *before* the call.
//! Those are captured once in an [`AccessSnapshot`] so that truncating or
//! recreating the file does not change what "preserve existing" means.

use crate::fs::{parent_dir, FileHandle, FileSystem, LockMode, OpenMode};
use crate::io::lock::{lock_path, LockError};
use crate::options::{FileOptions, OptionKey, Principal, DEFAULT_PERMISSION};
use std::io;
use std::path::{Path, PathBuf};

/// Owner and group of a file at a point in time; both `None` if it did not
/// exist
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccessSnapshot {
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

impl AccessSnapshot {
    /// Stat `path` if given; a missing or unreadable file yields an empty
    /// snapshot.
    pub fn capture<F: FileSystem>(fs: &F, path: Option<&Path>) -> Self {
        match path.map(|p| fs.metadata(p)) {
            Some(Ok(stat)) => Self {
                uid: Some(stat.uid),
                gid: Some(stat.gid),
            },
            _ => Self::default(),
        }
    }
}

/// Options for a single write call
pub struct WriteOptions<'a, F: FileSystem> {
    fs: &'a F,
    path: Option<&'a Path>,
    options: &'a FileOptions,
    existing: AccessSnapshot,
}

impl<'a, F: FileSystem> WriteOptions<'a, F> {
    /// Build from an already captured snapshot
    pub fn new(
        fs: &'a F,
        path: Option<&'a Path>,
        options: &'a FileOptions,
        existing: AccessSnapshot,
    ) -> Self {
        Self {
            fs,
            path,
            options,
            existing,
        }
    }

    /// Build, capturing the current owner/group of `path` first
    pub fn capture(fs: &'a F, path: Option<&'a Path>, options: &'a FileOptions) -> Self {
        Self::new(fs, path, options, AccessSnapshot::capture(fs, path))
    }

    pub fn options(&self) -> &FileOptions {
        self.options
    }

    pub fn path(&self) -> Option<&Path> {
        self.path
    }

    pub fn existing(&self) -> AccessSnapshot {
        self.existing
    }

    /// Permission to apply: `mode`, else `perm`, else `default`.
    ///
    /// Passing `None` as the default leaves the permission unset unless the
    /// caller asked for one.
    pub fn perm(&self, default: Option<u32>) -> Option<u32> {
        self.options.mode.or(self.options.perm).or(default)
    }

    /// Permission to apply, defaulting to 0o644
    pub fn permission(&self) -> u32 {
        self.options
            .mode
            .or(self.options.perm)
            .unwrap_or(DEFAULT_PERMISSION)
    }

    /// Explicit owner, else the owner the file had before this call
    pub fn owner(&self) -> Option<Principal> {
        self.options
            .owner
            .clone()
            .or_else(|| self.existing.uid.map(Principal::Id))
    }

    /// Explicit group, else the group the file had before this call
    pub fn group(&self) -> Option<Principal> {
        self.options
            .group
            .clone()
            .or_else(|| self.existing.gid.map(Principal::Id))
    }

    /// The options restricted to `keys`
    pub fn select<I, K>(&self, keys: I) -> FileOptions
    where
        I: IntoIterator<Item = K>,
        K: Into<Option<OptionKey>>,
    {
        self.options.select(keys)
    }

    /// File name without directory or last extension
    pub fn base_name(&self) -> Option<String> {
        self.path
            .and_then(Path::file_stem)
            .map(|stem| stem.to_string_lossy().into_owned())
    }

    /// Directory part of the file name, `.` if there is none
    pub fn dir_name(&self) -> Option<PathBuf> {
        self.path.map(parent_dir)
    }

    /// Create the parent directory (recursively) when a file name is set
    pub fn ensure_parent_directory(&self) -> io::Result<()> {
        match self.dir_name() {
            Some(dir) => self.fs.create_dir_all(&dir),
            None => Ok(()),
        }
    }

    /// Flush and fsync `handle` when the `flush` option is set.
    ///
    /// Callers often re-read right after writing, so buffered data must
    /// reach the disk first.
    pub fn flush_if_requested<H>(&self, handle: &mut H) -> io::Result<()>
    where
        H: FileHandle + ?Sized,
    {
        if !self.options.should_flush() {
            return Ok(());
        }
        handle.flush()?;
        handle.sync_all()
    }

    /// Open the file in `mode` under an exclusive lock and pass the handle
    /// to `write`.
    ///
    /// Returns `Ok(None)` without touching the filesystem when no file name
    /// is set. If the file is replaced while the lock is awaited, the new
    /// file is opened and locked instead. The handle, and with it the lock,
    /// is released on every path out of this function, including when
    /// `write` fails. Errors are returned as-is for the caller to translate.
    pub fn write_exclusive<T, W>(&self, mode: OpenMode, write: W) -> Result<Option<T>, LockError>
    where
        W: FnOnce(&mut F::Handle) -> io::Result<T>,
    {
        let Some(path) = self.path else {
            return Ok(None);
        };

        self.ensure_parent_directory()?;

        // Truncating at open time would expose an empty file to readers that
        // still hold a shared lock, so truncate only once the lock is ours.
        let open_mode = match mode {
            OpenMode::Truncate => OpenMode::Update,
            other => other,
        };
        let open = || self.fs.open(path, open_mode, Some(self.permission()));
        let timeout = self.options.lock_timeout();
        let mut handle = lock_path(self.fs, path, LockMode::Exclusive, timeout, open)?;
        if mode == OpenMode::Truncate {
            handle.set_len(0)?;
        }

        let value = write(&mut handle)?;
        self.flush_if_requested(&mut handle)?;
        Ok(Some(value))
    }
}
