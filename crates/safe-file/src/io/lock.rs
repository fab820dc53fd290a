//! Advisory locking with a timeout
//!
//! `flock(2)` has no timeout, so acquisition polls the non-blocking variant
//! with exponential backoff until the deadline:
//! - Attempt 0: No wait
//! - Attempt 1: 5ms wait
//! - Attempt 2: 10ms wait
//! - ... doubling up to 250ms between attempts, never past the deadline
//!
//! These functions neither open nor close the handle and never release the
//! lock: it is held until the handle is dropped. On timeout no lock is held.
//!
//! [`lock_path`] also owns the open. A writer that waited on a file which
//! was meanwhile renamed over (see [`crate::io::atomic`]) would otherwise
//! end up writing into the unlinked old inode, so after locking it checks
//! that the handle is still the file at the path and re-opens if not.

use crate::fs::{Clock, FileHandle, FileSystem, LockMode, SystemClock};
use crate::options::FileOptions;
use std::io;
use std::path::Path;
use std::time::{Duration, Instant};
use thiserror::Error;

const INITIAL_BACKOFF: Duration = Duration::from_millis(5);
const MAX_BACKOFF: Duration = Duration::from_millis(250);

/// Lock or raw I/O failure, before translation into
/// [`SafeFileError`](crate::io::error::SafeFileError)
#[derive(Error, Debug)]
pub enum LockError {
    /// The lock was not obtained within `timeout`
    #[error("timed out after {timeout:?} waiting for {mode} lock")]
    TimedOut { mode: LockMode, timeout: Duration },

    /// OS-level failure
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Acquire a shared lock on `handle`, waiting up to `options.timeout`
/// (default 10 seconds).
pub fn flock_shared<H>(handle: &H, options: &FileOptions) -> Result<(), LockError>
where
    H: FileHandle + ?Sized,
{
    acquire(handle, LockMode::Shared, options.lock_timeout())
}

/// Acquire an exclusive lock on `handle`, waiting up to `options.timeout`
/// (default 10 seconds).
pub fn flock_exclusive<H>(handle: &H, options: &FileOptions) -> Result<(), LockError>
where
    H: FileHandle + ?Sized,
{
    acquire(handle, LockMode::Exclusive, options.lock_timeout())
}

/// Acquire a lock of `mode`, waiting up to `timeout` of wall-clock time
pub fn acquire<H>(handle: &H, mode: LockMode, timeout: Duration) -> Result<(), LockError>
where
    H: FileHandle + ?Sized,
{
    acquire_with(handle, mode, timeout, &SystemClock)
}

/// Like [`acquire`], measuring the wait with `clock`
pub fn acquire_with<H>(
    handle: &H,
    mode: LockMode,
    timeout: Duration,
    clock: &dyn Clock,
) -> Result<(), LockError>
where
    H: FileHandle + ?Sized,
{
    acquire_until(handle, mode, clock.now() + timeout, timeout, clock)
}

fn acquire_until<H>(
    handle: &H,
    mode: LockMode,
    deadline: Instant,
    timeout: Duration,
    clock: &dyn Clock,
) -> Result<(), LockError>
where
    H: FileHandle + ?Sized,
{
    let mut backoff = INITIAL_BACKOFF;
    let mut attempt: u32 = 0;

    loop {
        if handle.try_lock(mode)? {
            if attempt > 0 {
                tracing::debug!(%mode, attempt, "lock acquired after waiting");
            }
            return Ok(());
        }

        let now = clock.now();
        if now >= deadline {
            tracing::debug!(%mode, ?timeout, attempt, "lock wait timed out");
            return Err(LockError::TimedOut { mode, timeout });
        }

        clock.sleep(backoff.min(deadline - now));
        backoff = (backoff * 2).min(MAX_BACKOFF);
        attempt += 1;
    }
}

/// Open `path` through `open` and lock it in `mode`, waiting up to
/// `timeout` in total.
///
/// If the file at `path` was replaced or removed while the lock was being
/// waited for, the stale handle is dropped and `open` is called again.
/// Errors from `open` are returned as-is, so a missing file surfaces as
/// `NotFound`.
pub fn lock_path<F, O>(
    fs: &F,
    path: &Path,
    mode: LockMode,
    timeout: Duration,
    mut open: O,
) -> Result<F::Handle, LockError>
where
    F: FileSystem,
    O: FnMut() -> io::Result<F::Handle>,
{
    let clock = fs.clock();
    let deadline = clock.now() + timeout;
    let mut reopened: u32 = 0;

    loop {
        let handle = open()?;
        acquire_until(&handle, mode, deadline, timeout, clock)?;
        if is_current(fs, path, &handle)? {
            return Ok(handle);
        }

        reopened += 1;
        tracing::debug!(
            path = %path.display(),
            %mode,
            reopened,
            "locked file was replaced, reopening"
        );
        if clock.now() >= deadline {
            return Err(LockError::TimedOut { mode, timeout });
        }
    }
}

/// Whether `handle` is still the file found at `path`
fn is_current<F: FileSystem>(fs: &F, path: &Path, handle: &F::Handle) -> io::Result<bool> {
    let locked = handle.metadata()?;
    match fs.metadata(path) {
        Ok(current) => Ok(locked.same_file(&current)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
