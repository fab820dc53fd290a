//! Real filesystem backed by `std::fs`
//!
//! Advisory locks use `flock(2)` through `fs2`; ownership changes and name
//! lookups are unix-only and report `Unsupported` elsewhere.

use crate::fs::{FileHandle, FileStat, FileSystem, LockMode, OpenMode};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;
use std::time::SystemTime;

#[cfg(unix)]
use std::os::unix::fs::{MetadataExt, OpenOptionsExt, PermissionsExt};

/// The host filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct StdFileSystem;

/// Open file on the host filesystem; the lock is released when dropped
#[derive(Debug)]
pub struct StdFileHandle {
    file: File,
}

impl StdFileHandle {
    pub fn new(file: File) -> Self {
        Self { file }
    }

    pub fn file(&self) -> &File {
        &self.file
    }
}

impl Read for StdFileHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for StdFileHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl FileHandle for StdFileHandle {
    fn try_lock(&self, mode: LockMode) -> io::Result<bool> {
        // Fully qualified: newer toolchains have inherent `File::try_lock*`
        // methods with a different signature.
        let result = match mode {
            LockMode::Shared => FileExt::try_lock_shared(&self.file),
            LockMode::Exclusive => FileExt::try_lock_exclusive(&self.file),
        };
        match result {
            Ok(()) => Ok(true),
            Err(e) if is_contended(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn sync_all(&self) -> io::Result<()> {
        self.file.sync_all()
    }

    fn set_len(&self, len: u64) -> io::Result<()> {
        self.file.set_len(len)
    }

    fn metadata(&self) -> io::Result<FileStat> {
        self.file.metadata().map(|meta| stat_of(&meta))
    }
}

#[cfg(unix)]
fn stat_of(meta: &fs::Metadata) -> FileStat {
    FileStat {
        dev: meta.dev(),
        ino: meta.ino(),
        uid: meta.uid(),
        gid: meta.gid(),
        permissions: meta.mode() & 0o7777,
        len: meta.len(),
        modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
    }
}

// No stable inode number off unix; every file compares as the same file.
#[cfg(not(unix))]
fn stat_of(meta: &fs::Metadata) -> FileStat {
    FileStat {
        dev: 0,
        ino: 0,
        uid: 0,
        gid: 0,
        permissions: if meta.permissions().readonly() { 0o444 } else { 0o644 },
        len: meta.len(),
        modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

impl FileSystem for StdFileSystem {
    type Handle = StdFileHandle;

    fn open(&self, path: &Path, mode: OpenMode, perm: Option<u32>) -> io::Result<StdFileHandle> {
        let mut options = OpenOptions::new();
        match mode {
            OpenMode::Read => {
                options.read(true);
            }
            OpenMode::Truncate => {
                options.read(true).write(true).create(true).truncate(true);
            }
            OpenMode::Append => {
                options.append(true).create(true);
            }
            OpenMode::Update => {
                options.read(true).write(true).create(true).truncate(false);
            }
            OpenMode::Existing => {
                options.read(true).write(true);
            }
        }
        #[cfg(unix)]
        if let Some(perm) = perm {
            options.mode(perm);
        }
        #[cfg(not(unix))]
        let _ = perm;

        options.open(path).map(StdFileHandle::new)
    }

    fn metadata(&self, path: &Path) -> io::Result<FileStat> {
        fs::metadata(path).map(|meta| stat_of(&meta))
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn touch(&self, path: &Path, mtime: Option<SystemTime>) -> io::Result<()> {
        // futimens works on a read-only descriptor, so an existing file only
        // needs to be readable.
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                OpenOptions::new().write(true).create(true).truncate(false).open(path)?
            }
            Err(e) => return Err(e),
        };
        file.set_modified(mtime.unwrap_or_else(SystemTime::now))
    }

    #[cfg(unix)]
    fn chown(&self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> io::Result<()> {
        std::os::unix::fs::chown(path, uid, gid)
    }

    #[cfg(not(unix))]
    fn chown(&self, _path: &Path, _uid: Option<u32>, _gid: Option<u32>) -> io::Result<()> {
        Err(unsupported("chown"))
    }

    #[cfg(unix)]
    fn chmod(&self, path: &Path, permissions: u32) -> io::Result<()> {
        fs::set_permissions(path, fs::Permissions::from_mode(permissions))
    }

    #[cfg(not(unix))]
    fn chmod(&self, path: &Path, permissions: u32) -> io::Result<()> {
        let mut perms = fs::metadata(path)?.permissions();
        perms.set_readonly(permissions & 0o222 == 0);
        fs::set_permissions(path, perms)
    }

    #[cfg(unix)]
    fn user_id(&self, name: &str) -> io::Result<u32> {
        passwd::user_id(name)
    }

    #[cfg(not(unix))]
    fn user_id(&self, _name: &str) -> io::Result<u32> {
        Err(unsupported("user lookup"))
    }

    #[cfg(unix)]
    fn group_id(&self, name: &str) -> io::Result<u32> {
        passwd::group_id(name)
    }

    #[cfg(not(unix))]
    fn group_id(&self, _name: &str) -> io::Result<u32> {
        Err(unsupported("group lookup"))
    }
}

#[cfg(not(unix))]
fn unsupported(what: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        format!("{what} is not supported on this platform"),
    )
}

/// Name lookups through the reentrant libc passwd/group APIs
#[cfg(unix)]
mod passwd {
    use std::ffi::CString;
    use std::io;

    const INITIAL_BUF: usize = 1024;
    const MAX_BUF: usize = 1 << 20;

    fn c_name(name: &str) -> io::Result<CString> {
        CString::new(name).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, format!("invalid name {name:?}"))
        })
    }

    pub fn user_id(name: &str) -> io::Result<u32> {
        let c_name = c_name(name)?;
        let mut buf: Vec<libc::c_char> = vec![0; INITIAL_BUF];
        loop {
            let mut entry: libc::passwd = unsafe { std::mem::zeroed() };
            let mut result: *mut libc::passwd = std::ptr::null_mut();
            let rc = unsafe {
                libc::getpwnam_r(
                    c_name.as_ptr(),
                    &mut entry,
                    buf.as_mut_ptr(),
                    buf.len(),
                    &mut result,
                )
            };
            if rc == libc::ERANGE && buf.len() < MAX_BUF {
                buf.resize(buf.len() * 2, 0);
                continue;
            }
            if rc != 0 {
                return Err(io::Error::from_raw_os_error(rc));
            }
            if result.is_null() {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("unknown user {name}"),
                ));
            }
            return Ok(entry.pw_uid);
        }
    }

    pub fn group_id(name: &str) -> io::Result<u32> {
        let c_name = c_name(name)?;
        let mut buf: Vec<libc::c_char> = vec![0; INITIAL_BUF];
        loop {
            let mut entry: libc::group = unsafe { std::mem::zeroed() };
            let mut result: *mut libc::group = std::ptr::null_mut();
            let rc = unsafe {
                libc::getgrnam_r(
                    c_name.as_ptr(),
                    &mut entry,
                    buf.as_mut_ptr(),
                    buf.len(),
                    &mut result,
                )
            };
            if rc == libc::ERANGE && buf.len() < MAX_BUF {
                buf.resize(buf.len() * 2, 0);
                continue;
            }
            if rc != 0 {
                return Err(io::Error::from_raw_os_error(rc));
            }
            if result.is_null() {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("unknown group {name}"),
                ));
            }
            return Ok(entry.gr_gid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_truncate_creates_and_truncates() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("file.txt");
        fs::write(&path, "deadbeef").unwrap();

        let mut handle = StdFileSystem.open(&path, OpenMode::Truncate, None).unwrap();
        handle.write_all(b"foo").unwrap();
        drop(handle);

        assert_eq!(fs::read_to_string(&path).unwrap(), "foo");
    }

    #[test]
    fn test_open_append_keeps_content() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("file.txt");
        fs::write(&path, "dead").unwrap();

        let mut handle = StdFileSystem.open(&path, OpenMode::Append, None).unwrap();
        handle.write_all(b"beef").unwrap();
        drop(handle);

        assert_eq!(fs::read_to_string(&path).unwrap(), "deadbeef");
    }

    #[test]
    fn test_open_read_missing_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let err = StdFileSystem
            .open(&temp_dir.path().join("missing"), OpenMode::Read, None)
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_try_lock_conflicts_across_handles() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("file.lock");
        fs::write(&path, "").unwrap();

        let first = StdFileSystem.open(&path, OpenMode::Read, None).unwrap();
        let second = StdFileSystem.open(&path, OpenMode::Read, None).unwrap();

        assert!(first.try_lock(LockMode::Shared).unwrap());
        assert!(second.try_lock(LockMode::Shared).unwrap());
        drop(second);

        let writer = StdFileSystem.open(&path, OpenMode::Existing, None).unwrap();
        assert!(!writer.try_lock(LockMode::Exclusive).unwrap());

        drop(first);
        assert!(writer.try_lock(LockMode::Exclusive).unwrap());
    }

    #[test]
    fn test_touch_creates_and_sets_mtime() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("touched");
        let mtime = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_000_000);

        StdFileSystem.touch(&path, Some(mtime)).unwrap();

        let stat = StdFileSystem.metadata(&path).unwrap();
        assert_eq!(stat.len, 0);
        assert_eq!(stat.modified, mtime);
    }

    #[cfg(unix)]
    #[test]
    fn test_open_applies_perm_on_create() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("private");

        drop(StdFileSystem.open(&path, OpenMode::Truncate, Some(0o600)).unwrap());

        let stat = StdFileSystem.metadata(&path).unwrap();
        assert_eq!(stat.permissions, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn test_handle_metadata_tracks_replacement() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state");
        let tmp = temp_dir.path().join("state.tmp");
        fs::write(&path, "old").unwrap();
        fs::write(&tmp, "new").unwrap();

        let handle = StdFileSystem.open(&path, OpenMode::Read, None).unwrap();
        let before = StdFileSystem.metadata(&path).unwrap();
        assert!(handle.metadata().unwrap().same_file(&before));

        fs::rename(&tmp, &path).unwrap();
        let after = StdFileSystem.metadata(&path).unwrap();
        assert!(!handle.metadata().unwrap().same_file(&after));
    }

    #[cfg(unix)]
    #[test]
    fn test_chmod() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("file");
        fs::write(&path, "x").unwrap();

        StdFileSystem.chmod(&path, 0o640).unwrap();
        assert_eq!(StdFileSystem.metadata(&path).unwrap().permissions, 0o640);
    }

    #[cfg(unix)]
    #[test]
    fn test_lookup_root() {
        assert_eq!(StdFileSystem.user_id("root").unwrap(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_lookup_unknown_names() {
        let err = StdFileSystem.user_id("no-such-user-safe-file").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        let err = StdFileSystem.group_id("no-such-group-safe-file").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[cfg(unix)]
    #[test]
    fn test_lookup_rejects_interior_nul() {
        let err = StdFileSystem.user_id("bad\0name").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
