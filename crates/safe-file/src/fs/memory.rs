//! In-memory filesystem for tests
//!
//! Simulates the pieces of a POSIX filesystem the file operations depend on:
//! directories, inodes that survive `rename`, per-handle advisory locks with
//! `flock` semantics, ownership and permission bits, and a user/group table.
//! Failures can be injected per path to exercise error handling, and a
//! [`ManualClock`] lets lock timeouts expire without waiting.

use crate::fs::{
    parent_dir, Clock, FileHandle, FileStat, FileSystem, LockMode, OpenMode, SystemClock,
};
use std::collections::{HashMap, HashSet};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime};

const DEFAULT_UID: u32 = 1000;
const DEFAULT_GID: u32 = 1000;
const UMASK: u32 = 0o022;
const DEFAULT_CREATE_PERM: u32 = 0o666;
const DEVICE: u64 = 1;

/// Shared, clonable in-memory filesystem
#[derive(Debug, Clone, Default)]
pub struct MemoryFileSystem {
    state: Arc<Mutex<State>>,
    clock: Option<Arc<ManualClock>>,
}

/// Clock that only moves when slept on or advanced
///
/// Sleeping returns immediately after moving the clock forward, so a lock
/// wait of any length finishes at once.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    elapsed: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, duration: Duration) {
        *lock(&self.elapsed) += duration;
    }

    /// Total time slept or advanced so far
    pub fn elapsed(&self) -> Duration {
        *lock(&self.elapsed)
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + self.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

#[derive(Debug)]
struct State {
    files: HashMap<PathBuf, Arc<Inode>>,
    dirs: HashSet<PathBuf>,
    users: HashMap<String, u32>,
    groups: HashMap<String, u32>,
    open_failures: HashMap<PathBuf, io::ErrorKind>,
    chown_failures: HashMap<PathBuf, io::ErrorKind>,
    next_ino: u64,
}

impl Default for State {
    fn default() -> Self {
        let users = HashMap::from([
            ("root".to_string(), 0),
            ("nobody".to_string(), 65534),
            ("user".to_string(), DEFAULT_UID),
        ]);
        let groups = HashMap::from([
            ("root".to_string(), 0),
            ("nogroup".to_string(), 65534),
            ("user".to_string(), DEFAULT_GID),
        ]);
        Self {
            files: HashMap::new(),
            dirs: HashSet::new(),
            users,
            groups,
            open_failures: HashMap::new(),
            chown_failures: HashMap::new(),
            next_ino: 1,
        }
    }
}

#[derive(Debug)]
struct Inode {
    ino: u64,
    data: Mutex<Vec<u8>>,
    meta: Mutex<Meta>,
    locks: Mutex<LockState>,
    syncs: AtomicUsize,
}

#[derive(Debug, Clone, Copy)]
struct Meta {
    uid: u32,
    gid: u32,
    permissions: u32,
    modified: SystemTime,
}

#[derive(Debug, Default)]
struct LockState {
    shared: usize,
    exclusive: bool,
}

impl State {
    fn new_inode(&mut self, permissions: u32) -> Arc<Inode> {
        let ino = self.next_ino;
        self.next_ino += 1;
        Arc::new(Inode::new(ino, permissions))
    }
}

impl Inode {
    fn new(ino: u64, permissions: u32) -> Self {
        Self {
            ino,
            data: Mutex::new(Vec::new()),
            meta: Mutex::new(Meta {
                uid: DEFAULT_UID,
                gid: DEFAULT_GID,
                permissions,
                modified: SystemTime::now(),
            }),
            locks: Mutex::new(LockState::default()),
            syncs: AtomicUsize::new(0),
        }
    }

    fn stat(&self) -> FileStat {
        let meta = *lock(&self.meta);
        FileStat {
            dev: DEVICE,
            ino: self.ino,
            uid: meta.uid,
            gid: meta.gid,
            permissions: meta.permissions,
            len: lock(&self.data).len() as u64,
            modified: meta.modified,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicking test thread must not wedge the rest of the suite.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("No such file or directory: {}", path.display()),
    )
}

fn injected(kind: io::ErrorKind, path: &Path) -> io::Error {
    io::Error::new(kind, format!("injected failure on {}", path.display()))
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// A filesystem whose lock waits run on a [`ManualClock`]
    pub fn with_manual_clock() -> Self {
        Self {
            clock: Some(Arc::new(ManualClock::new())),
            ..Self::default()
        }
    }

    pub fn manual_clock(&self) -> Option<&ManualClock> {
        self.clock.as_deref()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        lock(&self.state)
    }

    fn is_root(path: &Path) -> bool {
        path.as_os_str().is_empty() || path == Path::new(".") || path == Path::new("/")
    }

    fn dir_exists(state: &State, path: &Path) -> bool {
        Self::is_root(path) || state.dirs.contains(path)
    }

    fn inode(&self, path: &Path) -> Option<Arc<Inode>> {
        self.state().files.get(path).cloned()
    }

    /// Create a file with `content`, creating parent directories first
    pub fn write_file(&self, path: impl AsRef<Path>, content: impl AsRef<[u8]>, perm: Option<u32>) {
        let path = path.as_ref();
        let _ = self.create_dir_all(&parent_dir(path));
        let mut state = self.state();
        let inode = state.new_inode(perm.unwrap_or(DEFAULT_CREATE_PERM & !UMASK));
        *lock(&inode.data) = content.as_ref().to_vec();
        state.files.insert(path.to_path_buf(), inode);
    }

    /// Raw file content, `None` if the file does not exist
    pub fn read_file(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        self.inode(path.as_ref()).map(|inode| lock(&inode.data).clone())
    }

    /// File content as UTF-8 (lossy), `None` if the file does not exist
    pub fn read_to_string(&self, path: impl AsRef<Path>) -> Option<String> {
        self.read_file(path)
            .map(|data| String::from_utf8_lossy(&data).into_owned())
    }

    pub fn is_dir(&self, path: impl AsRef<Path>) -> bool {
        Self::dir_exists(&self.state(), path.as_ref())
    }

    /// Paths of all files, sorted
    pub fn file_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.state().files.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Number of `sync_all` calls made on the file currently at `path`
    pub fn sync_count(&self, path: impl AsRef<Path>) -> usize {
        self.inode(path.as_ref())
            .map(|inode| inode.syncs.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    pub fn add_user(&self, name: &str, uid: u32) {
        self.state().users.insert(name.to_string(), uid);
    }

    pub fn add_group(&self, name: &str, gid: u32) {
        self.state().groups.insert(name.to_string(), gid);
    }

    /// Make every `open` of `path` fail with `kind`
    pub fn fail_open(&self, path: impl AsRef<Path>, kind: io::ErrorKind) {
        self.state()
            .open_failures
            .insert(path.as_ref().to_path_buf(), kind);
    }

    /// Make every `chown` of `path` fail with `kind`
    pub fn fail_chown(&self, path: impl AsRef<Path>, kind: io::ErrorKind) {
        self.state()
            .chown_failures
            .insert(path.as_ref().to_path_buf(), kind);
    }

    pub fn clear_failures(&self) {
        let mut state = self.state();
        state.open_failures.clear();
        state.chown_failures.clear();
    }
}

impl FileSystem for MemoryFileSystem {
    type Handle = MemoryFileHandle;

    fn open(&self, path: &Path, mode: OpenMode, perm: Option<u32>) -> io::Result<MemoryFileHandle> {
        let mut state = self.state();
        if let Some(kind) = state.open_failures.get(path) {
            return Err(injected(*kind, path));
        }

        let creates = matches!(mode, OpenMode::Truncate | OpenMode::Append | OpenMode::Update);
        let inode = match state.files.get(path) {
            Some(inode) => Arc::clone(inode),
            None if creates => {
                if !Self::dir_exists(&state, &parent_dir(path)) {
                    return Err(not_found(path));
                }
                let permissions = perm.unwrap_or(DEFAULT_CREATE_PERM) & !UMASK;
                let inode = state.new_inode(permissions);
                state.files.insert(path.to_path_buf(), Arc::clone(&inode));
                inode
            }
            None => return Err(not_found(path)),
        };
        drop(state);

        if mode == OpenMode::Truncate {
            lock(&inode.data).clear();
            lock(&inode.meta).modified = SystemTime::now();
        }

        Ok(MemoryFileHandle {
            inode,
            pos: 0,
            readable: mode != OpenMode::Append,
            writable: mode != OpenMode::Read,
            append: mode == OpenMode::Append,
            held: Mutex::new(None),
        })
    }

    fn metadata(&self, path: &Path) -> io::Result<FileStat> {
        self.inode(path)
            .map(|inode| inode.stat())
            .ok_or_else(|| not_found(path))
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        let mut state = self.state();
        for ancestor in path.ancestors() {
            if Self::is_root(ancestor) {
                continue;
            }
            if state.files.contains_key(ancestor) {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("File exists: {}", ancestor.display()),
                ));
            }
            state.dirs.insert(ancestor.to_path_buf());
        }
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        let mut state = self.state();
        if !Self::dir_exists(&state, &parent_dir(to)) {
            return Err(not_found(to));
        }
        let inode = state.files.remove(from).ok_or_else(|| not_found(from))?;
        state.files.insert(to.to_path_buf(), inode);
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        self.state()
            .files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| not_found(path))
    }

    fn touch(&self, path: &Path, mtime: Option<SystemTime>) -> io::Result<()> {
        let inode = match self.inode(path) {
            Some(inode) => inode,
            None => {
                drop(self.open(path, OpenMode::Update, None)?);
                self.inode(path).ok_or_else(|| not_found(path))?
            }
        };
        lock(&inode.meta).modified = mtime.unwrap_or_else(SystemTime::now);
        Ok(())
    }

    fn chown(&self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> io::Result<()> {
        if let Some(kind) = self.state().chown_failures.get(path) {
            return Err(injected(*kind, path));
        }
        let inode = self.inode(path).ok_or_else(|| not_found(path))?;
        let mut meta = lock(&inode.meta);
        if let Some(uid) = uid {
            meta.uid = uid;
        }
        if let Some(gid) = gid {
            meta.gid = gid;
        }
        Ok(())
    }

    fn chmod(&self, path: &Path, permissions: u32) -> io::Result<()> {
        let inode = self.inode(path).ok_or_else(|| not_found(path))?;
        lock(&inode.meta).permissions = permissions & 0o7777;
        Ok(())
    }

    fn user_id(&self, name: &str) -> io::Result<u32> {
        self.state().users.get(name).copied().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("unknown user {name}"))
        })
    }

    fn group_id(&self, name: &str) -> io::Result<u32> {
        self.state().groups.get(name).copied().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("unknown group {name}"))
        })
    }

    fn clock(&self) -> &dyn Clock {
        match &self.clock {
            Some(clock) => clock.as_ref(),
            None => &SystemClock,
        }
    }
}

/// Open handle on a [`MemoryFileSystem`] file; releases its lock on drop
#[derive(Debug)]
pub struct MemoryFileHandle {
    inode: Arc<Inode>,
    pos: usize,
    readable: bool,
    writable: bool,
    append: bool,
    held: Mutex<Option<LockMode>>,
}

impl MemoryFileHandle {
    fn release(&self, mode: LockMode) {
        let mut locks = lock(&self.inode.locks);
        match mode {
            LockMode::Shared => locks.shared = locks.shared.saturating_sub(1),
            LockMode::Exclusive => locks.exclusive = false,
        }
    }
}

impl Read for MemoryFileHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.readable {
            return Err(io::Error::other("not opened for reading"));
        }
        let data = lock(&self.inode.data);
        // Another handle may have truncated the file below our offset
        if self.pos >= data.len() {
            return Ok(0);
        }
        let n = (data.len() - self.pos).min(buf.len());
        buf[..n].copy_from_slice(&data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl Write for MemoryFileHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.writable {
            return Err(io::Error::other("not opened for writing"));
        }
        let mut data = lock(&self.inode.data);
        if self.append {
            self.pos = data.len();
        }
        let end = self.pos + buf.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[self.pos..end].copy_from_slice(buf);
        self.pos = end;
        lock(&self.inode.meta).modified = SystemTime::now();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl FileHandle for MemoryFileHandle {
    fn try_lock(&self, mode: LockMode) -> io::Result<bool> {
        let mut held = lock(&self.held);
        if *held == Some(mode) {
            return Ok(true);
        }
        // flock converts an existing lock by releasing it first
        if let Some(previous) = held.take() {
            self.release(previous);
        }

        let mut locks = lock(&self.inode.locks);
        let acquired = match mode {
            LockMode::Shared if !locks.exclusive => {
                locks.shared += 1;
                true
            }
            LockMode::Exclusive if !locks.exclusive && locks.shared == 0 => {
                locks.exclusive = true;
                true
            }
            _ => false,
        };
        if acquired {
            *held = Some(mode);
        }
        Ok(acquired)
    }

    fn sync_all(&self) -> io::Result<()> {
        self.inode.syncs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn set_len(&self, len: u64) -> io::Result<()> {
        if !self.writable {
            return Err(io::Error::other("not opened for writing"));
        }
        let len = usize::try_from(len).map_err(io::Error::other)?;
        lock(&self.inode.data).resize(len, 0);
        lock(&self.inode.meta).modified = SystemTime::now();
        Ok(())
    }

    fn metadata(&self) -> io::Result<FileStat> {
        Ok(self.inode.stat())
    }
}

impl Drop for MemoryFileHandle {
    fn drop(&mut self) {
        if let Some(mode) = lock(&self.held).take() {
            self.release(mode);
        }
    }
}
