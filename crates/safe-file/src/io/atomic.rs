//! Replace-on-write
//!
//! The new content is written to a uniquely named temporary file next to the
//! target, synced to disk, then renamed over the target:
//! 1. Take an exclusive lock on the current target (if it exists), following
//!    it if another writer replaces it meanwhile
//! 2. Write the content to `.{name}.{uuid}.tmp` in the same directory
//! 3. fsync the temporary file
//! 4. `rename()` it over the target
//!
//! Readers holding a shared lock keep reading the old file to the end, and
//! readers that open after the rename see the complete new file. A crash
//! leaves either the old or the new content in place, plus at most a stray
//! temporary file. The rename is only atomic within one filesystem, which
//! is why the temporary file lives in the target's directory.

use crate::fs::{parent_dir, FileHandle, FileSystem, LockMode, OpenMode};
use crate::io::lock::{lock_path, LockError};
use crate::io::write_options::WriteOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Atomically replace `path` with `content`.
///
/// Errors are returned untranslated, like
/// [`WriteOptions::write_exclusive`].
pub fn replace_file<F: FileSystem>(
    fs: &F,
    path: &Path,
    write_options: &WriteOptions<'_, F>,
    content: &[u8],
) -> Result<(), LockError> {
    write_options.ensure_parent_directory()?;

    // Lock the file being replaced so concurrent lock-respecting writers
    // are serialized. A read-only handle is enough for flock.
    let timeout = write_options.options().lock_timeout();
    let open = || fs.open(path, OpenMode::Read, None);
    let _target = match lock_path(fs, path, LockMode::Exclusive, timeout, open) {
        Ok(handle) => Some(handle),
        Err(LockError::Io(e)) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => return Err(e),
    };

    let temp_path = temp_path_for(path)?;
    if let Err(e) = write_and_sync(fs, &temp_path, write_options.permission(), content) {
        let _ = fs.remove_file(&temp_path);
        return Err(e.into());
    }

    if let Err(e) = fs.rename(&temp_path, path) {
        let _ = fs.remove_file(&temp_path);
        return Err(e.into());
    }

    tracing::debug!(path = %path.display(), bytes = content.len(), "file replaced");
    Ok(())
}

/// Temporary file path in the same directory as `target`
fn temp_path_for(target: &Path) -> io::Result<PathBuf> {
    let name = target.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("no file name in {}", target.display()),
        )
    })?;
    let temp_name = format!(
        ".{}.{}.tmp",
        name.to_string_lossy(),
        Uuid::new_v4().simple()
    );
    Ok(parent_dir(target).join(temp_name))
}

fn write_and_sync<F: FileSystem>(
    fs: &F,
    path: &Path,
    permission: u32,
    content: &[u8],
) -> io::Result<()> {
    let mut file = fs.open(path, OpenMode::Truncate, Some(permission))?;
    file.write_all(content)?;
    file.flush()?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{LockMode, MemoryFileSystem};
    use crate::options::FileOptions;
    use std::io::Read;
    use std::time::Duration;

    fn replace(
        fs: &MemoryFileSystem,
        path: &str,
        content: &[u8],
        options: &FileOptions,
    ) -> Result<(), LockError> {
        let path = Path::new(path);
        let write_options = WriteOptions::capture(fs, Some(path), options);
        replace_file(fs, path, &write_options, content)
    }

    #[test]
    fn test_replace_new_file() {
        let fs = MemoryFileSystem::new();
        replace(&fs, "dir/file.json", b"{}", &FileOptions::new()).unwrap();

        assert_eq!(fs.read_to_string("dir/file.json").unwrap(), "{}");
        assert_eq!(fs.file_paths(), vec![PathBuf::from("dir/file.json")]);
        assert_eq!(fs.sync_count("dir/file.json"), 1);
    }

    #[test]
    fn test_replace_existing_file() {
        let fs = MemoryFileSystem::new();
        fs.write_file("file", "original content", None);
        replace(&fs, "file", b"new content", &FileOptions::new()).unwrap();

        assert_eq!(fs.read_to_string("file").unwrap(), "new content");
        assert_eq!(fs.file_paths(), vec![PathBuf::from("file")]);
    }

    #[test]
    fn test_reader_keeps_old_content() {
        let fs = MemoryFileSystem::new();
        fs.write_file("file", "old", None);
        let mut reader = fs.open(Path::new("file"), OpenMode::Read, None).unwrap();

        replace(&fs, "file", b"new", &FileOptions::new()).unwrap();

        let mut content = String::new();
        reader.read_to_string(&mut content).unwrap();
        assert_eq!(content, "old");
        assert_eq!(fs.read_to_string("file").unwrap(), "new");
    }

    #[test]
    fn test_locked_target_times_out_without_changes() {
        let fs = MemoryFileSystem::new();
        fs.write_file("file", "old", None);
        let reader = fs.open(Path::new("file"), OpenMode::Read, None).unwrap();
        assert!(reader.try_lock(LockMode::Shared).unwrap());

        let options = FileOptions::new().timeout(Duration::from_millis(50));
        let result = replace(&fs, "file", b"new", &options);

        assert!(matches!(result, Err(LockError::TimedOut { .. })));
        assert_eq!(fs.read_to_string("file").unwrap(), "old");
        assert_eq!(fs.file_paths(), vec![PathBuf::from("file")]);
    }

    #[test]
    fn test_target_open_failure_leaves_no_files() {
        let fs = MemoryFileSystem::new();
        fs.fail_open("file", io::ErrorKind::PermissionDenied);
        let result = replace(&fs, "file", b"new", &FileOptions::new());

        assert!(matches!(result, Err(LockError::Io(_))));
        assert!(fs.file_paths().is_empty());
    }

    #[test]
    fn test_temp_path_is_hidden_sibling() {
        let temp = temp_path_for(Path::new("/some/path/file.txt")).unwrap();
        assert_eq!(temp.parent().unwrap(), Path::new("/some/path"));
        let name = temp.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with(".file.txt."));
        assert!(name.ends_with(".tmp"));
    }

    #[test]
    fn test_temp_paths_are_unique() {
        let a = temp_path_for(Path::new("file")).unwrap();
        let b = temp_path_for(Path::new("file")).unwrap();
        assert_ne!(a, b);
        assert_eq!(a.parent().unwrap(), Path::new("."));
    }

    #[test]
    fn test_temp_path_requires_file_name() {
        assert!(temp_path_for(Path::new("..")).is_err());
    }
}
