//! Ownership and permission changes

use crate::fs::FileSystem;
use crate::io::error::{Result, SafeFileError};
use crate::options::Principal;
use std::io;
use std::path::Path;

/// Apply owner, group and permission to an existing file.
///
/// Each of the three is optional and applied independently: chown runs when
/// an owner or a group is given, chmod when a permission is given. Names are
/// resolved through the filesystem's user/group lookup.
///
/// # Errors
///
/// Returns `SafeFileError::AccessChange` when the file does not exist (even
/// if nothing was requested), when a name cannot be resolved, or when the
/// chown/chmod call fails.
pub fn change_access<F: FileSystem>(
    fs: &F,
    path: &Path,
    owner: Option<&Principal>,
    group: Option<&Principal>,
    permission: Option<u32>,
) -> Result<()> {
    apply(fs, path, owner, group, permission).map_err(|e| {
        tracing::warn!(path = %path.display(), error = %e, "access change failed");
        SafeFileError::AccessChange {
            path: path.to_path_buf(),
            source: e,
        }
    })
}

fn apply<F: FileSystem>(
    fs: &F,
    path: &Path,
    owner: Option<&Principal>,
    group: Option<&Principal>,
    permission: Option<u32>,
) -> io::Result<()> {
    fs.metadata(path)?;

    let uid = owner.map(|p| resolve(p, |name| fs.user_id(name))).transpose()?;
    let gid = group.map(|p| resolve(p, |name| fs.group_id(name))).transpose()?;
    if uid.is_some() || gid.is_some() {
        fs.chown(path, uid, gid)?;
    }
    if let Some(permission) = permission {
        fs.chmod(path, permission)?;
    }

    tracing::debug!(
        path = %path.display(),
        ?uid,
        ?gid,
        permission = ?permission.map(|p| format!("{p:o}")),
        "access changed"
    );
    Ok(())
}

fn resolve(principal: &Principal, lookup: impl FnOnce(&str) -> io::Result<u32>) -> io::Result<u32> {
    match principal {
        Principal::Id(id) => Ok(*id),
        Principal::Name(name) => lookup(name),
    }
}
