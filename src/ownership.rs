//! Ownership reconciler (§4.6): after a successful `create`, `rename`, or
//! `snapshot`, chown newly materialised paths to the requesting user so a
//! root-owned dataset the broker just created is actually usable by them.
//!
//! Grounded in this corpus's tmpfiles-style directory walker for the
//! depth-unbounded, non-symlink-following traversal and its
//! `lchown`-for-symlinks convention, but driven by `zfs` property/listing
//! queries instead of a static config file.

use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use crate::platform::users;
use crate::tool;

/// Resolve `uid` to its passwd entry's `(uid, gid)` pair. Returns `None`
/// (and logs a warning) when the uid has no passwd entry — chowning to the
/// caller-supplied gid in that case would hand the path to an arbitrary
/// group, so the reconciliation step is skipped instead (SPEC_FULL §E.2).
fn resolve_owner(uid: u32) -> Option<(u32, u32)> {
    match users::lookup_user_by_uid(uid) {
        Some(user) => Some((user.uid, user.gid)),
        None => {
            log::warn!("zfs-helper [WARN] unable to resolve user for ownership uid={uid}");
            None
        }
    }
}

/// Mountpoint values that mean "nothing to reconcile here".
fn is_unreconcilable_mountpoint(value: &str) -> bool {
    matches!(value, "" | "legacy" | "none" | "-")
}

/// Resolve `dataset`'s mountpoint via the tool, in value-only form (§4.6.1).
/// Returns `None` when there is no reconciliation target.
fn resolve_mountpoint(zfs_bin: &str, dataset: &str) -> Option<PathBuf> {
    let result = tool::run(zfs_bin, "get", &["-H", "-o", "value", "mountpoint", dataset]);
    if !result.success {
        log::warn!(
            "zfs-helper [WARN] mountpoint lookup failed dataset={dataset} info={}",
            result.info
        );
        return None;
    }
    if is_unreconcilable_mountpoint(result.info.trim()) {
        return None;
    }
    Some(PathBuf::from(result.info.trim()))
}

/// List descendant filesystems (not the dataset itself) under `dataset`,
/// name-only. Falls back to `[dataset]` if the listing call fails (§E.3 of
/// the expanded design — the original source's fallback behaviour).
fn list_descendant_filesystems(zfs_bin: &str, dataset: &str) -> Vec<String> {
    let result = tool::run(
        zfs_bin,
        "list",
        &["-H", "-r", "-o", "name", "-t", "filesystem", dataset],
    );
    if !result.success || result.info.trim().is_empty() {
        return vec![dataset.to_string()];
    }
    result.info.lines().map(|l| l.trim().to_string()).collect()
}

/// Walk `path` depth-unbounded, not following symlinks, chowning every
/// entry (including the root) to `(uid, gid)`. Missing entries are a race
/// with concurrent deletion and are swallowed; other errors are logged and
/// the walk continues (§4.6.4).
fn chown_tree(path: &Path, uid: u32, gid: u32) {
    if let Err(err) = chown_one(path, uid, gid) {
        if err.kind() != std::io::ErrorKind::NotFound {
            log::warn!(
                "zfs-helper [WARN] chown failed path={} error={err}",
                path.display()
            );
        }
        return;
    }

    let metadata = match fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return,
        Err(err) => {
            log::warn!(
                "zfs-helper [WARN] stat failed path={} error={err}",
                path.display()
            );
            return;
        }
    };
    if !metadata.is_dir() {
        return;
    }

    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return,
        Err(err) => {
            log::warn!(
                "zfs-helper [WARN] readdir failed path={} error={err}",
                path.display()
            );
            return;
        }
    };
    for entry in entries.flatten() {
        chown_tree(&entry.path(), uid, gid);
    }
}

fn chown_one(path: &Path, uid: u32, gid: u32) -> std::io::Result<()> {
    let metadata = fs::symlink_metadata(path)?;
    let c_path = std::ffi::CString::new(path.as_os_str().as_bytes())
        .map_err(|_| std::io::Error::from(std::io::ErrorKind::InvalidInput))?;
    let rc = if metadata.file_type().is_symlink() {
        unsafe { libc::lchown(c_path.as_ptr(), uid, gid) }
    } else {
        unsafe { libc::chown(c_path.as_ptr(), uid, gid) }
    };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Reconcile ownership of a single dataset's mountpoint, non-recursively.
/// Used after `create`.
pub fn reconcile_dataset(zfs_bin: &str, dataset: &str, uid: u32) {
    let Some((uid, gid)) = resolve_owner(uid) else {
        return;
    };
    if let Some(mountpoint) = resolve_mountpoint(zfs_bin, dataset) {
        chown_tree(&mountpoint, uid, gid);
    }
}

/// Reconcile ownership of an entire subtree rooted at `dataset`, used after
/// `rename` (§4.6.2): every descendant filesystem's mountpoint is chowned.
pub fn reconcile_tree(zfs_bin: &str, dataset: &str, uid: u32) {
    let Some((uid, gid)) = resolve_owner(uid) else {
        return;
    };
    for descendant in list_descendant_filesystems(zfs_bin, dataset) {
        if let Some(mountpoint) = resolve_mountpoint(zfs_bin, &descendant) {
            chown_tree(&mountpoint, uid, gid);
        }
    }
}

/// Reconcile ownership of a snapshot's exposed directory, used after
/// `snapshot` (§4.6.3). For `recursive` snapshots, every descendant
/// filesystem's own `.zfs/snapshot/<snap_name>` is reconciled too; a
/// descendant with no mountpoint or no such directory is silently skipped
/// (§9 open question — preserved deliberately).
pub fn reconcile_snapshot(zfs_bin: &str, dataset: &str, snap_name: &str, recursive: bool, uid: u32) {
    let Some((uid, gid)) = resolve_owner(uid) else {
        return;
    };
    let datasets = if recursive {
        list_descendant_filesystems(zfs_bin, dataset)
    } else {
        vec![dataset.to_string()]
    };
    for ds in datasets {
        let Some(mountpoint) = resolve_mountpoint(zfs_bin, &ds) else {
            continue;
        };
        let snap_dir = mountpoint.join(".zfs").join("snapshot").join(snap_name);
        if !snap_dir.exists() {
            continue;
        }
        chown_tree(&snap_dir, uid, gid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::MetadataExt;

    #[test]
    fn unreconcilable_mountpoints_are_recognised() {
        for v in ["", "legacy", "none", "-"] {
            assert!(is_unreconcilable_mountpoint(v));
        }
        assert!(!is_unreconcilable_mountpoint("/mnt/tank/home/alice"));
    }

    #[test]
    fn chown_tree_swallows_missing_root() {
        // A path that cannot exist; this must not panic.
        chown_tree(Path::new("/nonexistent/zfs-helper-test-path"), 1000, 1000);
    }

    #[test]
    fn resolve_owner_skips_unknown_uid() {
        // 4294967294 (u32::MAX - 1) is exceedingly unlikely to be assigned.
        assert_eq!(resolve_owner(4_294_967_294), None);
    }

    #[test]
    fn resolve_owner_uses_passwd_gid_not_an_arbitrary_one() {
        let (uid, gid) = resolve_owner(0).expect("root must exist in passwd db");
        assert_eq!(uid, 0);
        assert_eq!(gid, 0);
    }

    #[test]
    fn chown_tree_walks_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("file"), b"data").unwrap();

        let uid = unsafe { libc::getuid() };
        let gid = unsafe { libc::getgid() };
        chown_tree(dir.path(), uid, gid);

        let meta = fs::metadata(nested.join("file")).unwrap();
        assert_eq!(meta.uid(), uid);
    }
}
