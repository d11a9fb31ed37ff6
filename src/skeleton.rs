//! Canonical empty root layout.
//!
//! The final root of every compose starts from this skeleton before the
//! install root's subtrees are moved in: the kernel API mount points, the
//! `sysroot` mount used by the deployment tooling, and FHS names that point
//! into `var`, `run` or `sysroot` because they hold mutable, per-machine
//! data. The package install root is laid out by the package manager.

use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::symlink;
use std::path::Path;

use crate::error::{ComposeError, IoContext, Result};

/// Directories created empty at the top of every root.
pub const MOUNT_POINTS: &[&str] = &["dev", "proc", "run", "sys", "var", "sysroot"];

/// `(name, target)` compatibility symlinks; targets are root-relative.
pub const COMPAT_SYMLINKS: &[(&str, &str)] = &[
    ("opt", "var/opt"),
    ("srv", "var/srv"),
    ("mnt", "var/mnt"),
    ("root", "var/roothome"),
    ("home", "var/home"),
    ("media", "run/media"),
    ("ostree", "sysroot/ostree"),
    ("tmp", "sysroot/tmp"),
];

/// Create `root` and populate the skeleton.
///
/// Fails with [`ComposeError::AlreadyExists`] if anything is already at
/// `root`; callers remove stale state first.
pub fn init_root(root: &Path) -> Result<()> {
    if let Some(parent) = root.parent() {
        fs::create_dir_all(parent).at("failed to create", parent)?;
    }
    match fs::create_dir(root) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            return Err(ComposeError::AlreadyExists {
                path: root.to_path_buf(),
            })
        }
        Err(e) => return Err(ComposeError::io("failed to create", root, e)),
    }

    for dir in MOUNT_POINTS {
        let path = root.join(dir);
        fs::create_dir(&path).at("failed to create", &path)?;
    }

    for (name, target) in COMPAT_SYMLINKS {
        let link = root.join(name);
        symlink(target, &link).at("failed to create symlink", &link)?;
    }

    Ok(())
}
