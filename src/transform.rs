//! Restructure a package install root into the immutable tree layout.
//!
//! The final tree takes `usr` wholesale from the install root, keeps the
//! package database under `usr/share/rpm`, ships `etc` as the factory
//! defaults in `usr/etc`, and points `usr/local` into `var`. Everything is
//! moved, not copied: after a transform the install root no longer holds
//! the relocated subtrees.
//!
//! A transform that fails halfway is not rolled back. The caller discards
//! the workspace and starts over from a clean package install.

use std::fs;
use std::os::unix::fs::symlink;
use std::path::Path;

use log::{debug, info};

use crate::boot::{seal_boot_dir, BootArtifactSet};
use crate::common::{ensure_dir, path_exists, remove_path, write_file_with_dirs, OwnedPath};
use crate::error::{IoContext, Result};
use crate::skeleton;

/// Package database location written by the package manager.
pub const LEGACY_PACKAGE_DB: &str = "var/lib/rpm";

/// Package database location inside the immutable tree.
pub const PACKAGE_DB: &str = "usr/share/rpm";

/// `usr/local` becomes a symlink to this (relative to `usr`).
pub const USR_LOCAL_TARGET: &str = "../var/usrlocal";

/// Top-level merged-usr links carried over when they are symlinks.
pub const COMPAT_LINKS: &[&str] = &["lib", "lib64", "bin", "sbin"];

/// tmpfiles.d fragment creating the `var` targets the tree links into.
pub const TMPFILES_CONF: &str = "usr/lib/tmpfiles.d/tmpfiles-ostree-integration.conf";

const TMPFILES_CONTENT: &str = "\
# Directories behind the compatibility symlinks of an immutable tree.
d /var/opt 0755 root root -
d /var/srv 0755 root root -
d /var/mnt 0755 root root -
d /var/roothome 0700 root root -
d /var/home 0755 root root -
d /var/usrlocal 0755 root root -
d /var/usrlocal/bin 0755 root root -
d /var/usrlocal/etc 0755 root root -
d /var/usrlocal/lib 0755 root root -
d /var/usrlocal/sbin 0755 root root -
d /var/usrlocal/share 0755 root root -
d /var/usrlocal/src 0755 root root -
d /run/media 0755 root root -
L /var/lib/rpm - - - - ../../usr/share/rpm
";

/// Build `final_root` from `install_root`. Returns the sealed boot pair.
pub fn transform_root(install_root: &Path, final_root: &Path) -> Result<BootArtifactSet> {
    info!(
        "Transforming {} into {}",
        install_root.display(),
        final_root.display()
    );
    skeleton::init_root(final_root)?;

    OwnedPath::claim(install_root.join("usr"))?.move_to(final_root.join("usr"))?;
    relocate_package_db(install_root, final_root)?;
    redirect_usr_local(final_root)?;

    let usr_etc = final_root.join("usr/etc");
    remove_path(&usr_etc)?;
    OwnedPath::claim(install_root.join("etc"))?.move_to(&usr_etc)?;

    let boot = OwnedPath::claim(install_root.join("boot"))?.move_to(final_root.join("boot"))?;
    let artifacts = seal_boot_dir(boot.path())?;

    carry_compat_links(install_root, final_root)?;
    install_tmpfiles_fragment(final_root)?;

    Ok(artifacts)
}

/// Move the package database into `usr/share/rpm` unless one is already
/// there. Returns whether anything moved.
pub fn relocate_package_db(install_root: &Path, final_root: &Path) -> Result<bool> {
    let target = final_root.join(PACKAGE_DB);
    if target.is_dir() {
        debug!("{} already present, not relocating", target.display());
        return Ok(false);
    }
    if let Some(parent) = target.parent() {
        ensure_dir(parent)?;
    }
    OwnedPath::claim(install_root.join(LEGACY_PACKAGE_DB))?.move_to(&target)?;
    Ok(true)
}

/// Replace `usr/local` with a symlink into `var` unless it already is a
/// symlink. Returns whether anything changed.
pub fn redirect_usr_local(final_root: &Path) -> Result<bool> {
    let usr_local = final_root.join("usr/local");
    if usr_local.is_symlink() {
        debug!("{} is already a symlink", usr_local.display());
        return Ok(false);
    }
    remove_path(&usr_local)?;
    symlink(USR_LOCAL_TARGET, &usr_local).at("failed to create symlink", &usr_local)?;
    Ok(true)
}

/// Move `lib`, `lib64`, `bin`, `sbin` into the final root when they are
/// symlinks in the install root. Real directories stay behind so their
/// content never leaks outside `usr`. Returns how many links moved.
pub fn carry_compat_links(install_root: &Path, final_root: &Path) -> Result<usize> {
    let mut carried = 0;
    for name in COMPAT_LINKS {
        let src = install_root.join(name);
        if !src.is_symlink() {
            continue;
        }
        let dest = final_root.join(name);
        if path_exists(&dest) {
            debug!("{} already exists, leaving {}", dest.display(), src.display());
            continue;
        }
        OwnedPath::claim(&src)?.move_to(&dest)?;
        carried += 1;
    }
    Ok(carried)
}

/// Write the tmpfiles.d fragment for the deployment tooling.
pub fn install_tmpfiles_fragment(final_root: &Path) -> Result<()> {
    write_file_with_dirs(final_root.join(TMPFILES_CONF), TMPFILES_CONTENT)
}

/// Move whatever is left in the install root's `var/log` into `logs_dir`.
pub fn stash_install_logs(install_root: &Path, logs_dir: &Path) -> Result<usize> {
    let varlog = install_root.join("var/log");
    if !varlog.is_dir() {
        return Ok(0);
    }
    ensure_dir(logs_dir)?;
    let mut moved = 0;
    for entry in fs::read_dir(&varlog).at("failed to read", &varlog)? {
        let entry = entry.at("failed to read", &varlog)?;
        let dest = logs_dir.join(entry.file_name());
        remove_path(&dest)?;
        OwnedPath::claim(entry.path())?.move_to(dest)?;
        moved += 1;
    }
    Ok(moved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ComposeError;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn test_relocate_package_db_only_once() {
        let temp = TempDir::new().unwrap();
        let install = temp.path().join("install");
        let final_root = temp.path().join("final");
        fs::create_dir_all(install.join(LEGACY_PACKAGE_DB)).unwrap();
        fs::write(install.join(LEGACY_PACKAGE_DB).join("rpmdb.sqlite"), "db").unwrap();
        fs::create_dir_all(final_root.join("usr")).unwrap();

        assert!(relocate_package_db(&install, &final_root).unwrap());
        assert!(final_root.join(PACKAGE_DB).join("rpmdb.sqlite").is_file());

        // A second database must not be merged over the first.
        fs::create_dir_all(install.join(LEGACY_PACKAGE_DB)).unwrap();
        assert!(!relocate_package_db(&install, &final_root).unwrap());
        assert!(install.join(LEGACY_PACKAGE_DB).exists());
    }

    #[test]
    fn test_redirect_usr_local() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("usr/local/bin")).unwrap();

        assert!(redirect_usr_local(temp.path()).unwrap());
        assert_eq!(
            fs::read_link(temp.path().join("usr/local")).unwrap(),
            PathBuf::from(USR_LOCAL_TARGET)
        );
        assert!(!redirect_usr_local(temp.path()).unwrap());
    }

    #[test]
    fn test_compat_links_only_symlinks() {
        let temp = TempDir::new().unwrap();
        let install = temp.path().join("install");
        let final_root = temp.path().join("final");
        fs::create_dir_all(install.join("lib64")).unwrap();
        fs::write(install.join("lib64/stray.so"), "").unwrap();
        fs::create_dir_all(&final_root).unwrap();
        symlink("usr/bin", install.join("bin")).unwrap();
        symlink("usr/lib", install.join("lib")).unwrap();

        assert_eq!(carry_compat_links(&install, &final_root).unwrap(), 2);
        assert!(final_root.join("bin").is_symlink());
        assert!(final_root.join("lib").is_symlink());
        assert!(!path_exists(&final_root.join("lib64")));
        assert!(install.join("lib64/stray.so").exists());

        assert_eq!(carry_compat_links(&install, &final_root).unwrap(), 0);
    }

    #[test]
    fn test_stash_install_logs() {
        let temp = TempDir::new().unwrap();
        let install = temp.path().join("install");
        fs::create_dir_all(install.join("var/log/anaconda")).unwrap();
        fs::write(install.join("var/log/yum.log"), "log").unwrap();
        let logs = temp.path().join("logs");

        assert_eq!(stash_install_logs(&install, &logs).unwrap(), 2);
        assert!(logs.join("yum.log").is_file());
        assert!(logs.join("anaconda").is_dir());
        assert_eq!(fs::read_dir(install.join("var/log")).unwrap().count(), 0);
    }

    #[test]
    fn test_transform_requires_fresh_target() {
        let temp = TempDir::new().unwrap();
        let final_root = temp.path().join("final");
        fs::create_dir_all(&final_root).unwrap();
        let err = transform_root(&temp.path().join("install"), &final_root).unwrap_err();
        assert!(matches!(err, ComposeError::AlreadyExists { .. }));
    }
}
