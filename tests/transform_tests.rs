//! Root transform over a realistic install root.

mod helpers;

use std::fs;

use helpers::{assert_symlink, names_with_prefix, populate_base, populate_kernel, KERNEL_VERSION};
use tempfile::TempDir;
use treecompose::transform::{
    carry_compat_links, redirect_usr_local, relocate_package_db, transform_root, PACKAGE_DB,
};
use treecompose::ComposeError;

fn install_root(temp: &TempDir) -> std::path::PathBuf {
    let root = temp.path().join("install-root");
    populate_base(&root);
    populate_kernel(&root);
    fs::remove_dir_all(root.join("boot/loader")).unwrap();
    fs::create_dir_all(root.join("var/lib/rpm")).unwrap();
    fs::write(root.join("var/lib/rpm/Packages"), "filesystem\n").unwrap();
    root
}

#[test]
fn test_transform_builds_immutable_layout() {
    let temp = TempDir::new().unwrap();
    let install = install_root(&temp);
    let final_root = temp.path().join("rootfs");

    let artifacts = transform_root(&install, &final_root).expect("transform");

    assert_eq!(artifacts.kernel_version, KERNEL_VERSION);
    assert_eq!(
        names_with_prefix(&final_root.join("boot"), "vmlinuz-"),
        vec![format!("vmlinuz-{}-{}", KERNEL_VERSION, artifacts.checksum)]
    );
    assert!(final_root.join("usr/etc/passwd").is_file());
    assert!(!final_root.join("etc").exists());
    assert!(final_root.join(PACKAGE_DB).join("Packages").is_file());
    assert_symlink(&final_root.join("usr/local"), "../var/usrlocal");
    assert_symlink(&final_root.join("lib"), "usr/lib");
    assert_symlink(&final_root.join("home"), "var/home");

    // Relocated subtrees are gone from the install root.
    assert!(!install.join("usr").exists());
    assert!(!install.join("etc").exists());
    assert!(!install.join("var/lib/rpm").exists());
    assert!(install.join("var/log/yum.log").exists());
}

#[test]
fn test_second_transform_never_duplicates() {
    let temp = TempDir::new().unwrap();
    let install = install_root(&temp);
    let final_root = temp.path().join("rootfs");
    transform_root(&install, &final_root).expect("transform");

    // The whole transform refuses an existing target.
    let err = transform_root(&install, &final_root).unwrap_err();
    assert!(matches!(err, ComposeError::AlreadyExists { .. }));

    // Each guarded step is a no-op on the transformed tree.
    fs::create_dir_all(install.join("var/lib/rpm")).unwrap();
    fs::write(install.join("var/lib/rpm/Packages"), "second\n").unwrap();
    assert!(!relocate_package_db(&install, &final_root).unwrap());
    assert_eq!(
        fs::read_to_string(final_root.join(PACKAGE_DB).join("Packages")).unwrap(),
        "filesystem\n"
    );
    assert!(!redirect_usr_local(&final_root).unwrap());

    std::os::unix::fs::symlink("usr/bin", install.join("bin")).unwrap();
    assert_eq!(carry_compat_links(&install, &final_root).unwrap(), 0);
    assert!(install.join("bin").is_symlink());
}
