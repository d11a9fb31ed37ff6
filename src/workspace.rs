//! Paths a compose run owns under its work directory.

use std::path::{Path, PathBuf};

use log::info;

use crate::common::{ensure_dir, remove_path};
use crate::error::Result;

/// Absolute paths used by one compose run.
///
/// Only one run may use a given work directory at a time; nothing here
/// locks it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceLayout {
    pub work_dir: PathBuf,
    /// Package manager target.
    pub install_root: PathBuf,
    /// Transformed tree handed to the repository.
    pub final_root: PathBuf,
    /// Live package cache inside the install root.
    pub package_cache_dir: PathBuf,
    /// Package cache kept between runs.
    pub cache_lookaside_dir: PathBuf,
    /// Logs kept out of the composed tree.
    pub logs_lookaside_dir: PathBuf,
    /// Installed package list of the last run.
    pub manifest_file: PathBuf,
}

impl WorkspaceLayout {
    /// Lay out a workspace under `work_dir`. `package_cache_subdir` is the
    /// package manager's cache location relative to its install root.
    pub fn new(work_dir: impl Into<PathBuf>, package_cache_subdir: &str) -> Self {
        let work_dir = work_dir.into();
        let install_root = work_dir.join("install-root");
        Self {
            package_cache_dir: install_root.join(package_cache_subdir),
            final_root: work_dir.join("rootfs"),
            cache_lookaside_dir: work_dir.join("package-cache"),
            logs_lookaside_dir: work_dir.join("logs"),
            manifest_file: work_dir.join("rpm-manifest.txt"),
            install_root,
            work_dir,
        }
    }

    /// Discard roots left by an interrupted run. Lookasides survive.
    pub fn reset(&self) -> Result<()> {
        ensure_dir(&self.work_dir)?;
        for root in [&self.install_root, &self.final_root] {
            if root.exists() || root.is_symlink() {
                info!("Removing stale {}", root.display());
            }
            remove_path(root)?;
        }
        Ok(())
    }

    /// Remove install and final roots after a successful commit.
    ///
    /// With `preserve_final_root` the transformed tree stays for inspection.
    pub fn teardown(&self, preserve_final_root: bool) -> Result<()> {
        remove_path(&self.install_root)?;
        if preserve_final_root {
            info!("Preserving {}", self.final_root.display());
        } else {
            remove_path(&self.final_root)?;
        }
        Ok(())
    }

    pub fn etc_dir(&self) -> PathBuf {
        self.install_root.join("etc")
    }

    pub fn boot_dir(&self) -> PathBuf {
        self.install_root.join("boot")
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }
}
