//! Package cache and log lookasides kept between compose runs.
//!
//! Nothing here is fatal. A missing or unreadable cache means a cold start
//! and a failed persist only costs the next run its downloads; both are
//! logged and the compose goes on.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::common::{copy_dir_recursive, ensure_dir, path_exists, remove_path, write_atomic, OwnedPath};
use crate::error::Result;
use crate::workspace::WorkspaceLayout;

/// Written next to the lookaside after a successful persist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMeta {
    /// Regular files in the lookaside.
    pub files: usize,
    /// When the lookaside was replaced (Unix timestamp).
    pub persisted_at: u64,
}

/// What [`CacheManager::restore`] found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheRestore {
    /// A previous lookaside was copied into the install root.
    Reused { files: usize },
    /// No usable lookaside; the package manager starts empty.
    Cold,
}

/// Moves the package cache between the install root and its lookaside.
pub struct CacheManager<'a> {
    layout: &'a WorkspaceLayout,
}

impl<'a> CacheManager<'a> {
    pub fn new(layout: &'a WorkspaceLayout) -> Self {
        Self { layout }
    }

    fn meta_path(&self) -> PathBuf {
        sibling(&self.layout.cache_lookaside_dir, ".meta.json")
    }

    /// Seed the install root's package cache from the lookaside.
    pub fn restore(&self) -> CacheRestore {
        let lookaside = &self.layout.cache_lookaside_dir;
        let live = &self.layout.package_cache_dir;

        if !lookaside.is_dir() {
            info!("No package cache at {}, starting cold", lookaside.display());
            return CacheRestore::Cold;
        }

        if let Some(meta) = self.read_meta() {
            debug!(
                "Lookaside holds {} files persisted at {}",
                meta.files, meta.persisted_at
            );
        }

        let copied = remove_path(live)
            .and_then(|()| match live.parent() {
                Some(parent) => ensure_dir(parent),
                None => Ok(()),
            })
            .and_then(|()| copy_dir_recursive(lookaside, live));

        match copied {
            Ok(files) => {
                info!("Reusing package cache ({} files)", files);
                CacheRestore::Reused { files }
            }
            Err(e) => {
                warn!("Could not reuse package cache: {} (starting cold)", e);
                if let Err(e) = remove_path(live) {
                    warn!("Could not clear partial cache {}: {}", live.display(), e);
                }
                CacheRestore::Cold
            }
        }
    }

    /// Replace the lookaside with the install root's live cache.
    ///
    /// Returns whether the lookaside now holds this run's cache.
    pub fn persist(&self) -> bool {
        match self.try_persist() {
            Ok(true) => true,
            Ok(false) => {
                info!(
                    "No package cache at {}, nothing to persist",
                    self.layout.package_cache_dir.display()
                );
                false
            }
            Err(e) => {
                warn!("Failed to persist package cache: {}", e);
                false
            }
        }
    }

    fn try_persist(&self) -> Result<bool> {
        let Some(live) = OwnedPath::claim_existing(&self.layout.package_cache_dir) else {
            return Ok(false);
        };
        let lookaside = &self.layout.cache_lookaside_dir;
        let staging = sibling(lookaside, ".new");

        if let Some(parent) = lookaside.parent() {
            ensure_dir(parent)?;
        }
        remove_path(&staging)?;
        let staged = live.move_to(&staging)?;

        remove_path(lookaside)?;
        let persisted = staged.move_to(lookaside)?;

        let meta = CacheMeta {
            files: count_files(persisted.path()),
            persisted_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default(),
        };
        match serde_json::to_string_pretty(&meta) {
            Ok(json) => write_atomic(&self.meta_path(), json)?,
            Err(e) => warn!("Could not encode cache metadata: {}", e),
        }

        info!(
            "Persisted package cache to {} ({} files)",
            persisted.path().display(),
            meta.files
        );
        Ok(true)
    }

    /// Metadata of the current lookaside, if readable.
    pub fn read_meta(&self) -> Option<CacheMeta> {
        let path = self.meta_path();
        if !path.is_file() {
            return None;
        }
        match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(meta) => Some(meta),
                Err(e) => {
                    warn!("Ignoring malformed {}: {}", path.display(), e);
                    None
                }
            },
            Err(e) => {
                warn!("Failed to read {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Empty the logs lookaside at the start of a run.
    pub fn reset_logs(&self) -> Result<()> {
        let logs = &self.layout.logs_lookaside_dir;
        if path_exists(logs) {
            debug!("Clearing {}", logs.display());
        }
        remove_path(logs)?;
        ensure_dir(logs)
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

fn count_files(dir: &Path) -> usize {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn layout(temp: &TempDir) -> WorkspaceLayout {
        WorkspaceLayout::new(temp.path().join("work"), "var/cache/yum")
    }

    #[test]
    fn test_restore_without_lookaside_is_cold() {
        let temp = TempDir::new().unwrap();
        let ws = layout(&temp);
        assert_eq!(CacheManager::new(&ws).restore(), CacheRestore::Cold);
        assert!(!ws.package_cache_dir.exists());
    }

    #[test]
    fn test_persist_then_restore() {
        let temp = TempDir::new().unwrap();
        let ws = layout(&temp);
        let cache = CacheManager::new(&ws);

        fs::create_dir_all(ws.package_cache_dir.join("base/packages")).unwrap();
        fs::write(ws.package_cache_dir.join("base/packages/glibc.rpm"), "rpm").unwrap();

        assert!(cache.persist());
        assert!(!ws.package_cache_dir.exists());
        assert!(ws.cache_lookaside_dir.join("base/packages/glibc.rpm").is_file());
        assert_eq!(cache.read_meta().unwrap().files, 1);

        assert_eq!(cache.restore(), CacheRestore::Reused { files: 1 });
        assert!(ws.package_cache_dir.join("base/packages/glibc.rpm").is_file());
        // Restoring copies; the lookaside is still there for the next run.
        assert!(ws.cache_lookaside_dir.join("base/packages/glibc.rpm").is_file());
    }

    #[test]
    fn test_persist_replaces_previous_lookaside() {
        let temp = TempDir::new().unwrap();
        let ws = layout(&temp);
        let cache = CacheManager::new(&ws);

        fs::create_dir_all(&ws.cache_lookaside_dir).unwrap();
        fs::write(ws.cache_lookaside_dir.join("old.rpm"), "old").unwrap();
        fs::create_dir_all(&ws.package_cache_dir).unwrap();
        fs::write(ws.package_cache_dir.join("new.rpm"), "new").unwrap();

        assert!(cache.persist());
        assert!(ws.cache_lookaside_dir.join("new.rpm").is_file());
        assert!(!ws.cache_lookaside_dir.join("old.rpm").exists());
    }

    #[test]
    fn test_persist_without_live_cache() {
        let temp = TempDir::new().unwrap();
        let ws = layout(&temp);
        assert!(!CacheManager::new(&ws).persist());
    }

    #[test]
    fn test_reset_logs() {
        let temp = TempDir::new().unwrap();
        let ws = layout(&temp);
        fs::create_dir_all(&ws.logs_lookaside_dir).unwrap();
        fs::write(ws.logs_lookaside_dir.join("dracut.log"), "old run").unwrap();

        CacheManager::new(&ws).reset_logs().unwrap();
        assert!(ws.logs_lookaside_dir.is_dir());
        assert_eq!(fs::read_dir(&ws.logs_lookaside_dir).unwrap().count(), 0);
    }
}
