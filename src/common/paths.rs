//! Path removal, recursive copies and ownership moves between roots.
//!
//! The compose hands whole subtrees (`usr`, `etc`, `boot`, the package
//! cache) from one root to another with rename(2). [`OwnedPath`] models
//! such a subtree: moving it consumes the value, so code that still holds
//! the old location cannot compile, and the move itself checks that the
//! source is gone afterwards.

use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{ComposeError, IoContext, Result};

/// True if something (file, dir, or dangling symlink) exists at `path`.
pub fn path_exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// Remove whatever is at `path`. Missing paths are fine.
pub fn remove_path(path: &Path) -> Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(ComposeError::io("failed to stat", path, e)),
    };
    if meta.is_dir() {
        fs::remove_dir_all(path).at("failed to remove", path)
    } else {
        fs::remove_file(path).at("failed to remove", path)
    }
}

/// Ensure a directory exists, creating it if necessary.
pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).at("failed to create", path)
}

/// Copy a directory tree, preserving symlinks and file permission bits.
///
/// Returns the number of regular files copied.
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<usize> {
    let mut files = 0;
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(src).to_path_buf();
            ComposeError::io("failed to walk", path, e.into())
        })?;
        let rel = entry.path().strip_prefix(src).map_err(|_| {
            ComposeError::io(
                "path escaped copy root",
                entry.path(),
                std::io::ErrorKind::InvalidInput.into(),
            )
        })?;
        let dest = dst.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&dest).at("failed to create", &dest)?;
        } else if file_type.is_symlink() {
            let target = fs::read_link(entry.path()).at("failed to read link", entry.path())?;
            symlink(&target, &dest).at("failed to create symlink", &dest)?;
        } else {
            fs::copy(entry.path(), &dest).at("failed to copy to", &dest)?;
            files += 1;
        }
    }
    Ok(files)
}

/// A filesystem subtree that is about to change hands.
#[derive(Debug)]
pub struct OwnedPath {
    path: PathBuf,
}

impl OwnedPath {
    /// Take ownership of an existing path (symlinks are not followed).
    pub fn claim(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        fs::symlink_metadata(&path).at("cannot claim", &path)?;
        Ok(Self { path })
    }

    /// Take ownership of `path` only if something is there.
    pub fn claim_existing(path: impl Into<PathBuf>) -> Option<Self> {
        let path = path.into();
        path_exists(&path).then_some(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Move the subtree to `dest`; the old location is no longer valid.
    ///
    /// The parent of `dest` must exist. Anything already at `dest` makes
    /// the move fail for directories (rename(2) refuses non-empty targets).
    pub fn move_to(self, dest: impl Into<PathBuf>) -> Result<OwnedPath> {
        let dest = dest.into();
        if let Err(source) = fs::rename(&self.path, &dest) {
            return Err(ComposeError::Relocation {
                from: self.path,
                to: dest,
                source,
            });
        }
        debug_assert!(
            !path_exists(&self.path),
            "source {} still present after move",
            self.path.display()
        );
        Ok(OwnedPath { path: dest })
    }

    /// Give up ownership and return the current location.
    pub fn into_path(self) -> PathBuf {
        self.path
    }
}
