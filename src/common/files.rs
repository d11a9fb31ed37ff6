//! File writes that either land completely or not at all.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{ComposeError, IoContext, Result};

/// Write a file, creating parent directories as needed.
pub fn write_file_with_dirs<P: AsRef<Path>, C: AsRef<[u8]>>(path: P, content: C) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).at("failed to create", parent)?;
    }
    fs::write(path, content).at("failed to write", path)
}

/// Sibling path used for write-then-rename.
pub fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Replace `path` with `content` via a temporary sibling and rename(2).
///
/// A reader (or an interrupted run) sees either the old file or the new
/// one, never a truncated mix. Permissions of an existing file are kept.
pub fn write_atomic(path: &Path, content: impl AsRef<[u8]>) -> Result<()> {
    let tmp = temp_sibling(path);
    let permissions = fs::metadata(path).ok().map(|m| m.permissions());

    let write = || -> std::io::Result<()> {
        let mut file = File::create(&tmp)?;
        file.write_all(content.as_ref())?;
        file.sync_all()?;
        if let Some(perms) = permissions {
            fs::set_permissions(&tmp, perms)?;
        }
        Ok(())
    };

    if let Err(e) = write() {
        let _ = fs::remove_file(&tmp);
        return Err(ComposeError::io("failed to write", &tmp, e));
    }

    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        ComposeError::io("failed to replace", path, e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    #[test]
    fn test_write_file_with_dirs_creates_parents() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a/b/c.txt");
        write_file_with_dirs(&path, "hello").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "hello");
    }

    #[test]
    fn test_write_atomic_replaces_and_keeps_mode() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nsswitch.conf");
        fs::write(&path, "old").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600)).unwrap();

        write_atomic(&path, "new").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "new");
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
        assert!(!temp_sibling(&path).exists());
    }

    #[test]
    fn test_write_atomic_fails_in_missing_dir() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("missing/file");
        assert!(write_atomic(&path, "x").is_err());
    }
}
