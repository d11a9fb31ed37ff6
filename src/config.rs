//! Configuration management for treecompose.
//!
//! Reads configuration from environment variables. `main` loads a `.env`
//! file first, and variables already in the environment take precedence.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

use crate::installer::PackageManager;
use crate::repo::RepoBackend;

pub const DEFAULT_WORK_DIR: &str = "/var/cache/rpm-ostree/work";
pub const DEFAULT_REPO: &str = "/ostree/repo";
/// Default `local` repository, relative to the work dir.
pub const DEFAULT_LOCAL_REPO: &str = "local-repo";
pub const DEFAULT_OS_RELEASE: &str = "/etc/os-release";

pub const ENV_WORK_DIR: &str = "TREECOMPOSE_WORKDIR";
pub const ENV_REPO: &str = "TREECOMPOSE_REPO";
pub const ENV_REPO_BACKEND: &str = "TREECOMPOSE_REPO_BACKEND";
pub const ENV_PACKAGE_MANAGER: &str = "TREECOMPOSE_PACKAGE_MANAGER";
pub const ENV_OS_RELEASE: &str = "TREECOMPOSE_OS_RELEASE";
pub const ENV_PRESERVE_ROOTFS: &str = "TREECOMPOSE_PRESERVE_ROOTFS";
pub const ENV_GPG_KEY: &str = "TREECOMPOSE_GPG_KEY";

/// Treecompose configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Workspace root holding install/final roots and lookasides.
    pub work_dir: PathBuf,
    /// Repository commits go to.
    pub repo_path: PathBuf,
    pub repo_backend: RepoBackend,
    pub package_manager: PackageManager,
    /// Source of OS name/version defaults.
    pub os_release: PathBuf,
    /// Keep the final root after a successful commit.
    pub preserve_rootfs: bool,
    /// Key used to sign commits, if any.
    pub gpg_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from(DEFAULT_WORK_DIR),
            repo_path: PathBuf::from(DEFAULT_REPO),
            repo_backend: RepoBackend::default(),
            package_manager: PackageManager::default(),
            os_release: PathBuf::from(DEFAULT_OS_RELEASE),
            preserve_rootfs: false,
            gpg_key: None,
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    /// Build configuration from a variable map, with defaults for the rest.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self> {
        let get = |key: &str| vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let package_manager = match get(ENV_PACKAGE_MANAGER) {
            Some(value) => value
                .parse::<PackageManager>()
                .map_err(|e| anyhow!(e))
                .with_context(|| format!("invalid {}", ENV_PACKAGE_MANAGER))?,
            None => defaults.package_manager,
        };
        let repo_backend = match get(ENV_REPO_BACKEND) {
            Some(value) => value
                .parse::<RepoBackend>()
                .map_err(|e| anyhow!(e))
                .with_context(|| format!("invalid {}", ENV_REPO_BACKEND))?,
            None => defaults.repo_backend,
        };

        let work_dir = get(ENV_WORK_DIR).map(PathBuf::from).unwrap_or(defaults.work_dir);
        // A local store never defaults onto the system OSTree repository.
        let repo_path = match (get(ENV_REPO), repo_backend) {
            (Some(path), _) => PathBuf::from(path),
            (None, RepoBackend::Ostree) => defaults.repo_path,
            (None, RepoBackend::Local) => work_dir.join(DEFAULT_LOCAL_REPO),
        };

        Ok(Self {
            work_dir,
            repo_path,
            repo_backend,
            package_manager,
            os_release: get(ENV_OS_RELEASE)
                .map(PathBuf::from)
                .unwrap_or(defaults.os_release),
            // Any value, even an empty one, turns it on.
            preserve_rootfs: vars.contains_key(ENV_PRESERVE_ROOTFS),
            gpg_key: get(ENV_GPG_KEY).map(String::from),
        })
    }

    /// OS name and version, falling back to os-release for whichever is
    /// not given. The file is only read when a fallback is needed.
    pub fn resolve_os(&self, os: Option<String>, version: Option<String>) -> Result<(String, String)> {
        if let (Some(os), Some(version)) = (&os, &version) {
            return Ok((os.clone(), version.clone()));
        }
        let release = OsRelease::load(&self.os_release)?;
        let os = match os {
            Some(os) => os,
            None => release.require("ID", &self.os_release)?,
        };
        let version = match version {
            Some(version) => version,
            None => release.require("VERSION_ID", &self.os_release)?,
        };
        Ok((os, version))
    }

    /// Print configuration for debugging.
    pub fn print(&self) {
        println!("Configuration:");
        println!("  {}: {}", ENV_WORK_DIR, self.work_dir.display());
        println!("  {}: {}", ENV_REPO, self.repo_path.display());
        println!("  {}: {}", ENV_REPO_BACKEND, self.repo_backend);
        println!("  {}: {}", ENV_PACKAGE_MANAGER, self.package_manager);
        println!("  {}: {}", ENV_OS_RELEASE, self.os_release.display());
        println!("  {}: {}", ENV_PRESERVE_ROOTFS, self.preserve_rootfs);
        println!(
            "  {}: {}",
            ENV_GPG_KEY,
            self.gpg_key.as_deref().unwrap_or("(unsigned)")
        );
        match OsRelease::load(&self.os_release) {
            Ok(release) => println!(
                "  Host OS: {} {}",
                release.get("ID").unwrap_or("?"),
                release.get("VERSION_ID").unwrap_or("?")
            ),
            Err(_) => println!("  Host OS: unknown (no readable os-release)"),
        }
    }
}

/// Parsed `KEY=value` pairs of an os-release file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OsRelease {
    fields: BTreeMap<String, String>,
}

impl OsRelease {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(Self::parse(&content))
    }

    /// Comments and blank lines are skipped; surrounding quotes removed.
    pub fn parse(content: &str) -> Self {
        let fields = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| line.split_once('='))
            .map(|(key, value)| {
                let value = value.trim();
                let value = value
                    .strip_prefix('"')
                    .and_then(|v| v.strip_suffix('"'))
                    .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                    .unwrap_or(value);
                (key.trim().to_string(), value.to_string())
            })
            .collect();
        Self { fields }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    fn require(&self, key: &str, path: &Path) -> Result<String> {
        self.get(key)
            .filter(|v| !v.is_empty())
            .map(String::from)
            .ok_or_else(|| anyhow!("{} has no {}; pass it explicitly", path.display(), key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_vars(&HashMap::new()).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.work_dir, PathBuf::from("/var/cache/rpm-ostree/work"));
        assert_eq!(config.repo_backend, RepoBackend::Ostree);
        assert_eq!(config.repo_path, PathBuf::from(DEFAULT_REPO));
        assert!(!config.preserve_rootfs);
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_vars(&vars(&[
            (ENV_WORK_DIR, "/srv/compose"),
            (ENV_PACKAGE_MANAGER, "dnf"),
            (ENV_PRESERVE_ROOTFS, ""),
            (ENV_GPG_KEY, "  "),
        ]))
        .unwrap();
        assert_eq!(config.work_dir, PathBuf::from("/srv/compose"));
        assert_eq!(config.package_manager, PackageManager::Dnf);
        assert!(config.preserve_rootfs);
        assert_eq!(config.gpg_key, None);
    }

    #[test]
    fn test_local_backend_gets_its_own_repo() {
        let config = Config::from_vars(&vars(&[
            (ENV_WORK_DIR, "/srv/compose"),
            (ENV_REPO_BACKEND, "local"),
        ]))
        .unwrap();
        assert_eq!(config.repo_backend, RepoBackend::Local);
        assert_eq!(config.repo_path, PathBuf::from("/srv/compose/local-repo"));

        let config = Config::from_vars(&vars(&[
            (ENV_REPO_BACKEND, "local"),
            (ENV_REPO, "/srv/store"),
        ]))
        .unwrap();
        assert_eq!(config.repo_path, PathBuf::from("/srv/store"));

        let err = Config::from_vars(&vars(&[(ENV_REPO_BACKEND, "archive-z2")])).unwrap_err();
        assert!(format!("{:#}", err).contains(ENV_REPO_BACKEND));
    }

    #[test]
    fn test_bad_package_manager() {
        let err = Config::from_vars(&vars(&[(ENV_PACKAGE_MANAGER, "apt")])).unwrap_err();
        assert!(format!("{:#}", err).contains("apt"));
    }

    #[test]
    fn test_os_release_parsing() {
        let release = OsRelease::parse(
            "# comment\nNAME=\"Fedora Linux\"\nID=fedora\n\nVERSION_ID='40'\nBROKEN LINE\n",
        );
        assert_eq!(release.get("NAME"), Some("Fedora Linux"));
        assert_eq!(release.get("ID"), Some("fedora"));
        assert_eq!(release.get("VERSION_ID"), Some("40"));
        assert_eq!(release.get("BROKEN LINE"), None);
    }

    #[test]
    fn test_resolve_os_reads_file_only_when_needed() {
        let temp = TempDir::new().unwrap();
        let config = Config {
            os_release: temp.path().join("missing"),
            ..Config::default()
        };
        assert_eq!(
            config
                .resolve_os(Some("centos".into()), Some("9".into()))
                .unwrap(),
            ("centos".to_string(), "9".to_string())
        );
        assert!(config.resolve_os(None, Some("9".into())).is_err());

        let path = temp.path().join("os-release");
        fs::write(&path, "ID=fedora\nVERSION_ID=40\n").unwrap();
        let config = Config {
            os_release: path,
            ..Config::default()
        };
        assert_eq!(
            config.resolve_os(None, Some("rawhide".into())).unwrap(),
            ("fedora".to_string(), "rawhide".to_string())
        );
    }

    #[test]
    #[serial]
    fn test_from_env() {
        std::env::set_var(ENV_REPO, "/tmp/treecompose-test-repo");
        let config = Config::from_env().unwrap();
        std::env::remove_var(ENV_REPO);
        assert_eq!(config.repo_path, PathBuf::from("/tmp/treecompose-test-repo"));
    }
}
