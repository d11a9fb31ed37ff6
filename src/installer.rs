//! Package installation into a target root.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::{ComposeError, Result};
use crate::process::Cmd;
use crate::request::ComposeRequest;

/// Installed first, before the NSS patch: the root layout, libc, and the
/// `altfiles` NSS module itself.
pub const BASE_PACKAGES: &[&str] = &["filesystem", "glibc", "nss-altfiles"];

/// Set during installs so the host's kernel-install hooks do not fire.
pub const KERNEL_INSTALL_ENV: (&str, &str) = ("KERNEL_INSTALL_NOOP", "yes");

/// Installs packages into a root and reports what is installed there.
pub trait PackageInstaller {
    /// Package cache location relative to the install root.
    fn cache_subdir(&self) -> &str;

    /// Install `packages` into `root` from the repositories `request` enables.
    fn install(&self, root: &Path, request: &ComposeRequest, packages: &[String]) -> Result<()>;

    /// Names of all packages installed in `root`, sorted.
    fn installed_packages(&self, root: &Path) -> Result<Vec<String>>;
}

/// The rpm front-ends this crate knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PackageManager {
    #[default]
    Yum,
    Dnf,
}

impl PackageManager {
    pub fn program(self) -> &'static str {
        match self {
            Self::Yum => "yum",
            Self::Dnf => "dnf",
        }
    }

    pub fn cache_subdir(self) -> &'static str {
        match self {
            Self::Yum => "var/cache/yum",
            Self::Dnf => "var/cache/dnf",
        }
    }
}

impl fmt::Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program())
    }
}

impl FromStr for PackageManager {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "yum" => Ok(Self::Yum),
            "dnf" => Ok(Self::Dnf),
            other => Err(format!("unsupported package manager '{}'", other)),
        }
    }
}

/// Drives `yum` or `dnf` with `--installroot`.
#[derive(Debug, Clone)]
pub struct YumInstaller {
    manager: PackageManager,
    program: String,
    rpm_program: String,
}

impl Default for YumInstaller {
    fn default() -> Self {
        Self::new(PackageManager::default())
    }
}

impl YumInstaller {
    pub fn new(manager: PackageManager) -> Self {
        Self {
            manager,
            program: manager.program().to_string(),
            rpm_program: "rpm".to_string(),
        }
    }

    /// Run this executable instead of the manager found on `PATH`.
    pub fn program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Query the package database with this executable instead of `rpm`.
    pub fn rpm_program(mut self, program: impl Into<String>) -> Self {
        self.rpm_program = program.into();
        self
    }

    /// Arguments for one install transaction.
    ///
    /// All configured repositories are disabled; only those the request
    /// names are enabled. Packages are kept in the cache for the lookaside.
    pub fn install_args(root: &Path, request: &ComposeRequest, packages: &[String]) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            format!("--releasever={}", request.os_version()),
            "--nogpg".to_string(),
            "--setopt=keepcache=1".to_string(),
            format!("--installroot={}", root.display()),
            "--disablerepo=*".to_string(),
        ];
        args.extend(
            request
                .enable_repos()
                .iter()
                .map(|repo| format!("--enablerepo={}", repo)),
        );
        args.push("install".to_string());
        args.extend(packages.iter().cloned());
        args
    }
}

impl PackageInstaller for YumInstaller {
    fn cache_subdir(&self) -> &str {
        self.manager.cache_subdir()
    }

    fn install(&self, root: &Path, request: &ComposeRequest, packages: &[String]) -> Result<()> {
        let (key, value) = KERNEL_INSTALL_ENV;
        Cmd::new(&self.program)
            .args(Self::install_args(root, request, packages))
            .env(key, value)
            .error_msg(format!("{} install failed", self.manager))
            .run_interactive()
            .map(|_| ())
            .map_err(|source| ComposeError::PackageInstall { source })
    }

    fn installed_packages(&self, root: &Path) -> Result<Vec<String>> {
        let dbpath = root.join("var/lib/rpm");
        let result = Cmd::new(&self.rpm_program)
            .arg("-qa")
            .arg(format!("--dbpath={}", dbpath.display()))
            .error_msg("rpm -qa failed")
            .run()
            .map_err(|source| ComposeError::PackageQuery {
                dbpath: dbpath.clone(),
                source,
            })?;
        let mut packages: Vec<String> = result
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect();
        packages.sort();
        Ok(packages)
    }
}

/// The base set as owned strings.
pub fn base_packages() -> Vec<String> {
    BASE_PACKAGES.iter().map(|p| p.to_string()).collect()
}
