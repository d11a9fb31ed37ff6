//! Preflight checks for a compose.
//!
//! Validates host tools and the workspace before any package is installed.
//! Run with `treecompose preflight` to check everything is ready.

mod environment;
mod host_tools;
mod types;

use std::path::PathBuf;

use anyhow::{bail, Result};
use log::info;

use crate::installer::PackageManager;
use crate::repo::RepoBackend;

pub use types::{CheckResult, CheckStatus, PreflightReport};

/// What the upcoming compose needs from the host.
#[derive(Debug, Clone)]
pub struct PreflightOptions {
    pub package_manager: PackageManager,
    pub deploy: bool,
    pub sign: bool,
    pub work_dir: PathBuf,
    pub repo_path: PathBuf,
    pub repo_backend: RepoBackend,
}

/// Run all preflight checks.
pub fn run_preflight(opts: &PreflightOptions) -> PreflightReport {
    let mut checks = Vec::new();

    info!("Checking host tools...");
    checks.extend(host_tools::check_host_tools(opts));

    info!("Checking compose environment...");
    checks.extend(environment::check_compose_environment(opts));

    PreflightReport { checks }
}

/// Run preflight and bail if any checks fail.
pub fn run_preflight_or_fail(opts: &PreflightOptions) -> Result<()> {
    let report = run_preflight(opts);
    report.print();

    if !report.all_passed() {
        bail!(
            "Preflight failed: {} check(s) failed. Fix the issues above before composing.",
            report.fail_count()
        );
    }

    info!("All preflight checks passed");
    Ok(())
}
