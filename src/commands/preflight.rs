//! Preflight command - runs preflight checks.

use anyhow::Result;

use crate::config::Config;
use crate::preflight::{self, PreflightOptions};

/// Execute the preflight command.
pub fn cmd_preflight(config: &Config, deploy: bool, strict: bool) -> Result<()> {
    let opts = PreflightOptions {
        package_manager: config.package_manager,
        deploy,
        sign: config.gpg_key.is_some(),
        work_dir: config.work_dir.clone(),
        repo_path: config.repo_path.clone(),
        repo_backend: config.repo_backend,
    };
    if strict {
        preflight::run_preflight_or_fail(&opts)?;
    } else {
        let report = preflight::run_preflight(&opts);
        report.print();
        if !report.all_passed() {
            println!("Some checks failed. Use --strict to exit non-zero.");
        }
    }
    Ok(())
}
