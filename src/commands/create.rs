//! Create command - composes a tree from packages and commits it.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use log::info;

use crate::boot::ChrootGenerator;
use crate::config::Config;
use crate::deploy::{Deployer, OstreeAdminDeployer};
use crate::installer::{PackageInstaller, YumInstaller};
use crate::pipeline::{ComposeOutcome, ComposePipeline};
use crate::preflight::{self, PreflightOptions};
use crate::repo::{AnyRepo, RepoBackend};
use crate::request::{Breakpoint, ComposeRequest};
use crate::workspace::WorkspaceLayout;

/// Options of `treecompose create`.
#[derive(Debug, Clone, Default)]
pub struct CreateArgs {
    pub branch: String,
    pub packages: Vec<String>,
    pub repo: Option<PathBuf>,
    pub deploy: bool,
    pub breakpoint: Option<Breakpoint>,
    pub os: Option<String>,
    pub os_version: Option<String>,
    pub enable_repos: Vec<String>,
    pub tool_package: Option<String>,
    pub gpg_key: Option<String>,
    pub skip_preflight: bool,
}

/// Execute the create command.
pub fn cmd_create(config: &Config, args: CreateArgs) -> Result<()> {
    let (os, os_version) = config.resolve_os(args.os, args.os_version)?;
    info!("Targeting os={} version={}", os, os_version);

    let repo_path = args.repo.unwrap_or_else(|| config.repo_path.clone());
    let gpg_key = args.gpg_key.or_else(|| config.gpg_key.clone());

    let request = ComposeRequest::builder(&os, &os_version, &args.branch)
        .packages(args.packages)
        .enable_repos(args.enable_repos)
        .breakpoint(args.breakpoint)
        .deploy(args.deploy)
        .tool_package(args.tool_package)
        .gpg_key(gpg_key)
        .build()?;
    check_deploy_target(config.repo_backend, request.deploy())?;

    if !args.skip_preflight {
        preflight::run_preflight_or_fail(&PreflightOptions {
            package_manager: config.package_manager,
            deploy: request.deploy(),
            sign: request.gpg_key().is_some(),
            work_dir: config.work_dir.clone(),
            repo_path: repo_path.clone(),
            repo_backend: config.repo_backend,
        })?;
    }

    let installer = YumInstaller::new(config.package_manager);
    let generator = ChrootGenerator;
    let mut repo = AnyRepo::open_or_create(config.repo_backend, &repo_path)
        .with_context(|| format!("Failed to open repository {}", repo_path.display()))?;
    let layout = WorkspaceLayout::new(&config.work_dir, installer.cache_subdir());

    let outcome = ComposePipeline::new(layout, &installer, &generator, &mut repo)
        .preserve_final_root(config.preserve_rootfs)
        .run(&request)
        .with_context(|| format!("Compose of {} failed", request.refname()))?;

    match outcome {
        ComposeOutcome::Halted(breakpoint) => {
            println!(
                "Stopped at {}; inspect {}",
                breakpoint,
                config.work_dir.display()
            );
        }
        ComposeOutcome::Committed {
            commit,
            kernel_version,
            boot_checksum,
        } => {
            println!("{} => {}", commit.refname, commit.commit);
            if let Some(parent) = &commit.parent {
                println!("  parent: {}", parent);
            }
            println!("  kernel: {} ({})", kernel_version, boot_checksum);

            if request.deploy() {
                OstreeAdminDeployer
                    .deploy(request.os_name(), &commit.refname)
                    .with_context(|| format!("Failed to deploy {}", commit.refname))?;
            }
        }
    }
    Ok(())
}

/// `ostree admin deploy` only reads refs from an OSTree repository, so a
/// deploy against any other backend is refused before anything is built.
fn check_deploy_target(backend: RepoBackend, deploy: bool) -> Result<()> {
    if deploy && !backend.deployable() {
        bail!(
            "--deploy needs the ostree repository backend (configured: {})",
            backend
        );
    }
    Ok(())
}
