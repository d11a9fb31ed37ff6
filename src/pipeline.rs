//! The compose state machine.
//!
//! ```text
//! Init -> CacheRestored -> BaseInstalled -> NssPatched -> PackagesInstalled
//!      -> BootProcessed -> CachePersisted -> RootTransformed -> Committed
//!      -> Cleaned
//! ```
//!
//! Each transition is one component call and stages only move forward.
//! `Init` throws away install and final roots from an interrupted run; the
//! cache lookaside survives. A breakpoint stops right after its stage and
//! leaves the workspace as it is. Any error leaves the workspace in place
//! for inspection; only a committed run cleans up.

use std::fmt;

use log::{info, warn};

use crate::boot::{self, ArtifactGenerator, BootArtifactSet};
use crate::cache::CacheManager;
use crate::common::write_atomic;
use crate::error::Result;
use crate::installer::{base_packages, PackageInstaller};
use crate::nss;
use crate::repo::{commit_tree, CommitRequest, CommitResult, Repository};
use crate::request::{Breakpoint, ComposeRequest};
use crate::timing::Timer;
use crate::transform;
use crate::workspace::WorkspaceLayout;

/// Pipeline states, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ComposeStage {
    Init,
    CacheRestored,
    BaseInstalled,
    NssPatched,
    PackagesInstalled,
    BootProcessed,
    CachePersisted,
    RootTransformed,
    Committed,
    Cleaned,
}

impl ComposeStage {
    pub fn label(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::CacheRestored => "cache-restored",
            Self::BaseInstalled => "base-installed",
            Self::NssPatched => "nss-patched",
            Self::PackagesInstalled => "packages-installed",
            Self::BootProcessed => "boot-processed",
            Self::CachePersisted => "cache-persisted",
            Self::RootTransformed => "root-transformed",
            Self::Committed => "committed",
            Self::Cleaned => "cleaned",
        }
    }
}

impl fmt::Display for ComposeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Breakpoint {
    /// The stage after which this breakpoint halts.
    pub fn stage(self) -> ComposeStage {
        match self {
            Self::AfterBaseInstall => ComposeStage::BaseInstalled,
            Self::AfterPackageInstall => ComposeStage::PackagesInstalled,
            Self::AfterBootProcessing => ComposeStage::BootProcessed,
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComposeOutcome {
    /// Stopped at a breakpoint; the repository was not touched.
    Halted(Breakpoint),
    /// The tree was committed and the workspace cleaned.
    Committed {
        commit: CommitResult,
        kernel_version: String,
        boot_checksum: String,
    },
}

/// One compose run over a workspace.
pub struct ComposePipeline<'a> {
    layout: WorkspaceLayout,
    installer: &'a dyn PackageInstaller,
    generator: &'a dyn ArtifactGenerator,
    repo: &'a mut dyn Repository,
    preserve_final_root: bool,
    stage: ComposeStage,
}

impl<'a> ComposePipeline<'a> {
    pub fn new(
        layout: WorkspaceLayout,
        installer: &'a dyn PackageInstaller,
        generator: &'a dyn ArtifactGenerator,
        repo: &'a mut dyn Repository,
    ) -> Self {
        Self {
            layout,
            installer,
            generator,
            repo,
            preserve_final_root: false,
            stage: ComposeStage::Init,
        }
    }

    /// Keep the final root after a successful commit.
    pub fn preserve_final_root(mut self, preserve: bool) -> Self {
        self.preserve_final_root = preserve;
        self
    }

    pub fn layout(&self) -> &WorkspaceLayout {
        &self.layout
    }

    /// Last stage reached.
    pub fn stage(&self) -> ComposeStage {
        self.stage
    }

    fn advance(&mut self, next: ComposeStage, timer: Timer) {
        debug_assert!(next > self.stage, "{} does not follow {}", next, self.stage);
        timer.finish();
        self.stage = next;
    }

    fn halt_at(&self, request: &ComposeRequest) -> Option<Breakpoint> {
        request
            .breakpoint()
            .filter(|bp| bp.stage() == self.stage)
    }

    /// Run every stage, or up to the request's breakpoint.
    pub fn run(&mut self, request: &ComposeRequest) -> Result<ComposeOutcome> {
        let total = Timer::start("compose");
        let ws = self.layout.clone();
        let cache = CacheManager::new(&ws);
        self.stage = ComposeStage::Init;

        info!("Composing {} in {}", request.refname(), ws.work_dir.display());
        ws.reset()?;
        cache.reset_logs()?;

        let timer = Timer::start("restore package cache");
        cache.restore();
        self.advance(ComposeStage::CacheRestored, timer);

        let timer = Timer::start("install base packages");
        self.installer
            .install(&ws.install_root, request, &base_packages())?;
        self.advance(ComposeStage::BaseInstalled, timer);
        if let Some(bp) = self.halt_at(request) {
            return Ok(self.halt(bp));
        }

        let timer = Timer::start("enable altfiles");
        nss::prepare_altfiles_databases(&ws.install_root)?;
        nss::patch_nsswitch(&ws.etc_dir())?;
        self.advance(ComposeStage::NssPatched, timer);

        let timer = Timer::start("install packages");
        self.installer
            .install(&ws.install_root, request, &request.install_set())?;
        self.advance(ComposeStage::PackagesInstalled, timer);
        if let Some(bp) = self.halt_at(request) {
            return Ok(self.halt(bp));
        }

        let timer = Timer::start("regenerate initramfs");
        boot::regenerate_initramfs(&ws.install_root, &ws.logs_lookaside_dir, self.generator)?;
        self.advance(ComposeStage::BootProcessed, timer);
        if let Some(bp) = self.halt_at(request) {
            return Ok(self.halt(bp));
        }

        let timer = Timer::start("persist package cache");
        cache.persist();
        self.write_package_manifest()?;
        self.advance(ComposeStage::CachePersisted, timer);

        let timer = Timer::start("transform root");
        let artifacts = transform::transform_root(&ws.install_root, &ws.final_root)?;
        let moved = transform::stash_install_logs(&ws.install_root, &ws.logs_lookaside_dir)?;
        if moved > 0 {
            info!("Moved {} log entries to {}", moved, ws.logs_lookaside_dir.display());
        }
        self.advance(ComposeStage::RootTransformed, timer);

        let timer = Timer::start("commit");
        let commit = self.commit(request)?;
        self.advance(ComposeStage::Committed, timer);

        let timer = Timer::start("clean workspace");
        ws.teardown(self.preserve_final_root)?;
        self.advance(ComposeStage::Cleaned, timer);

        total.finish();
        Ok(committed(commit, artifacts))
    }

    fn halt(&self, breakpoint: Breakpoint) -> ComposeOutcome {
        info!(
            "Stopping at breakpoint {}; workspace left at {}",
            breakpoint,
            self.layout.work_dir.display()
        );
        ComposeOutcome::Halted(breakpoint)
    }

    fn write_package_manifest(&self) -> Result<()> {
        let packages = self.installer.installed_packages(&self.layout.install_root)?;
        let mut content = packages.join("\n");
        content.push('\n');
        write_atomic(&self.layout.manifest_file, content)?;
        info!(
            "Recorded {} installed packages in {}",
            packages.len(),
            self.layout.manifest_file.display()
        );
        Ok(())
    }

    fn commit(&mut self, request: &ComposeRequest) -> Result<CommitResult> {
        let req = CommitRequest::for_compose(request);
        info!("Committing {}", self.layout.final_root.display());
        commit_tree(&mut *self.repo, &self.layout.final_root, &req).map_err(|e| {
            warn!(
                "Commit failed; workspace kept at {}",
                self.layout.work_dir.display()
            );
            e.into()
        })
    }
}

fn committed(commit: CommitResult, artifacts: BootArtifactSet) -> ComposeOutcome {
    ComposeOutcome::Committed {
        commit,
        kernel_version: artifacts.kernel_version,
        boot_checksum: artifacts.checksum,
    }
}
