//! Treecompose - compose immutable OS trees from packages.
//!
//! Installs packages into a scratch root, restructures it for read-only
//! deployment and commits the result to a repository reference.

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::LevelFilter;
use std::path::PathBuf;

use treecompose::commands::{self, show::ShowTarget, CreateArgs};
use treecompose::config::Config;
use treecompose::request::Breakpoint;

#[derive(Parser)]
#[command(name = "treecompose")]
#[command(about = "Compose immutable OS trees from packages")]
#[command(
    after_help = "QUICK START:\n  treecompose preflight                   Check host tools\n  treecompose create main filesystem kernel  Compose and commit\n  treecompose show ref fedora/40/main      Inspect the result"
)]
struct Cli {
    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compose a tree from packages and commit it to <os>/<version>/<BRANCH>
    Create {
        /// Branch name, the last part of the reference
        branch: String,

        /// Packages to install
        #[arg(required = true)]
        packages: Vec<String>,

        /// Repository path (default: TREECOMPOSE_REPO, else per TREECOMPOSE_REPO_BACKEND)
        #[arg(long)]
        repo: Option<PathBuf>,

        /// Deploy the new commit with `ostree admin deploy`
        #[arg(long)]
        deploy: bool,

        /// Stop after the given stage and leave the workspace for inspection
        #[arg(long, value_enum)]
        breakpoint: Option<Breakpoint>,

        /// OS name (default: ID from os-release)
        #[arg(long)]
        os: Option<String>,

        /// OS version (default: VERSION_ID from os-release)
        #[arg(long)]
        os_version: Option<String>,

        /// Enable this package repository (repeatable)
        #[arg(long = "enablerepo")]
        enable_repos: Vec<String>,

        /// Deployment tooling package, or path to a local rpm of it
        #[arg(long, default_value = "ostree")]
        local_tool_package: String,

        /// Sign the commit with this GPG key id
        #[arg(long, value_name = "KEYID")]
        gpg_sign: Option<String>,

        /// Skip host checks before composing
        #[arg(long)]
        skip_preflight: bool,
    },

    /// Print a check-passwd (or check-groups) manifest fragment
    PasswdManifest {
        /// Read group files instead of passwd files
        #[arg(long)]
        groups: bool,

        /// Account database files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Run preflight checks (verify host tools before a compose)
    Preflight {
        /// Also require the tools for --deploy
        #[arg(long)]
        deploy: bool,

        /// Fail if any checks fail (exit code 1)
        #[arg(long)]
        strict: bool,
    },

    /// Show information
    Show {
        #[command(subcommand)]
        what: ShowCommand,
    },
}

#[derive(Subcommand)]
enum ShowCommand {
    /// Show current configuration
    Config,
    /// Show the commit a reference points at and its history
    Ref {
        refname: String,

        /// Repository path (default: TREECOMPOSE_REPO, else per TREECOMPOSE_REPO_BACKEND)
        #[arg(long)]
        repo: Option<PathBuf>,
    },
}

fn init_logging(verbose: bool) {
    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info"),
    );
    if verbose {
        builder.filter_level(LevelFilter::Debug);
    }
    builder.format_timestamp(None).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load .env if present
    dotenvy::dotenv().ok();
    init_logging(cli.verbose);
    let config = Config::from_env()?;

    match cli.command {
        Commands::Create {
            branch,
            packages,
            repo,
            deploy,
            breakpoint,
            os,
            os_version,
            enable_repos,
            local_tool_package,
            gpg_sign,
            skip_preflight,
        } => commands::cmd_create(
            &config,
            CreateArgs {
                branch,
                packages,
                repo,
                deploy,
                breakpoint,
                os,
                os_version,
                enable_repos,
                tool_package: Some(local_tool_package),
                gpg_key: gpg_sign,
                skip_preflight,
            },
        )?,
        Commands::PasswdManifest { groups, files } => {
            commands::cmd_passwd_manifest(&files, groups)?
        }
        Commands::Preflight { deploy, strict } => {
            commands::cmd_preflight(&config, deploy, strict)?
        }
        Commands::Show { what } => match what {
            ShowCommand::Config => {
                commands::cmd_show(ShowTarget::Config, &config, &config.repo_path)?
            }
            ShowCommand::Ref { refname, repo } => {
                let repo = repo.unwrap_or_else(|| config.repo_path.clone());
                commands::cmd_show(ShowTarget::Ref(refname), &config, &repo)?
            }
        },
    }

    Ok(())
}
