//! Show command - displays information.

use anyhow::{bail, Context, Result};
use std::path::Path;

use crate::config::Config;
use crate::repo::{AnyRepo, Repository};

/// Show target for the show command.
pub enum ShowTarget {
    /// Show configuration
    Config,
    /// Show the commit a reference points at and its history
    Ref(String),
}

/// Execute the show command.
pub fn cmd_show(target: ShowTarget, config: &Config, repo_path: &Path) -> Result<()> {
    match target {
        ShowTarget::Config => {
            config.print();
        }
        ShowTarget::Ref(refname) => {
            let repo = AnyRepo::open(config.repo_backend, repo_path)
                .with_context(|| format!("Failed to open repository {}", repo_path.display()))?;
            let Some(head) = repo.resolve_ref(&refname)? else {
                let known = repo.list_refs()?;
                if known.is_empty() {
                    bail!("Reference '{}' not found; repository has no references", refname);
                }
                bail!(
                    "Reference '{}' not found. Known references:\n  {}",
                    refname,
                    known.join("\n  ")
                );
            };
            let history = repo.log(&head)?;
            println!("{} => {} ({} repository)", refname, head, repo.backend());
            println!("History: {} commit(s)", history.len());
            for commit in &history {
                println!();
                println!("commit {}", commit.id);
                println!("  timestamp: {}", commit.timestamp);
                println!("  {}", commit.subject);
            }
        }
    }
    Ok(())
}
