//! Passwd manifest command - prints a check-passwd/check-groups fragment.

use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::manifest::{fragment, read_entries, AccountDb};

/// Execute the passwd-manifest command.
pub fn cmd_passwd_manifest(files: &[PathBuf], groups: bool) -> Result<()> {
    let db = if groups {
        AccountDb::Group
    } else {
        AccountDb::Passwd
    };
    let entries = read_entries(files, db)?;
    let json = serde_json::to_string_pretty(&fragment(db, &entries))
        .context("Failed to encode manifest fragment")?;
    println!("{}", json);
    Ok(())
}
