//! Name-service-switch patching for `nss-altfiles`.
//!
//! Users and groups shipped by packages live in `/usr/lib/{passwd,group}`
//! so they update with the tree, while `/etc/{passwd,group}` stay local to
//! the machine. The `altfiles` NSS source makes glibc consult the former;
//! it must be inserted right after `files` for the `passwd` and `group`
//! databases before any package scriptlet calls `useradd`.

use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use log::{debug, info};
use regex::Regex;

use crate::common::{write_atomic, write_file_with_dirs};
use crate::error::{ComposeError, IoContext, Result};

/// File name of the NSS configuration inside an `etc` directory.
pub const NSSWITCH_CONF: &str = "nsswitch.conf";

/// The alternate-files NSS source.
pub const ALTFILES: &str = "altfiles";

/// Databases consulted through altfiles, stored under `usr/lib`.
pub const ALTFILES_DATABASES: &[&str] = &["passwd", "group"];

fn files_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(passwd|group):\s+files(\s.*)?$").expect("valid regex"))
}

/// Rewrite a single configuration line.
///
/// Returns `None` when the line is passed through verbatim.
pub fn patch_line(line: &str) -> Option<String> {
    if line.contains(ALTFILES) {
        return None;
    }
    let caps = files_line_re().captures(line)?;
    let rest = caps.get(2).map_or("", |m| m.as_str());
    Some(format!("{}: files {}{}", &caps[1], ALTFILES, rest))
}

/// Rewrite a whole `nsswitch.conf`, returning the new text and the number
/// of lines changed. Line endings and unrelated lines are preserved.
pub fn patch_nsswitch_content(content: &str) -> (String, usize) {
    let mut patched = 0;
    let mut out = String::with_capacity(content.len() + 32);
    for raw in content.split_inclusive('\n') {
        let (line, ending) = match raw.strip_suffix('\n') {
            Some(line) => (line, "\n"),
            None => (raw, ""),
        };
        match patch_line(line) {
            Some(new_line) => {
                out.push_str(&new_line);
                patched += 1;
            }
            None => out.push_str(line),
        }
        out.push_str(ending);
    }
    (out, patched)
}

/// Patch `<etc_dir>/nsswitch.conf` in place. Returns the number of lines
/// changed; zero means the file already carried `altfiles`.
pub fn patch_nsswitch(etc_dir: &Path) -> Result<usize> {
    let path = etc_dir.join(NSSWITCH_CONF);
    if !path.is_file() {
        return Err(ComposeError::ConfigNotFound { path });
    }
    let content = fs::read_to_string(&path).at("failed to read", &path)?;
    let (new_content, patched) = patch_nsswitch_content(&content);

    if patched == 0 {
        debug!("{} already uses {}", path.display(), ALTFILES);
        return Ok(0);
    }

    write_atomic(&path, new_content)?;
    info!("Enabled {} for {} line(s) in {}", ALTFILES, patched, path.display());
    Ok(patched)
}

/// Create empty `usr/lib/passwd` and `usr/lib/group` in `root` so the
/// altfiles source has something to read before packages populate it.
pub fn prepare_altfiles_databases(root: &Path) -> Result<()> {
    for db in ALTFILES_DATABASES {
        let path = root.join("usr/lib").join(db);
        if !path.exists() {
            write_file_with_dirs(&path, "")?;
        }
    }
    Ok(())
}
