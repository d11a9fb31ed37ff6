//! CLI command handlers.
//!
//! Each submodule handles a specific CLI command:
//! - `create` - Compose a tree and commit it
//! - `manifest` - Emit passwd/group manifest fragments
//! - `show` - Display configuration and references
//! - `preflight` - Run preflight checks

mod create;
mod manifest;
mod preflight;
pub mod show;

pub use create::{cmd_create, CreateArgs};
pub use manifest::cmd_passwd_manifest;
pub use preflight::cmd_preflight;
pub use show::cmd_show;
