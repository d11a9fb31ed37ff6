//! Treecompose library.
//!
//! Turns a package list into an immutable OS tree: installs packages into
//! a scratch root, enables `altfiles` for the account databases,
//! regenerates the initramfs, restructures the root into the `usr`/`var`
//! split and commits it to a content-addressed repository.
//!
//! The CLI in `main.rs` is a thin layer over [`commands`].

pub mod boot;
pub mod cache;
pub mod commands;
pub mod common;
pub mod config;
pub mod deploy;
pub mod error;
pub mod installer;
pub mod manifest;
pub mod nss;
pub mod pipeline;
pub mod preflight;
pub mod process;
pub mod repo;
pub mod request;
pub mod skeleton;
pub mod timing;
pub mod transform;
pub mod workspace;

pub use error::{ComposeError, Result};
pub use pipeline::{ComposeOutcome, ComposePipeline, ComposeStage};
pub use request::{Breakpoint, ComposeRequest};
pub use workspace::WorkspaceLayout;
