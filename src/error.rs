//! Error taxonomy for the compose pipeline.
//!
//! Every variant is fatal to a compose run. Idempotence guards (an already
//! relocated package database, an NSS line that already lists `altfiles`,
//! an existing compatibility symlink) never produce errors; they are skipped
//! and logged by the component that owns them.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::process::CommandError;
use crate::repo::StorageError;

/// Result alias used by the library components.
pub type Result<T> = std::result::Result<T, ComposeError>;

/// Fatal conditions raised while composing a tree.
#[derive(Debug, Error)]
pub enum ComposeError {
    /// A required configuration file is absent (e.g. `nsswitch.conf`).
    #[error("configuration file not found: {}", path.display())]
    ConfigNotFound { path: PathBuf },

    /// No `vmlinuz-*` image in the boot directory.
    #[error("no kernel image (vmlinuz-*) found in {}", dir.display())]
    MissingKernel { dir: PathBuf },

    /// More than one `vmlinuz-*` image in the boot directory.
    #[error("expected exactly one kernel image in {}, found: {}", dir.display(), found.join(", "))]
    AmbiguousKernel { dir: PathBuf, found: Vec<String> },

    /// The initramfs generator did not leave its output where expected.
    #[error("initramfs image not found at {}", path.display())]
    MissingInitramfs { path: PathBuf },

    /// A boot artifact exists but has no content.
    #[error("boot artifact is empty: {}", path.display())]
    EmptyArtifact { path: PathBuf },

    /// An artifact generator (depmod, dracut) exited non-zero.
    #[error("{step} failed")]
    GeneratorFailed {
        step: &'static str,
        #[source]
        source: CommandError,
    },

    /// The package manager exited non-zero.
    #[error("package installation failed")]
    PackageInstall {
        #[source]
        source: CommandError,
    },

    /// Listing the packages of a root's rpm database failed.
    #[error("failed to query package database {}", dbpath.display())]
    PackageQuery {
        dbpath: PathBuf,
        #[source]
        source: CommandError,
    },

    /// A root that must be freshly created already exists.
    #[error("refusing to initialize {}: path already exists", path.display())]
    AlreadyExists { path: PathBuf },

    /// Moving a subtree from one root into another failed.
    #[error("failed to move {} to {}", from.display(), to.display())]
    Relocation {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The compose request did not pass validation.
    #[error("invalid compose request: {0}")]
    InvalidRequest(String),

    /// The storage repository rejected the transaction.
    #[error("storage transaction failed")]
    StorageTransaction(#[from] StorageError),

    /// Any other filesystem failure, with the path it happened on.
    #[error("{action} {}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ComposeError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }
}

/// Attach a path and an action to a raw `io::Result`.
pub(crate) trait IoContext<T> {
    fn at(self, action: &'static str, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn at(self, action: &'static str, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| ComposeError::io(action, path, e))
    }
}
