//! Committing a finished tree to a content-addressed repository.
//!
//! The repository is reached through [`Repository`], one method per step of
//! the storage transaction. [`commit_tree`] drives those steps in order and
//! aborts on the first failure, so a reference either moves to the new
//! commit or stays where it was.
//!
//! Two backends implement it. [`OstreeRepo`] writes a real OSTree
//! repository through libostree and is what deployments read from.
//! [`LocalRepo`] is a self-contained store that needs no system libraries
//! and cannot be deployed.

mod local;
mod ostree_repo;

pub use local::{CommitObject, DirTree, LocalRepo, TreeEntry};
pub use ostree_repo::OstreeRepo;

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::{info, warn};
use thiserror::Error;

use crate::process::CommandError;
use crate::request::ComposeRequest;

/// Failures inside the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("no repository at {}", path.display())]
    NotFound { path: PathBuf },

    #[error("no transaction in progress")]
    NoTransaction,

    #[error("a transaction is already in progress")]
    TransactionActive,

    #[error("nothing staged; write a directory before writing a tree")]
    NothingStaged,

    #[error("object {id} is missing")]
    MissingObject { id: String },

    #[error("object {id} is malformed")]
    Malformed {
        id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid reference name '{0}'")]
    InvalidRef(String),

    #[error("file name is not valid UTF-8: {}", path.display())]
    UnsupportedName { path: PathBuf },

    #[error("signing commit {commit} failed")]
    Sign {
        commit: String,
        #[source]
        source: CommandError,
    },

    #[error("{action} {}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{} is {found} repository, expected {expected}", path.display())]
    WrongBackend {
        path: PathBuf,
        expected: RepoBackend,
        found: RepoBackend,
    },

    #[error("{action}")]
    Ostree {
        action: &'static str,
        #[source]
        source: ostree::glib::Error,
    },

    /// Failure reported by a repository implementation outside this crate.
    #[error("{0}")]
    Backend(String),
}

impl StorageError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Repository storage format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RepoBackend {
    /// OSTree repository (INI `config`).
    #[default]
    Ostree,
    /// [`LocalRepo`] store (JSON `config`).
    Local,
}

impl RepoBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ostree => "ostree",
            Self::Local => "local",
        }
    }

    /// Whether `ostree admin deploy` can read refs from this backend.
    pub fn deployable(self) -> bool {
        self == Self::Ostree
    }
}

impl fmt::Display for RepoBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RepoBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ostree" => Ok(Self::Ostree),
            "local" => Ok(Self::Local),
            other => Err(format!(
                "unknown repository backend '{}' (expected ostree or local)",
                other
            )),
        }
    }
}

/// Backend a repository `config` file belongs to. OSTree writes an INI
/// file that opens with a `[core]` group; [`LocalRepo`] writes JSON.
pub(crate) fn config_backend(content: &[u8]) -> RepoBackend {
    match content.iter().find(|b| !b.is_ascii_whitespace()) {
        Some(b'[') => RepoBackend::Ostree,
        _ => RepoBackend::Local,
    }
}

/// Backend of the repository at `path`, or `None` when there is none.
pub fn detect_backend(path: &Path) -> StorageResult<Option<RepoBackend>> {
    let config = path.join("config");
    match fs::read(&config) {
        Ok(content) => Ok(Some(config_backend(&content))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StorageError::io("failed to read", config, e)),
    }
}

/// One commit in a reference's history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitSummary {
    pub id: String,
    pub parent: Option<String>,
    pub subject: String,
    /// Seconds since the epoch.
    pub timestamp: u64,
}

/// A repository of either backend, chosen at runtime.
pub enum AnyRepo {
    Ostree(OstreeRepo),
    Local(LocalRepo),
}

impl AnyRepo {
    /// Open an existing repository, refusing one of the other backend.
    pub fn open(backend: RepoBackend, path: impl Into<PathBuf>) -> StorageResult<Self> {
        Ok(match backend {
            RepoBackend::Ostree => Self::Ostree(OstreeRepo::open(path)?),
            RepoBackend::Local => Self::Local(LocalRepo::open(path)?),
        })
    }

    pub fn open_or_create(backend: RepoBackend, path: impl Into<PathBuf>) -> StorageResult<Self> {
        Ok(match backend {
            RepoBackend::Ostree => Self::Ostree(OstreeRepo::open_or_create(path)?),
            RepoBackend::Local => Self::Local(LocalRepo::open_or_init(path)?),
        })
    }

    pub fn backend(&self) -> RepoBackend {
        match self {
            Self::Ostree(_) => RepoBackend::Ostree,
            Self::Local(_) => RepoBackend::Local,
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::Ostree(r) => r.path(),
            Self::Local(r) => r.path(),
        }
    }

    pub fn list_refs(&self) -> StorageResult<Vec<String>> {
        match self {
            Self::Ostree(r) => r.list_refs(),
            Self::Local(r) => r.list_refs(),
        }
    }

    /// `commit` and its ancestors, newest first.
    pub fn log(&self, commit: &str) -> StorageResult<Vec<CommitSummary>> {
        match self {
            Self::Ostree(r) => r.log(commit),
            Self::Local(r) => r.log(commit),
        }
    }

    fn inner(&mut self) -> &mut dyn Repository {
        match self {
            Self::Ostree(r) => r,
            Self::Local(r) => r,
        }
    }
}

impl Repository for AnyRepo {
    fn prepare_transaction(&mut self) -> StorageResult<()> {
        self.inner().prepare_transaction()
    }

    fn write_directory(&mut self, root: &Path) -> StorageResult<()> {
        self.inner().write_directory(root)
    }

    fn resolve_ref(&self, refname: &str) -> StorageResult<Option<String>> {
        match self {
            Self::Ostree(r) => r.resolve_ref(refname),
            Self::Local(r) => r.resolve_ref(refname),
        }
    }

    fn write_tree(&mut self) -> StorageResult<String> {
        self.inner().write_tree()
    }

    fn write_commit(
        &mut self,
        parent: Option<&str>,
        subject: &str,
        body: &str,
        tree: &str,
    ) -> StorageResult<String> {
        self.inner().write_commit(parent, subject, body, tree)
    }

    fn sign_commit(&mut self, commit: &str, key_id: &str) -> StorageResult<()> {
        self.inner().sign_commit(commit, key_id)
    }

    fn set_ref(&mut self, refname: &str, commit: &str) -> StorageResult<()> {
        self.inner().set_ref(refname, commit)
    }

    fn commit_transaction(&mut self) -> StorageResult<()> {
        self.inner().commit_transaction()
    }

    fn abort_transaction(&mut self) -> StorageResult<()> {
        self.inner().abort_transaction()
    }
}

/// The transaction steps a repository exposes.
///
/// Callers use [`commit_tree`] rather than invoking these directly.
pub trait Repository {
    fn prepare_transaction(&mut self) -> StorageResult<()>;

    /// Stage the contents of `root` as the working tree.
    fn write_directory(&mut self, root: &Path) -> StorageResult<()>;

    /// Commit id `refname` points at, if any.
    fn resolve_ref(&self, refname: &str) -> StorageResult<Option<String>>;

    /// Write the staged working tree; returns its id.
    fn write_tree(&mut self) -> StorageResult<String>;

    /// Write a commit object; returns its id.
    fn write_commit(
        &mut self,
        parent: Option<&str>,
        subject: &str,
        body: &str,
        tree: &str,
    ) -> StorageResult<String>;

    fn sign_commit(&mut self, commit: &str, key_id: &str) -> StorageResult<()>;

    /// Stage a reference update; visible once the transaction commits.
    fn set_ref(&mut self, refname: &str, commit: &str) -> StorageResult<()>;

    fn commit_transaction(&mut self) -> StorageResult<()>;

    fn abort_transaction(&mut self) -> StorageResult<()>;
}

/// What to record for one commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRequest {
    pub refname: String,
    pub subject: String,
    pub body: String,
    pub gpg_key: Option<String>,
}

impl CommitRequest {
    pub fn for_compose(request: &ComposeRequest) -> Self {
        Self {
            refname: request.refname(),
            subject: request.commit_subject(),
            body: request.commit_body(),
            gpg_key: request.gpg_key().map(String::from),
        }
    }
}

/// Outcome of a successful storage transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitResult {
    pub refname: String,
    /// Previous commit on the reference; `None` for the first commit.
    pub parent: Option<String>,
    pub commit: String,
}

/// Commit the tree at `root` and point `req.refname` at it.
pub fn commit_tree(
    repo: &mut dyn Repository,
    root: &Path,
    req: &CommitRequest,
) -> StorageResult<CommitResult> {
    repo.prepare_transaction()?;
    match write_and_publish(repo, root, req) {
        Ok(result) => Ok(result),
        Err(e) => {
            if let Err(abort) = repo.abort_transaction() {
                warn!("Aborting transaction also failed: {}", abort);
            }
            Err(e)
        }
    }
}

fn write_and_publish(
    repo: &mut dyn Repository,
    root: &Path,
    req: &CommitRequest,
) -> StorageResult<CommitResult> {
    repo.write_directory(root)?;
    let parent = repo.resolve_ref(&req.refname)?;
    let tree = repo.write_tree()?;
    let commit = repo.write_commit(parent.as_deref(), &req.subject, &req.body, &tree)?;
    if let Some(key) = req.gpg_key.as_deref() {
        info!("Signing {} with key {}", commit, key);
        repo.sign_commit(&commit, key)?;
    }
    repo.set_ref(&req.refname, &commit)?;
    repo.commit_transaction()?;

    info!("{} => {}", req.refname, commit);
    Ok(CommitResult {
        refname: req.refname.clone(),
        parent,
        commit,
    })
}
