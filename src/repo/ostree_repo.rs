//! OSTree repository through libostree.
//!
//! Each [`Repository`] step maps onto one libostree call: the final root
//! is written into a mutable tree, the tree into a commit, and the ref is
//! staged with `transaction_set_ref` so it only moves when the transaction
//! commits. This is the repository `ostree admin deploy` reads from.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use ostree::gio;
use ostree::glib;
use ostree::prelude::*;

use super::{detect_backend, CommitSummary, RepoBackend, Repository, StorageError, StorageResult};

/// Mode used when the repository does not exist yet. Deployable system
/// repositories are `bare`.
pub const DEFAULT_MODE: ostree::RepoMode = ostree::RepoMode::Bare;

fn failed(action: &'static str) -> impl FnOnce(glib::Error) -> StorageError {
    move |source| StorageError::Ostree { action, source }
}

/// An OSTree repository opened from a path.
pub struct OstreeRepo {
    path: PathBuf,
    repo: ostree::Repo,
    in_transaction: bool,
    mtree: Option<ostree::MutableTree>,
    /// Root written by the last `write_tree`, keyed by its contents checksum.
    root: Option<(String, ostree::RepoFile)>,
}

impl OstreeRepo {
    /// Open an existing repository.
    pub fn open(path: impl Into<PathBuf>) -> StorageResult<Self> {
        let path = path.into();
        match detect_backend(&path)? {
            None => return Err(StorageError::NotFound { path }),
            Some(RepoBackend::Local) => {
                return Err(StorageError::WrongBackend {
                    path,
                    expected: RepoBackend::Ostree,
                    found: RepoBackend::Local,
                })
            }
            Some(RepoBackend::Ostree) => {}
        }
        let repo = ostree::Repo::new_for_path(&path);
        repo.open(gio::Cancellable::NONE)
            .map_err(failed("failed to open repository"))?;
        debug!("Opened OSTree repository {}", path.display());
        Ok(Self::wrap(path, repo))
    }

    /// Create a repository in `mode` at `path`.
    pub fn create(path: impl Into<PathBuf>, mode: ostree::RepoMode) -> StorageResult<Self> {
        let path = path.into();
        fs::create_dir_all(&path).map_err(|e| StorageError::io("failed to create", &path, e))?;
        let repo = ostree::Repo::new_for_path(&path);
        repo.create(mode, gio::Cancellable::NONE)
            .map_err(failed("failed to create repository"))?;
        info!("Initialized OSTree repository at {}", path.display());
        Ok(Self::wrap(path, repo))
    }

    pub fn open_or_create(path: impl Into<PathBuf>) -> StorageResult<Self> {
        let path = path.into();
        match detect_backend(&path)? {
            None => Self::create(path, DEFAULT_MODE),
            Some(_) => Self::open(path),
        }
    }

    fn wrap(path: PathBuf, repo: ostree::Repo) -> Self {
        Self {
            path,
            repo,
            in_transaction: false,
            mtree: None,
            root: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn require_transaction(&self) -> StorageResult<()> {
        if self.in_transaction {
            Ok(())
        } else {
            Err(StorageError::NoTransaction)
        }
    }

    fn end_transaction(&mut self) {
        self.in_transaction = false;
        self.mtree = None;
        self.root = None;
    }

    /// All local refs, sorted.
    pub fn list_refs(&self) -> StorageResult<Vec<String>> {
        let refs = self
            .repo
            .list_refs(None, gio::Cancellable::NONE)
            .map_err(failed("failed to list refs"))?;
        let mut names: Vec<String> = refs.into_keys().collect();
        names.sort();
        Ok(names)
    }

    /// `commit` and its ancestors, newest first. Stops quietly at a parent
    /// that is not present locally.
    pub fn log(&self, commit: &str) -> StorageResult<Vec<CommitSummary>> {
        let mut entries = Vec::new();
        let mut next = Some(commit.to_string());
        while let Some(id) = next {
            let variant = match self.repo.load_commit(&id) {
                Ok((variant, _)) => variant,
                Err(e) if !entries.is_empty() => {
                    debug!("History ends at {}: {}", id, e);
                    break;
                }
                Err(source) => {
                    return Err(StorageError::Ostree {
                        action: "failed to load commit",
                        source,
                    })
                }
            };
            let parent = ostree::commit_get_parent(&variant).map(|p| p.to_string());
            // (a{sv}aya(say)sstayay): subject is field 3.
            let subject = variant
                .child_value(3)
                .str()
                .map(String::from)
                .unwrap_or_default();
            entries.push(CommitSummary {
                id,
                parent: parent.clone(),
                subject,
                timestamp: ostree::commit_get_timestamp(&variant),
            });
            next = parent;
        }
        Ok(entries)
    }
}

impl Repository for OstreeRepo {
    fn prepare_transaction(&mut self) -> StorageResult<()> {
        if self.in_transaction {
            return Err(StorageError::TransactionActive);
        }
        let resumed = self
            .repo
            .prepare_transaction(gio::Cancellable::NONE)
            .map_err(failed("failed to prepare transaction"))?;
        if resumed {
            info!("Resuming interrupted transaction in {}", self.path.display());
        }
        self.in_transaction = true;
        Ok(())
    }

    fn write_directory(&mut self, root: &Path) -> StorageResult<()> {
        self.require_transaction()?;
        let mtree = ostree::MutableTree::new();
        let dir = gio::File::for_path(root);
        let modifier =
            ostree::RepoCommitModifier::new(ostree::RepoCommitModifierFlags::empty(), None);
        self.repo
            .write_directory_to_mtree(&dir, &mtree, Some(&modifier), gio::Cancellable::NONE)
            .map_err(failed("failed to write directory"))?;
        self.mtree = Some(mtree);
        Ok(())
    }

    fn resolve_ref(&self, refname: &str) -> StorageResult<Option<String>> {
        let rev = self
            .repo
            .resolve_rev(refname, true)
            .map_err(failed("failed to resolve ref"))?;
        Ok(rev.map(|r| r.to_string()))
    }

    fn write_tree(&mut self) -> StorageResult<String> {
        self.require_transaction()?;
        let mtree = self.mtree.take().ok_or(StorageError::NothingStaged)?;
        let file = self
            .repo
            .write_mtree(&mtree, gio::Cancellable::NONE)
            .map_err(failed("failed to write tree"))?;
        let root = file
            .downcast::<ostree::RepoFile>()
            .map_err(|_| StorageError::Backend("write_mtree did not return a repository file".into()))?;
        let id = root
            .tree_get_contents_checksum()
            .map(|c| c.to_string())
            .ok_or_else(|| StorageError::Backend("written tree has no contents checksum".into()))?;
        self.root = Some((id.clone(), root));
        Ok(id)
    }

    fn write_commit(
        &mut self,
        parent: Option<&str>,
        subject: &str,
        body: &str,
        tree: &str,
    ) -> StorageResult<String> {
        self.require_transaction()?;
        let root = match &self.root {
            Some((id, root)) if id == tree => root,
            _ => {
                return Err(StorageError::MissingObject {
                    id: tree.to_string(),
                })
            }
        };
        let commit = self
            .repo
            .write_commit(
                parent,
                Some(subject),
                Some(body),
                None,
                root,
                gio::Cancellable::NONE,
            )
            .map_err(failed("failed to write commit"))?;
        Ok(commit.to_string())
    }

    fn sign_commit(&mut self, commit: &str, key_id: &str) -> StorageResult<()> {
        self.repo
            .sign_commit(commit, key_id, None, gio::Cancellable::NONE)
            .map_err(failed("failed to sign commit"))
    }

    fn set_ref(&mut self, refname: &str, commit: &str) -> StorageResult<()> {
        self.require_transaction()?;
        self.repo.transaction_set_ref(None, refname, Some(commit));
        Ok(())
    }

    fn commit_transaction(&mut self) -> StorageResult<()> {
        self.require_transaction()?;
        let result = self
            .repo
            .commit_transaction(gio::Cancellable::NONE)
            .map(|_| ())
            .map_err(failed("failed to commit transaction"));
        self.end_transaction();
        result
    }

    fn abort_transaction(&mut self) -> StorageResult<()> {
        self.end_transaction();
        self.repo
            .abort_transaction(gio::Cancellable::NONE)
            .map_err(failed("failed to abort transaction"))
    }
}
