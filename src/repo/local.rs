//! Directory-backed content-addressed repository.
//!
//! Layout under the repository path:
//!
//! ```text
//! config                      format version
//! objects/ab/cdef....file     file contents
//! objects/ab/cdef....dirtree  JSON directory listing
//! objects/ab/cdef....commit   JSON commit
//! refs/heads/<ref>            commit id
//! signatures/<commit>.sig     detached gpg signature
//! tmp/                        staging for atomic writes
//! ```
//!
//! Object ids are lowercase hex SHA-256 of the stored bytes. Every file is
//! written into `tmp/` and renamed into place. Reference updates stay in
//! memory until [`Repository::commit_transaction`]. Ownership and extended
//! attributes are not recorded.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use super::{config_backend, CommitSummary, RepoBackend, Repository, StorageError, StorageResult};
use crate::process::Cmd;

const CONFIG_FILE: &str = "config";
const OBJECTS_DIR: &str = "objects";
const REFS_DIR: &str = "refs/heads";
const SIGNATURES_DIR: &str = "signatures";
const TMP_DIR: &str = "tmp";
const TRANSACTION_MARKER: &str = "transaction";
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct RepoConfig {
    format_version: u32,
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TreeEntry {
    File { mode: u32, blob: String },
    Symlink { target: String },
    Dir { mode: u32, tree: String },
}

/// A directory: entry name to entry, in byte order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirTree {
    pub entries: BTreeMap<String, TreeEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitObject {
    pub parent: Option<String>,
    pub tree: String,
    pub subject: String,
    pub body: String,
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
}

#[derive(Debug, Clone, Copy)]
enum ObjectKind {
    File,
    DirTree,
    Commit,
}

impl ObjectKind {
    fn ext(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::DirTree => "dirtree",
            Self::Commit => "commit",
        }
    }
}

/// Working tree built by `write_directory`; file contents are already
/// stored, directories are not.
#[derive(Debug)]
enum Staged {
    File { mode: u32, blob: String },
    Symlink { target: String },
    Dir { mode: u32, children: BTreeMap<String, Staged> },
}

#[derive(Debug, Default)]
struct Transaction {
    staged: Option<Staged>,
    pending_refs: BTreeMap<String, String>,
}

/// Repository stored in a local directory.
#[derive(Debug)]
pub struct LocalRepo {
    path: PathBuf,
    txn: Option<Transaction>,
    tmp_counter: AtomicU64,
}

impl LocalRepo {
    /// Create the repository layout at `path` (existing ones are reused).
    pub fn init(path: impl Into<PathBuf>) -> StorageResult<Self> {
        let path = path.into();
        for dir in [OBJECTS_DIR, REFS_DIR, SIGNATURES_DIR, TMP_DIR] {
            let dir = path.join(dir);
            fs::create_dir_all(&dir).map_err(|e| StorageError::io("failed to create", &dir, e))?;
        }
        let repo = Self::at(path);
        let config = repo.path.join(CONFIG_FILE);
        if !config.is_file() {
            let content = serde_json::to_vec_pretty(&RepoConfig {
                format_version: FORMAT_VERSION,
            })
            .map_err(|source| StorageError::Malformed {
                id: CONFIG_FILE.into(),
                source,
            })?;
            repo.store(&config, &content)?;
            info!("Initialized repository at {}", repo.path.display());
        }
        Ok(repo)
    }

    /// Open an existing repository.
    pub fn open(path: impl Into<PathBuf>) -> StorageResult<Self> {
        let path = path.into();
        let config = path.join(CONFIG_FILE);
        let content = match fs::read(&config) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound { path })
            }
            Err(e) => return Err(StorageError::io("failed to read", config, e)),
        };
        if config_backend(&content) == RepoBackend::Ostree {
            return Err(StorageError::WrongBackend {
                path,
                expected: RepoBackend::Local,
                found: RepoBackend::Ostree,
            });
        }
        let parsed: RepoConfig =
            serde_json::from_slice(&content).map_err(|source| StorageError::Malformed {
                id: CONFIG_FILE.into(),
                source,
            })?;
        if parsed.format_version != FORMAT_VERSION {
            return Err(StorageError::Backend(format!(
                "unsupported repository format {} at {}",
                parsed.format_version,
                path.display()
            )));
        }
        Ok(Self::at(path))
    }

    pub fn open_or_init(path: impl Into<PathBuf>) -> StorageResult<Self> {
        let path = path.into();
        if path.join(CONFIG_FILE).is_file() {
            Self::open(path)
        } else {
            Self::init(path)
        }
    }

    fn at(path: PathBuf) -> Self {
        Self {
            path,
            txn: None,
            tmp_counter: AtomicU64::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn object_path(&self, id: &str, kind: ObjectKind) -> PathBuf {
        let (prefix, rest) = id.split_at(2usize.min(id.len()));
        self.path
            .join(OBJECTS_DIR)
            .join(prefix)
            .join(format!("{}.{}", rest, kind.ext()))
    }

    fn ref_path(&self, refname: &str) -> StorageResult<PathBuf> {
        let valid = !refname.is_empty()
            && refname.split('/').all(|part| {
                !part.is_empty()
                    && part != "."
                    && part != ".."
                    && part
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            });
        if !valid {
            return Err(StorageError::InvalidRef(refname.to_string()));
        }
        Ok(self.path.join(REFS_DIR).join(refname))
    }

    fn tmp_path(&self) -> PathBuf {
        let n = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        self.path
            .join(TMP_DIR)
            .join(format!("{}-{}.tmp", std::process::id(), n))
    }

    fn txn_mut(&mut self) -> StorageResult<&mut Transaction> {
        self.txn.as_mut().ok_or(StorageError::NoTransaction)
    }

    /// Write `content` to `dest` through `tmp/` and rename(2).
    fn store(&self, dest: &Path, content: &[u8]) -> StorageResult<()> {
        let tmp = self.tmp_path();
        let write = || -> io::Result<()> {
            let mut file = File::create(&tmp)?;
            file.write_all(content)?;
            file.sync_all()
        };
        if let Err(e) = write() {
            let _ = fs::remove_file(&tmp);
            return Err(StorageError::io("failed to write", &tmp, e));
        }
        self.publish(&tmp, dest)
    }

    fn publish(&self, tmp: &Path, dest: &Path) -> StorageResult<()> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| StorageError::io("failed to create", parent, e))?;
        }
        fs::rename(tmp, dest).map_err(|e| {
            let _ = fs::remove_file(tmp);
            StorageError::io("failed to rename into", dest, e)
        })
    }

    fn write_object(&self, kind: ObjectKind, content: &[u8]) -> StorageResult<String> {
        let id = format!("{:x}", Sha256::digest(content));
        let dest = self.object_path(&id, kind);
        if !dest.exists() {
            self.store(&dest, content)?;
        }
        Ok(id)
    }

    fn write_json<T: Serialize>(&self, kind: ObjectKind, value: &T) -> StorageResult<String> {
        let content = serde_json::to_vec(value).map_err(|source| StorageError::Malformed {
            id: kind.ext().into(),
            source,
        })?;
        self.write_object(kind, &content)
    }

    /// Copy a file into the object store while hashing it.
    fn write_file_object(&self, src: &Path) -> StorageResult<String> {
        let tmp = self.tmp_path();
        let copy = || -> io::Result<String> {
            let mut input = File::open(src)?;
            let mut output = File::create(&tmp)?;
            let mut hasher = Sha256::new();
            let mut buf = vec![0u8; 64 * 1024];
            loop {
                let n = input.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
                output.write_all(&buf[..n])?;
            }
            output.sync_all()?;
            Ok(format!("{:x}", hasher.finalize()))
        };
        let id = match copy() {
            Ok(id) => id,
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                return Err(StorageError::io("failed to store", src, e));
            }
        };
        let dest = self.object_path(&id, ObjectKind::File);
        if dest.exists() {
            let _ = fs::remove_file(&tmp);
        } else {
            self.publish(&tmp, &dest)?;
        }
        Ok(id)
    }

    fn read_object(&self, id: &str, kind: ObjectKind) -> StorageResult<Vec<u8>> {
        let well_formed = id.len() == 64 && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        if !well_formed {
            return Err(StorageError::MissingObject { id: id.to_string() });
        }
        let path = self.object_path(id, kind);
        match fs::read(&path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StorageError::MissingObject { id: id.to_string() })
            }
            Err(e) => Err(StorageError::io("failed to read", path, e)),
        }
    }

    fn read_json<T: for<'de> Deserialize<'de>>(&self, id: &str, kind: ObjectKind) -> StorageResult<T> {
        let content = self.read_object(id, kind)?;
        serde_json::from_slice(&content).map_err(|source| StorageError::Malformed {
            id: id.to_string(),
            source,
        })
    }

    pub fn read_commit(&self, id: &str) -> StorageResult<CommitObject> {
        self.read_json(id, ObjectKind::Commit)
    }

    pub fn read_tree(&self, id: &str) -> StorageResult<DirTree> {
        self.read_json(id, ObjectKind::DirTree)
    }

    pub fn read_blob(&self, id: &str) -> StorageResult<Vec<u8>> {
        self.read_object(id, ObjectKind::File)
    }

    /// Commits reachable from `commit` through parent links, newest first.
    pub fn history(&self, commit: &str) -> StorageResult<Vec<(String, CommitObject)>> {
        let mut chain = Vec::new();
        let mut next = Some(commit.to_string());
        while let Some(id) = next {
            let obj = self.read_commit(&id)?;
            next = obj.parent.clone();
            chain.push((id, obj));
        }
        Ok(chain)
    }

    pub fn log(&self, commit: &str) -> StorageResult<Vec<CommitSummary>> {
        Ok(self
            .history(commit)?
            .into_iter()
            .map(|(id, obj)| CommitSummary {
                id,
                parent: obj.parent,
                subject: obj.subject,
                timestamp: obj.timestamp,
            })
            .collect())
    }

    /// All published references, sorted.
    pub fn list_refs(&self) -> StorageResult<Vec<String>> {
        let heads = self.path.join(REFS_DIR);
        let mut refs = Vec::new();
        for entry in WalkDir::new(&heads).min_depth(1) {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(&heads).to_path_buf();
                StorageError::io("failed to walk", path, e.into())
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Ok(rel) = entry.path().strip_prefix(&heads) {
                refs.push(rel.to_string_lossy().into_owned());
            }
        }
        refs.sort();
        Ok(refs)
    }

    fn stage_dir(&self, dir: &Path) -> StorageResult<Staged> {
        let meta = fs::symlink_metadata(dir).map_err(|e| StorageError::io("failed to stat", dir, e))?;
        let mut children = BTreeMap::new();
        let entries = fs::read_dir(dir).map_err(|e| StorageError::io("failed to read", dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::io("failed to read", dir, e))?;
            let path = entry.path();
            let name = entry
                .file_name()
                .into_string()
                .map_err(|_| StorageError::UnsupportedName { path: path.clone() })?;
            if let Some(node) = self.stage_entry(&path)? {
                children.insert(name, node);
            }
        }
        Ok(Staged::Dir {
            mode: meta.permissions().mode() & 0o7777,
            children,
        })
    }

    fn stage_entry(&self, path: &Path) -> StorageResult<Option<Staged>> {
        let meta = fs::symlink_metadata(path).map_err(|e| StorageError::io("failed to stat", path, e))?;
        let file_type = meta.file_type();
        if file_type.is_symlink() {
            let target = fs::read_link(path)
                .map_err(|e| StorageError::io("failed to read link", path, e))?
                .into_os_string()
                .into_string()
                .map_err(|_| StorageError::UnsupportedName {
                    path: path.to_path_buf(),
                })?;
            Ok(Some(Staged::Symlink { target }))
        } else if file_type.is_dir() {
            self.stage_dir(path).map(Some)
        } else if file_type.is_file() {
            Ok(Some(Staged::File {
                mode: meta.permissions().mode() & 0o7777,
                blob: self.write_file_object(path)?,
            }))
        } else {
            warn!("Skipping special file {}", path.display());
            Ok(None)
        }
    }

    fn write_staged(&self, node: &Staged) -> StorageResult<TreeEntry> {
        Ok(match node {
            Staged::File { mode, blob } => TreeEntry::File {
                mode: *mode,
                blob: blob.clone(),
            },
            Staged::Symlink { target } => TreeEntry::Symlink {
                target: target.clone(),
            },
            Staged::Dir { mode, children } => {
                let mut tree = DirTree::default();
                for (name, child) in children {
                    tree.entries.insert(name.clone(), self.write_staged(child)?);
                }
                TreeEntry::Dir {
                    mode: *mode,
                    tree: self.write_json(ObjectKind::DirTree, &tree)?,
                }
            }
        })
    }

    /// Drop staging files an interrupted write left behind.
    fn clear_tmp(&self) -> StorageResult<()> {
        let tmp = self.path.join(TMP_DIR);
        let entries = match fs::read_dir(&tmp) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(StorageError::io("failed to read", tmp, e)),
        };
        let mut removed = 0;
        for entry in entries {
            let path = entry.map_err(|e| StorageError::io("failed to read", &tmp, e))?.path();
            fs::remove_file(&path).map_err(|e| StorageError::io("failed to remove", &path, e))?;
            removed += 1;
        }
        if removed > 0 {
            info!("Removed {} stale staging file(s) from {}", removed, tmp.display());
        }
        Ok(())
    }

    fn marker(&self) -> PathBuf {
        self.path.join(TRANSACTION_MARKER)
    }

    fn end_transaction(&mut self) -> StorageResult<()> {
        self.txn = None;
        let marker = self.marker();
        match fs::remove_file(&marker) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io("failed to remove", marker, e)),
        }
    }
}

impl Repository for LocalRepo {
    fn prepare_transaction(&mut self) -> StorageResult<()> {
        if self.txn.is_some() {
            return Err(StorageError::TransactionActive);
        }
        let marker = self.marker();
        if marker.exists() {
            warn!("Found stale transaction marker; previous run was interrupted");
            self.clear_tmp()?;
        }
        fs::write(&marker, std::process::id().to_string())
            .map_err(|e| StorageError::io("failed to write", &marker, e))?;
        self.txn = Some(Transaction::default());
        Ok(())
    }

    fn write_directory(&mut self, root: &Path) -> StorageResult<()> {
        if self.txn.is_none() {
            return Err(StorageError::NoTransaction);
        }
        if !root.is_dir() {
            return Err(StorageError::io(
                "not a directory:",
                root,
                io::ErrorKind::NotFound.into(),
            ));
        }
        debug!("Staging {}", root.display());
        let staged = self.stage_dir(root)?;
        self.txn_mut()?.staged = Some(staged);
        Ok(())
    }

    fn resolve_ref(&self, refname: &str) -> StorageResult<Option<String>> {
        let path = self.ref_path(refname)?;
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content.trim().to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::io("failed to read", path, e)),
        }
    }

    fn write_tree(&mut self) -> StorageResult<String> {
        let txn = self.txn.as_ref().ok_or(StorageError::NoTransaction)?;
        let staged = txn.staged.as_ref().ok_or(StorageError::NothingStaged)?;
        match self.write_staged(staged)? {
            TreeEntry::Dir { tree, .. } => Ok(tree),
            _ => Err(StorageError::NothingStaged),
        }
    }

    fn write_commit(
        &mut self,
        parent: Option<&str>,
        subject: &str,
        body: &str,
        tree: &str,
    ) -> StorageResult<String> {
        if self.txn.is_none() {
            return Err(StorageError::NoTransaction);
        }
        if let Some(parent) = parent {
            self.read_commit(parent)?;
        }
        self.read_tree(tree)?;
        let commit = CommitObject {
            parent: parent.map(String::from),
            tree: tree.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default(),
        };
        self.write_json(ObjectKind::Commit, &commit)
    }

    fn sign_commit(&mut self, commit: &str, key_id: &str) -> StorageResult<()> {
        if self.txn.is_none() {
            return Err(StorageError::NoTransaction);
        }
        self.read_commit(commit)?;
        let object = self.object_path(commit, ObjectKind::Commit);
        let tmp = self.tmp_path();
        Cmd::new("gpg")
            .args(["--batch", "--yes", "--default-key", key_id, "--detach-sign", "--output"])
            .arg_path(&tmp)
            .arg_path(&object)
            .error_msg(format!("gpg signing with key {} failed", key_id))
            .run()
            .map_err(|source| {
                let _ = fs::remove_file(&tmp);
                StorageError::Sign {
                    commit: commit.to_string(),
                    source,
                }
            })?;
        let dest = self
            .path
            .join(SIGNATURES_DIR)
            .join(format!("{}.sig", commit));
        self.publish(&tmp, &dest)
    }

    fn set_ref(&mut self, refname: &str, commit: &str) -> StorageResult<()> {
        self.ref_path(refname)?;
        self.read_commit(commit)?;
        self.txn_mut()?
            .pending_refs
            .insert(refname.to_string(), commit.to_string());
        Ok(())
    }

    fn commit_transaction(&mut self) -> StorageResult<()> {
        let txn = self.txn.take().ok_or(StorageError::NoTransaction)?;
        for (refname, commit) in &txn.pending_refs {
            let path = self.ref_path(refname)?;
            self.store(&path, format!("{}\n", commit).as_bytes())?;
            debug!("Updated {} to {}", refname, commit);
        }
        self.end_transaction()
    }

    fn abort_transaction(&mut self) -> StorageResult<()> {
        if let Some(txn) = &self.txn {
            if !txn.pending_refs.is_empty() {
                debug!("Dropping {} pending ref update(s)", txn.pending_refs.len());
            }
        }
        self.end_transaction()
    }
}
