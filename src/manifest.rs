//! `check-passwd` / `check-groups` manifest fragments from account databases.
//!
//! Records are colon-delimited (`name:password:id[:gid:...]`). For passwd
//! files an account whose uid equals its gid collapses to a single number;
//! otherwise it is written as `[uid, gid]`. Group files always yield the gid.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}:{line}: {reason}", path.display())]
    Record {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}

/// Which database the input files hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountDb {
    Passwd,
    Group,
}

impl AccountDb {
    /// Top-level key of the emitted fragment.
    pub fn manifest_key(self) -> &'static str {
        match self {
            Self::Passwd => "check-passwd",
            Self::Group => "check-groups",
        }
    }
}

/// A manifest entry value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum IdEntry {
    Single(u32),
    Pair(u32, u32),
}

pub type Entries = BTreeMap<String, IdEntry>;

/// Parse one database. Blank lines and `#` comments are skipped.
pub fn parse_entries(content: &str, db: AccountDb, path: &Path) -> Result<Entries, ManifestError> {
    let mut entries = Entries::new();
    for (idx, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let err = |reason: String| ManifestError::Record {
            path: path.to_path_buf(),
            line: idx + 1,
            reason,
        };
        let fields: Vec<&str> = line.split(':').collect();
        let name = fields[0];
        if name.is_empty() {
            return Err(err("empty name".into()));
        }
        let id = |n: usize| -> Result<u32, ManifestError> {
            let field = fields
                .get(n)
                .ok_or_else(|| err(format!("missing field {}", n + 1)))?;
            field
                .parse()
                .map_err(|_| err(format!("invalid id '{}'", field)))
        };

        let entry = match db {
            AccountDb::Group => IdEntry::Single(id(2)?),
            AccountDb::Passwd => {
                let (uid, gid) = (id(2)?, id(3)?);
                if uid == gid {
                    IdEntry::Single(uid)
                } else {
                    IdEntry::Pair(uid, gid)
                }
            }
        };
        entries.insert(name.to_string(), entry);
    }
    Ok(entries)
}

/// Read and merge several database files; later files win on duplicates.
pub fn read_entries<P: AsRef<Path>>(files: &[P], db: AccountDb) -> Result<Entries, ManifestError> {
    let mut all = Entries::new();
    for path in files {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ManifestError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        all.extend(parse_entries(&content, db, path)?);
    }
    Ok(all)
}

/// The fragment as a JSON value.
pub fn fragment(db: AccountDb, entries: &Entries) -> serde_json::Value {
    json!({
        db.manifest_key(): {
            "type": "data",
            "entries": entries,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PASSWD: &str = "\
alice:x:1000:1000:Alice:/home/alice:/bin/bash
bob:x:1001:1002:Bob:/home/bob:/bin/bash
";

    #[test]
    fn test_passwd_collapses_equal_ids() {
        let entries = parse_entries(PASSWD, AccountDb::Passwd, Path::new("passwd")).unwrap();
        assert_eq!(entries["alice"], IdEntry::Single(1000));
        assert_eq!(entries["bob"], IdEntry::Pair(1001, 1002));

        let value = fragment(AccountDb::Passwd, &entries);
        assert_eq!(
            value,
            json!({"check-passwd": {"type": "data", "entries": {"alice": 1000, "bob": [1001, 1002]}}})
        );
    }

    #[test]
    fn test_group_uses_gid() {
        let entries = parse_entries(
            "# comment\n\nwheel:x:10:alice,bob\nusers:x:100:\n",
            AccountDb::Group,
            Path::new("group"),
        )
        .unwrap();
        assert_eq!(
            fragment(AccountDb::Group, &entries),
            json!({"check-groups": {"type": "data", "entries": {"users": 100, "wheel": 10}}})
        );
    }

    #[test]
    fn test_bad_records_name_the_line() {
        let err = parse_entries("ok:x:1:1\nbroken:x:abc:1\n", AccountDb::Passwd, Path::new("passwd"))
            .unwrap_err();
        assert_eq!(err.to_string(), "passwd:2: invalid id 'abc'");

        let err = parse_entries("short:x\n", AccountDb::Group, Path::new("group")).unwrap_err();
        assert!(err.to_string().contains("missing field 3"));
    }

    #[test]
    fn test_read_entries_merges_files() {
        let temp = tempfile::TempDir::new().unwrap();
        let a = temp.path().join("passwd.a");
        let b = temp.path().join("passwd.b");
        fs::write(&a, "root:x:0:0::/root:/bin/sh\n").unwrap();
        fs::write(&b, "bin:x:1:1::/:/sbin/nologin\n").unwrap();

        let entries = read_entries(&[&a, &b], AccountDb::Passwd).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(read_entries(&[temp.path().join("missing")], AccountDb::Passwd).is_err());
    }
}
