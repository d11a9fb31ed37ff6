//! Shared test utilities for treecompose tests.
//!
//! The fakes stand in for the package manager, depmod/dracut and the
//! repository so the pipeline runs without root, network or chroot.
#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use treecompose::boot::ArtifactGenerator;
use treecompose::error::{ComposeError, Result};
use treecompose::installer::PackageInstaller;
use treecompose::process::CommandError;
use treecompose::repo::{LocalRepo, Repository, StorageError, StorageResult};
use treecompose::request::ComposeRequest;
use treecompose::workspace::WorkspaceLayout;

pub const KERNEL_VERSION: &str = "5.10.0";
pub const CACHE_SUBDIR: &str = "var/cache/yum";

pub const NSSWITCH: &str = "\
passwd:     files sss
shadow:     files
group:      files sss
hosts:      files dns myhostname
";

/// Test environment with a temporary work directory and repository.
pub struct TestEnv {
    /// Temporary directory (kept alive for lifetime of TestEnv)
    pub _temp_dir: TempDir,
    pub work_dir: PathBuf,
    pub repo_path: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let work_dir = temp_dir.path().join("work");
        let repo_path = temp_dir.path().join("repo");
        Self {
            _temp_dir: temp_dir,
            work_dir,
            repo_path,
        }
    }

    pub fn layout(&self) -> WorkspaceLayout {
        WorkspaceLayout::new(&self.work_dir, CACHE_SUBDIR)
    }

    pub fn repo(&self) -> LocalRepo {
        LocalRepo::open_or_init(&self.repo_path).expect("Failed to open repo")
    }
}

/// Compose request for `example/1/<branch>`.
pub fn request(branch: &str, packages: &[&str]) -> ComposeRequest {
    ComposeRequest::builder("example", "1", branch)
        .packages(packages.iter().copied())
        .build()
        .expect("valid request")
}

fn write(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("Failed to create parent dir");
    }
    fs::write(path, content).expect("Failed to write file");
}

fn append_line(path: &Path, line: &str) {
    let mut content = fs::read_to_string(path).unwrap_or_default();
    content.push_str(line);
    content.push('\n');
    write(path, &content);
}

/// Lay out what the base packages leave in a fresh install root.
pub fn populate_base(root: &Path) {
    for dir in ["usr/bin", "usr/sbin", "usr/lib", "usr/lib64", "usr/local/bin", "var/log", "tmp"] {
        fs::create_dir_all(root.join(dir)).expect("Failed to create dir");
    }
    for (name, target) in [
        ("bin", "usr/bin"),
        ("sbin", "usr/sbin"),
        ("lib", "usr/lib"),
        ("lib64", "usr/lib64"),
    ] {
        if !root.join(name).is_symlink() {
            symlink(target, root.join(name)).expect("Failed to create symlink");
        }
    }
    write(&root.join("usr/lib64/libc.so.6"), "libc");
    write(&root.join("usr/lib64/libnss_altfiles.so.2"), "altfiles");
    write(&root.join("etc/nsswitch.conf"), NSSWITCH);
    write(&root.join("etc/passwd"), "root:x:0:0:root:/root:/bin/bash\n");
    write(&root.join("var/log/yum.log"), "installed base\n");
}

/// Drop a kernel (and a scriptlet-generated initramfs to be replaced).
pub fn populate_kernel(root: &Path) {
    write(
        &root.join(format!("boot/vmlinuz-{}", KERNEL_VERSION)),
        "kernel image bytes",
    );
    write(
        &root.join(format!("boot/initramfs-{}.img", KERNEL_VERSION)),
        "scriptlet initramfs",
    );
    write(&root.join("boot/loader/entries/old.conf"), "title old\n");
    write(
        &root.join(format!("usr/lib/modules/{}/vmlinuz", KERNEL_VERSION)),
        "kernel image bytes",
    );
}

/// Package manager fake: writes files instead of installing rpms.
#[derive(Default)]
pub struct FakeInstaller {
    /// Package lists of each install call, in order.
    pub installs: RefCell<Vec<Vec<String>>>,
    /// Whether the first install found its packages already cached.
    pub saw_warm_cache: Cell<bool>,
    /// Whether altfiles was enabled when the requested packages went in.
    pub nss_patched_before_packages: Cell<Option<bool>>,
    /// Exit code to fail the requested-package install with.
    pub fail_packages_with: Option<i32>,
}

impl PackageInstaller for FakeInstaller {
    fn cache_subdir(&self) -> &str {
        CACHE_SUBDIR
    }

    fn install(&self, root: &Path, _request: &ComposeRequest, packages: &[String]) -> Result<()> {
        let first = self.installs.borrow().is_empty();
        if !first {
            if let Some(code) = self.fail_packages_with {
                return Err(ComposeError::PackageInstall {
                    source: CommandError::Exit {
                        program: "yum".into(),
                        prefix: "yum install failed".into(),
                        code,
                        stderr: "No package matches".into(),
                    },
                });
            }
        }

        let cache = root.join(CACHE_SUBDIR).join("packages");
        for pkg in packages {
            let cached = cache.join(format!("{}.rpm", pkg));
            if cached.exists() {
                if first {
                    self.saw_warm_cache.set(true);
                }
            } else {
                write(&cached, pkg);
            }
        }

        if first {
            populate_base(root);
        } else {
            let nss = fs::read_to_string(root.join("etc/nsswitch.conf")).unwrap_or_default();
            self.nss_patched_before_packages
                .set(Some(nss.contains("files altfiles")));
            populate_kernel(root);
            for pkg in packages {
                write(&root.join(format!("usr/share/{}/README", pkg)), pkg);
            }
            append_line(&root.join("var/log/yum.log"), "installed packages");
        }

        for pkg in packages {
            append_line(&root.join("var/lib/rpm/Packages"), pkg);
        }
        self.installs.borrow_mut().push(packages.to_vec());
        Ok(())
    }

    fn installed_packages(&self, root: &Path) -> Result<Vec<String>> {
        let db = root.join("var/lib/rpm/Packages");
        let content = fs::read_to_string(&db).map_err(|source| ComposeError::Io {
            action: "failed to read",
            path: db,
            source,
        })?;
        let mut packages: Vec<String> = content.lines().map(String::from).collect();
        packages.sort();
        packages.dedup();
        Ok(packages)
    }
}

/// depmod/dracut fake: writes the files they would produce.
#[derive(Default)]
pub struct FakeGenerator {
    pub fail_dracut: bool,
    /// Generate nothing but report success.
    pub produce_nothing: bool,
}

impl ArtifactGenerator for FakeGenerator {
    fn update_module_deps(&self, root: &Path, kver: &str) -> Result<()> {
        write(
            &root.join(format!("usr/lib/modules/{}/modules.dep", kver)),
            "",
        );
        Ok(())
    }

    fn generate_initramfs(&self, root: &Path, kver: &str, output: &str) -> Result<()> {
        if self.fail_dracut {
            return Err(ComposeError::GeneratorFailed {
                step: "dracut",
                source: CommandError::Exit {
                    program: "chroot".into(),
                    prefix: format!("dracut {} failed", kver),
                    code: 1,
                    stderr: String::new(),
                },
            });
        }
        if self.produce_nothing {
            return Ok(());
        }
        let machine_id = fs::read_to_string(root.join("etc/machine-id")).unwrap_or_default();
        write(
            &root.join(output.trim_start_matches('/')),
            &format!("initramfs for {} on {}", kver, machine_id.trim()),
        );
        write(&root.join("var/log/dracut.log"), "dracut ran\n");
        Ok(())
    }
}

/// Repository wrapper that records calls and can fail at one step.
pub struct RecordingRepo {
    pub inner: LocalRepo,
    pub calls: Vec<&'static str>,
    pub fail_at: Option<&'static str>,
}

impl RecordingRepo {
    pub fn new(inner: LocalRepo) -> Self {
        Self {
            inner,
            calls: Vec::new(),
            fail_at: None,
        }
    }

    pub fn failing_at(inner: LocalRepo, step: &'static str) -> Self {
        Self {
            fail_at: Some(step),
            ..Self::new(inner)
        }
    }

    fn step(&mut self, name: &'static str) -> StorageResult<()> {
        self.calls.push(name);
        if self.fail_at == Some(name) {
            return Err(StorageError::Backend(format!("simulated {} failure", name)));
        }
        Ok(())
    }
}

impl Repository for RecordingRepo {
    fn prepare_transaction(&mut self) -> StorageResult<()> {
        self.step("prepare_transaction")?;
        self.inner.prepare_transaction()
    }

    fn write_directory(&mut self, root: &Path) -> StorageResult<()> {
        self.step("write_directory")?;
        self.inner.write_directory(root)
    }

    fn resolve_ref(&self, refname: &str) -> StorageResult<Option<String>> {
        self.inner.resolve_ref(refname)
    }

    fn write_tree(&mut self) -> StorageResult<String> {
        self.step("write_tree")?;
        self.inner.write_tree()
    }

    fn write_commit(
        &mut self,
        parent: Option<&str>,
        subject: &str,
        body: &str,
        tree: &str,
    ) -> StorageResult<String> {
        self.step("write_commit")?;
        self.inner.write_commit(parent, subject, body, tree)
    }

    fn sign_commit(&mut self, commit: &str, key_id: &str) -> StorageResult<()> {
        self.step("sign_commit")?;
        self.inner.sign_commit(commit, key_id)
    }

    fn set_ref(&mut self, refname: &str, commit: &str) -> StorageResult<()> {
        self.step("set_ref")?;
        self.inner.set_ref(refname, commit)
    }

    fn commit_transaction(&mut self) -> StorageResult<()> {
        self.step("commit_transaction")?;
        self.inner.commit_transaction()
    }

    fn abort_transaction(&mut self) -> StorageResult<()> {
        self.calls.push("abort_transaction");
        self.inner.abort_transaction()
    }
}

/// Assert that a symlink exists and points to the expected target.
pub fn assert_symlink(path: &Path, expected_target: &str) {
    assert!(
        path.is_symlink(),
        "Expected symlink at {}, but it's not a symlink",
        path.display()
    );
    let target = fs::read_link(path).expect("Failed to read symlink");
    assert_eq!(
        target.to_string_lossy(),
        expected_target,
        "Symlink {} points to wrong target",
        path.display()
    );
}

/// Names in `dir` starting with `prefix`.
pub fn names_with_prefix(dir: &Path, prefix: &str) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .expect("Failed to read dir")
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.starts_with(prefix))
        .collect();
    names.sort();
    names
}
