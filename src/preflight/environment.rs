//! Compose environment checks (privileges, workspace, repository).

use std::fs;
use std::path::Path;

use crate::process::Cmd;
use crate::repo::{detect_backend, RepoBackend};

use super::types::CheckResult;
use super::PreflightOptions;

/// Check the host can hold a compose workspace and write the repository.
pub fn check_compose_environment(opts: &PreflightOptions) -> Vec<CheckResult> {
    vec![
        check_root(),
        check_writable("work directory", &opts.work_dir),
        check_repo(&opts.repo_path, opts.repo_backend, opts.deploy),
    ]
}

/// chroot and installroot installs need root.
fn check_root() -> CheckResult {
    match Cmd::new("id").arg("-u").run() {
        Ok(out) if out.stdout_trimmed() == "0" => CheckResult::pass("root privileges"),
        Ok(out) => CheckResult::warn(
            "root privileges",
            &format!(
                "Running as uid {}; chroot and package installs need root",
                out.stdout_trimmed()
            ),
        ),
        Err(e) => CheckResult::warn("root privileges", &format!("Cannot determine uid: {}", e)),
    }
}

fn check_writable(name: &str, dir: &Path) -> CheckResult {
    if let Err(e) = fs::create_dir_all(dir) {
        return CheckResult::fail(name, &format!("Cannot create {}: {}", dir.display(), e));
    }
    let test_file = dir.join(".preflight-test");
    match fs::write(&test_file, "test") {
        Ok(_) => {
            let _ = fs::remove_file(&test_file);
            CheckResult::pass_with(name, &dir.display().to_string())
        }
        Err(e) => CheckResult::fail(name, &format!("Cannot write to {}: {}", dir.display(), e)),
    }
}

/// The repository must match the configured backend, and deploys can only
/// read from an OSTree repository.
fn check_repo(repo: &Path, backend: RepoBackend, deploy: bool) -> CheckResult {
    if deploy && !backend.deployable() {
        return CheckResult::fail(
            "repository",
            &format!(
                "--deploy needs an ostree repository; {} is configured as {}",
                repo.display(),
                backend
            ),
        );
    }
    match detect_backend(repo) {
        Ok(Some(found)) if found == backend => {
            return CheckResult::pass_with(
                "repository",
                &format!("{} ({})", repo.display(), backend),
            )
        }
        Ok(Some(found)) => {
            return CheckResult::fail(
                "repository",
                &format!(
                    "{} is {} repository but the {} backend is configured",
                    repo.display(),
                    found,
                    backend
                ),
            )
        }
        Ok(None) => {}
        Err(e) => return CheckResult::fail("repository", &e.to_string()),
    }
    match repo.ancestors().skip(1).find(|p| p.exists()) {
        Some(parent) if parent.is_dir() => CheckResult::warn(
            "repository",
            &format!("{} does not exist yet; it will be created", repo.display()),
        ),
        _ => CheckResult::fail(
            "repository",
            &format!("No usable parent directory for {}", repo.display()),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preflight::types::CheckStatus;
    use crate::repo::LocalRepo;
    use tempfile::TempDir;

    #[test]
    fn test_writable_dir() {
        let temp = TempDir::new().unwrap();
        let result = check_writable("work directory", &temp.path().join("work"));
        assert_eq!(result.status, CheckStatus::Pass);
        assert!(!temp.path().join("work/.preflight-test").exists());
    }

    #[test]
    fn test_repo_states() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("repo");
        assert_eq!(
            check_repo(&path, RepoBackend::Local, false).status,
            CheckStatus::Warn
        );
        LocalRepo::init(&path).unwrap();
        assert_eq!(
            check_repo(&path, RepoBackend::Local, false).status,
            CheckStatus::Pass
        );
    }

    #[test]
    fn test_repo_format_must_match_backend() {
        let temp = TempDir::new().unwrap();
        let local = temp.path().join("local");
        LocalRepo::init(&local).unwrap();
        let result = check_repo(&local, RepoBackend::Ostree, false);
        assert_eq!(result.status, CheckStatus::Fail);
        assert!(result.message.contains("local repository"));

        let system = temp.path().join("system");
        fs::create_dir_all(&system).unwrap();
        fs::write(system.join("config"), "[core]\nrepo_version=1\nmode=bare\n").unwrap();
        assert_eq!(
            check_repo(&system, RepoBackend::Ostree, true).status,
            CheckStatus::Pass
        );
        assert_eq!(
            check_repo(&system, RepoBackend::Local, false).status,
            CheckStatus::Fail
        );
    }

    #[test]
    fn test_deploy_needs_ostree_backend() {
        let temp = TempDir::new().unwrap();
        let result = check_repo(&temp.path().join("repo"), RepoBackend::Local, true);
        assert_eq!(result.status, CheckStatus::Fail);
        assert!(result.message.contains("--deploy"));
    }
}
