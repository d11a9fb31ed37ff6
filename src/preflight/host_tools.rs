//! Programs the compose runs on the host.

use crate::process;

use super::types::CheckResult;
use super::PreflightOptions;

/// A host program and the package that provides it.
struct Tool {
    program: &'static str,
    package: &'static str,
    used_for: &'static str,
}

impl Tool {
    fn check(&self) -> CheckResult {
        match process::which(self.program) {
            Some(path) => CheckResult::pass_with(self.program, &path.display().to_string()),
            None => CheckResult::fail(
                self.program,
                &format!(
                    "not on PATH (install {}); {}",
                    self.package, self.used_for
                ),
            ),
        }
    }
}

pub fn check_host_tools(opts: &PreflightOptions) -> Vec<CheckResult> {
    let manager = opts.package_manager.program();
    let always = [
        Tool {
            program: manager,
            package: manager,
            used_for: "installs packages into the install root",
        },
        Tool {
            program: "chroot",
            package: "coreutils",
            used_for: "runs depmod and dracut inside the install root",
        },
        Tool {
            program: "rpm",
            package: "rpm",
            used_for: "lists installed packages for the manifest",
        },
    ];
    let mut results: Vec<CheckResult> = always.iter().map(Tool::check).collect();

    let deploy = Tool {
        program: "ostree",
        package: "ostree",
        used_for: "deploys the committed tree",
    };
    results.push(if opts.deploy {
        deploy.check()
    } else {
        CheckResult::skip(deploy.program, "--deploy not given")
    });

    let sign = Tool {
        program: "gpg",
        package: "gnupg2",
        used_for: "signs commits",
    };
    results.push(if opts.sign {
        sign.check()
    } else {
        CheckResult::skip(sign.program, "commits are not signed")
    });

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::installer::PackageManager;
    use crate::preflight::types::CheckStatus;
    use crate::repo::RepoBackend;
    use std::path::PathBuf;

    fn opts(deploy: bool, sign: bool) -> PreflightOptions {
        PreflightOptions {
            package_manager: PackageManager::Dnf,
            deploy,
            sign,
            work_dir: PathBuf::from("/tmp"),
            repo_path: PathBuf::from("/tmp/repo"),
            repo_backend: RepoBackend::Ostree,
        }
    }

    #[test]
    fn test_optional_tools_are_skipped() {
        let results = check_host_tools(&opts(false, false));
        let names: Vec<_> = results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["dnf", "chroot", "rpm", "ostree", "gpg"]);
        assert_eq!(results[3].status, CheckStatus::Skip);
        assert_eq!(results[4].status, CheckStatus::Skip);
    }

    #[test]
    fn test_deploy_requires_ostree() {
        let results = check_host_tools(&opts(true, false));
        assert_ne!(results[3].status, CheckStatus::Skip);
    }

    #[test]
    fn test_missing_tool_names_its_package() {
        let tool = Tool {
            program: "treecompose-no-such-tool",
            package: "treecompose-tools",
            used_for: "nothing",
        };
        let result = tool.check();
        assert_eq!(result.status, CheckStatus::Fail);
        assert!(result.message.contains("install treecompose-tools"));
    }
}
