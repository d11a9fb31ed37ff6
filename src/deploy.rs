//! Deploying a freshly committed reference on the build host.

use crate::process::{Cmd, CommandError};

/// Stages a committed reference as the next boot deployment.
pub trait Deployer {
    fn deploy(&self, os_name: &str, refname: &str) -> Result<(), CommandError>;
}

/// `ostree admin deploy --os=<os> <ref>`.
#[derive(Debug, Default, Clone)]
pub struct OstreeAdminDeployer;

impl OstreeAdminDeployer {
    pub fn command(os_name: &str, refname: &str) -> Cmd {
        Cmd::new("ostree")
            .args(["admin", "deploy"])
            .arg(format!("--os={}", os_name))
            .arg(refname)
            .error_msg(format!("deploying {} failed", refname))
    }
}

impl Deployer for OstreeAdminDeployer {
    fn deploy(&self, os_name: &str, refname: &str) -> Result<(), CommandError> {
        Self::command(os_name, refname).run_interactive().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deploy_command_line() {
        let cmd = OstreeAdminDeployer::command("fedora", "fedora/40/server");
        assert_eq!(
            cmd.cmdline(),
            "ostree admin deploy --os=fedora fedora/40/server"
        );
    }
}
