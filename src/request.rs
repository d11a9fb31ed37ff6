//! What to compose: OS identity, branch, packages and stopping point.

use std::fmt;

use clap::ValueEnum;

use crate::error::{ComposeError, Result};

/// Where an operator may halt the pipeline to inspect the workspace.
///
/// Variants are declared in pipeline order, so `Ord` matches stage order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum)]
pub enum Breakpoint {
    /// After the base packages needed for NSS are installed.
    #[value(alias = "post-yum-phase1")]
    AfterBaseInstall,
    /// After the requested packages are installed.
    #[value(alias = "post-yum-phase2")]
    AfterPackageInstall,
    /// After the initramfs has been regenerated.
    #[value(alias = "post-yum")]
    AfterBootProcessing,
}

impl Breakpoint {
    pub fn label(self) -> &'static str {
        match self {
            Self::AfterBaseInstall => "after-base-install",
            Self::AfterPackageInstall => "after-package-install",
            Self::AfterBootProcessing => "after-boot-processing",
        }
    }
}

impl fmt::Display for Breakpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A validated compose request. Built once, then only read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeRequest {
    os_name: String,
    os_version: String,
    branch: String,
    packages: Vec<String>,
    enable_repos: Vec<String>,
    breakpoint: Option<Breakpoint>,
    deploy: bool,
    tool_package: Option<String>,
    gpg_key: Option<String>,
}

impl ComposeRequest {
    pub fn builder(
        os_name: impl Into<String>,
        os_version: impl Into<String>,
        branch: impl Into<String>,
    ) -> ComposeRequestBuilder {
        ComposeRequestBuilder {
            os_name: os_name.into(),
            os_version: os_version.into(),
            branch: branch.into(),
            packages: Vec::new(),
            enable_repos: Vec::new(),
            breakpoint: None,
            deploy: false,
            tool_package: None,
            gpg_key: None,
        }
    }

    pub fn os_name(&self) -> &str {
        &self.os_name
    }

    pub fn os_version(&self) -> &str {
        &self.os_version
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn packages(&self) -> &[String] {
        &self.packages
    }

    pub fn enable_repos(&self) -> &[String] {
        &self.enable_repos
    }

    pub fn breakpoint(&self) -> Option<Breakpoint> {
        self.breakpoint
    }

    pub fn deploy(&self) -> bool {
        self.deploy
    }

    pub fn gpg_key(&self) -> Option<&str> {
        self.gpg_key.as_deref()
    }

    pub fn tool_package(&self) -> Option<&str> {
        self.tool_package.as_deref()
    }

    /// Packages for the second install: the requested ones plus the
    /// deployment tooling, unless it was requested already.
    pub fn install_set(&self) -> Vec<String> {
        let mut set = self.packages.clone();
        if let Some(tool) = &self.tool_package {
            if !set.contains(tool) {
                set.push(tool.clone());
            }
        }
        set
    }

    /// Reference the compose commits to: `<os>/<version>/<branch>`.
    pub fn refname(&self) -> String {
        format!("{}/{}/{}", self.os_name, self.os_version, self.branch)
    }

    /// Commit subject line.
    pub fn commit_subject(&self) -> String {
        format!("Commit of {} packages", self.packages.len())
    }

    /// Commit body: one package per line.
    pub fn commit_body(&self) -> String {
        self.packages.join("\n")
    }
}

/// Collects request fields; [`ComposeRequestBuilder::build`] validates.
#[derive(Debug, Clone)]
pub struct ComposeRequestBuilder {
    os_name: String,
    os_version: String,
    branch: String,
    packages: Vec<String>,
    enable_repos: Vec<String>,
    breakpoint: Option<Breakpoint>,
    deploy: bool,
    tool_package: Option<String>,
    gpg_key: Option<String>,
}

impl ComposeRequestBuilder {
    pub fn packages<I, S>(mut self, packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.packages.extend(packages.into_iter().map(Into::into));
        self
    }

    pub fn enable_repos<I, S>(mut self, repos: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enable_repos.extend(repos.into_iter().map(Into::into));
        self
    }

    pub fn breakpoint(mut self, breakpoint: Option<Breakpoint>) -> Self {
        self.breakpoint = breakpoint;
        self
    }

    pub fn deploy(mut self, deploy: bool) -> Self {
        self.deploy = deploy;
        self
    }

    /// Package carrying the deployment tooling, or a path to a local rpm.
    pub fn tool_package(mut self, package: Option<String>) -> Self {
        self.tool_package = package.filter(|p| !p.trim().is_empty());
        self
    }

    pub fn gpg_key(mut self, key: Option<String>) -> Self {
        self.gpg_key = key.filter(|k| !k.trim().is_empty());
        self
    }

    pub fn build(self) -> Result<ComposeRequest> {
        validate_component("OS name", &self.os_name)?;
        validate_component("OS version", &self.os_version)?;
        validate_refname("branch", &self.branch)?;

        if self.packages.is_empty() {
            return Err(invalid("at least one package is required"));
        }
        if let Some(bad) = self.packages.iter().find(|p| !is_plain_word(p)) {
            return Err(invalid(format!("invalid package name '{}'", bad)));
        }
        if let Some(bad) = self.enable_repos.iter().find(|r| !is_plain_word(r)) {
            return Err(invalid(format!("invalid repository id '{}'", bad)));
        }
        if let Some(tool) = self.tool_package.as_deref().filter(|t| !is_plain_word(t)) {
            return Err(invalid(format!("invalid tool package '{}'", tool)));
        }

        Ok(ComposeRequest {
            os_name: self.os_name,
            os_version: self.os_version,
            branch: self.branch,
            packages: self.packages,
            enable_repos: self.enable_repos,
            breakpoint: self.breakpoint,
            deploy: self.deploy,
            tool_package: self.tool_package,
            gpg_key: self.gpg_key,
        })
    }
}

fn invalid(msg: impl Into<String>) -> ComposeError {
    ComposeError::InvalidRequest(msg.into())
}

fn is_plain_word(s: &str) -> bool {
    !s.is_empty() && !s.starts_with('-') && !s.chars().any(char::is_whitespace)
}

fn is_ref_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}

fn validate_component(what: &str, value: &str) -> Result<()> {
    if value.is_empty() || value == "." || value == ".." || !value.chars().all(is_ref_char) {
        return Err(invalid(format!("invalid {} '{}'", what, value)));
    }
    Ok(())
}

/// Slash-separated components, each a valid single component.
pub(crate) fn validate_refname(what: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(invalid(format!("{} must not be empty", what)));
    }
    for part in value.split('/') {
        validate_component(what, part).map_err(|_| invalid(format!("invalid {} '{}'", what, value)))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ComposeRequestBuilder {
        ComposeRequest::builder("fedora", "40", "workstation").packages(["filesystem", "kernel"])
    }

    #[test]
    fn test_refname_and_commit_message() {
        let req = request().build().unwrap();
        assert_eq!(req.refname(), "fedora/40/workstation");
        assert_eq!(req.commit_subject(), "Commit of 2 packages");
        assert_eq!(req.commit_body(), "filesystem\nkernel");
    }

    #[test]
    fn test_branch_may_be_hierarchical() {
        let req = ComposeRequest::builder("example", "1", "os/base")
            .packages(["filesystem"])
            .build()
            .unwrap();
        assert_eq!(req.refname(), "example/1/os/base");
    }

    #[test]
    fn test_rejects_bad_requests() {
        let no_packages = ComposeRequest::builder("fedora", "40", "main").build();
        assert!(matches!(no_packages, Err(ComposeError::InvalidRequest(_))));

        for branch in ["", "a//b", "../escape", "/abs", "has space"] {
            let res = ComposeRequest::builder("fedora", "40", branch)
                .packages(["filesystem"])
                .build();
            assert!(res.is_err(), "branch {:?} should be rejected", branch);
        }

        assert!(ComposeRequest::builder("", "40", "main")
            .packages(["filesystem"])
            .build()
            .is_err());
        assert!(request().packages(["--nogpg"]).build().is_err());
        assert!(request().enable_repos(["updates testing"]).build().is_err());
    }

    #[test]
    fn test_breakpoints_follow_stage_order() {
        assert!(Breakpoint::AfterBaseInstall < Breakpoint::AfterPackageInstall);
        assert!(Breakpoint::AfterPackageInstall < Breakpoint::AfterBootProcessing);
    }

    #[test]
    fn test_breakpoint_labels_and_aliases() {
        assert_eq!(
            Breakpoint::from_str("after-package-install", false).unwrap(),
            Breakpoint::AfterPackageInstall
        );
        assert_eq!(
            Breakpoint::from_str("post-yum", false).unwrap(),
            Breakpoint::AfterBootProcessing
        );
        assert_eq!(Breakpoint::AfterBaseInstall.to_string(), "after-base-install");
    }

    #[test]
    fn test_tool_package_is_installed_but_not_counted() {
        let req = request().tool_package(Some("ostree".into())).build().unwrap();
        assert_eq!(req.install_set(), ["filesystem", "kernel", "ostree"]);
        assert_eq!(req.commit_subject(), "Commit of 2 packages");

        let req = request()
            .tool_package(Some("kernel".into()))
            .build()
            .unwrap();
        assert_eq!(req.install_set(), ["filesystem", "kernel"]);
    }

    #[test]
    fn test_blank_gpg_key_is_ignored() {
        let req = request().gpg_key(Some("  ".into())).build().unwrap();
        assert_eq!(req.gpg_key(), None);
    }
}
