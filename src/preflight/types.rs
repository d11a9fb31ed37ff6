//! Outcome of a host check and the report that collects them.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    /// Usable, but the compose may misbehave.
    Warn,
    /// The compose cannot succeed.
    Fail,
    /// Not needed by this compose.
    Skip,
}

impl CheckStatus {
    fn label(self) -> &'static str {
        match self {
            Self::Pass => "ok",
            Self::Warn => "warn",
            Self::Fail => "BLOCKED",
            Self::Skip => "n/a",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    /// Where the requirement was found, or what is wrong. May be empty.
    pub message: String,
}

impl CheckResult {
    fn new(name: &str, status: CheckStatus, message: &str) -> Self {
        Self {
            name: name.to_string(),
            status,
            message: message.to_string(),
        }
    }

    pub fn pass(name: &str) -> Self {
        Self::new(name, CheckStatus::Pass, "")
    }

    pub fn pass_with(name: &str, found: &str) -> Self {
        Self::new(name, CheckStatus::Pass, found)
    }

    pub fn warn(name: &str, message: &str) -> Self {
        Self::new(name, CheckStatus::Warn, message)
    }

    pub fn fail(name: &str, message: &str) -> Self {
        Self::new(name, CheckStatus::Fail, message)
    }

    pub fn skip(name: &str, reason: &str) -> Self {
        Self::new(name, CheckStatus::Skip, reason)
    }
}

impl fmt::Display for CheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<8}{}", self.status.label(), self.name)?;
        if !self.message.is_empty() {
            write!(f, " - {}", self.message)?;
        }
        Ok(())
    }
}

/// Every check run before a compose, in the order they ran.
#[derive(Debug, Clone, Default)]
pub struct PreflightReport {
    pub checks: Vec<CheckResult>,
}

impl PreflightReport {
    fn count(&self, status: CheckStatus) -> usize {
        self.checks.iter().filter(|c| c.status == status).count()
    }

    /// No check blocks the compose. Warnings and skips are fine.
    pub fn all_passed(&self) -> bool {
        self.fail_count() == 0
    }

    pub fn fail_count(&self) -> usize {
        self.count(CheckStatus::Fail)
    }

    pub fn warn_count(&self) -> usize {
        self.count(CheckStatus::Warn)
    }

    pub fn print(&self) {
        print!("{}", self);
    }
}

impl fmt::Display for PreflightReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Compose host readiness:")?;
        for check in &self.checks {
            writeln!(f, "  {}", check)?;
        }

        let applicable = self.checks.len() - self.count(CheckStatus::Skip);
        write!(
            f,
            "{} of {} applicable checks ok",
            self.count(CheckStatus::Pass),
            applicable
        )?;
        if self.warn_count() > 0 {
            write!(f, ", {} with warnings", self.warn_count())?;
        }
        if self.fail_count() > 0 {
            write!(f, "; {} blocking the compose", self.fail_count())?;
        }
        writeln!(f)
    }
}
