//! Centralized command execution with consistent error handling.
//!
//! Every external program the compose touches (package manager, depmod,
//! dracut, rpm, gpg, ostree) goes through [`Cmd`], so each invocation is
//! logged the same way and a non-zero exit always surfaces as a
//! [`CommandError`] carrying the exit code and captured stderr.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

use log::info;
use thiserror::Error;

/// Failure to run an external program to a successful exit.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to execute '{program}'. Is it installed?")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{prefix} (exit code {code}){}", stderr_suffix(.stderr))]
    Exit {
        program: String,
        prefix: String,
        code: i32,
        stderr: String,
    },
}

impl CommandError {
    /// Exit code of the failed process, if it ran at all.
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Spawn { .. } => None,
            Self::Exit { code, .. } => Some(*code),
        }
    }
}

fn stderr_suffix(stderr: &str) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        String::new()
    } else {
        format!(":\n{}", stderr)
    }
}

/// Result of a command execution.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// Exit status of the command.
    pub status: ExitStatus,
    /// Captured stdout as a string.
    pub stdout: String,
    /// Captured stderr as a string.
    pub stderr: String,
}

impl CommandResult {
    /// Returns true if the command exited successfully.
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Get the exit code, or -1 if terminated by signal.
    pub fn code(&self) -> i32 {
        self.status.code().unwrap_or(-1)
    }

    /// Get stdout, trimmed of whitespace.
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }
}

/// Builder for configuring command execution.
pub struct Cmd {
    program: String,
    args: Vec<String>,
    envs: Vec<(OsString, OsString)>,
    /// Custom error message prefix.
    error_prefix: Option<String>,
}

impl Cmd {
    /// Create a new command builder.
    pub fn new(program: impl AsRef<str>) -> Self {
        Self {
            program: program.as_ref().to_string(),
            args: Vec::new(),
            envs: Vec::new(),
            error_prefix: None,
        }
    }

    /// Run `program` inside `root` via chroot(1).
    pub fn chroot(root: &Path, program: impl AsRef<str>) -> Self {
        Self::new("chroot").arg_path(root).arg(program)
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(arg.as_ref().to_string());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            self.args.push(arg.as_ref().to_string());
        }
        self
    }

    /// Add a path as an argument.
    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.to_string_lossy().into_owned());
        self
    }

    /// Set an environment variable for the child.
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Set a custom error message prefix.
    pub fn error_msg(mut self, msg: impl AsRef<str>) -> Self {
        self.error_prefix = Some(msg.as_ref().to_string());
        self
    }

    /// Render the invocation as a shell-like command line for logging.
    pub fn cmdline(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(quote_arg)
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        for (key, value) in &self.envs {
            cmd.env(key, value);
        }
        cmd
    }

    fn exit_error(self, code: i32, stderr: String) -> CommandError {
        let prefix = self
            .error_prefix
            .unwrap_or_else(|| format!("'{}' failed", self.program));
        CommandError::Exit {
            program: self.program,
            prefix,
            code,
            stderr,
        }
    }

    /// Run the command and capture output.
    pub fn run(self) -> Result<CommandResult, CommandError> {
        info!("Running: {}", self.cmdline());

        let output = self.command().output().map_err(|source| CommandError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        let result = CommandResult {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !result.success() {
            let code = result.code();
            return Err(self.exit_error(code, result.stderr));
        }

        Ok(result)
    }

    /// Run the command with inherited stdio (interactive/streaming).
    ///
    /// Output goes directly to the terminal, so the operator sees package
    /// manager and dracut progress (and their stderr) as it happens.
    pub fn run_interactive(self) -> Result<ExitStatus, CommandError> {
        info!("Running: {}", self.cmdline());

        let mut cmd = self.command();
        cmd.stdin(Stdio::inherit());
        cmd.stdout(Stdio::inherit());
        cmd.stderr(Stdio::inherit());

        let status = cmd.status().map_err(|source| CommandError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        if !status.success() {
            let code = status.code().unwrap_or(-1);
            return Err(self.exit_error(code, String::new()));
        }

        Ok(status)
    }
}

fn quote_arg(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%*".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Check if a program exists in PATH.
///
/// Returns the full path if found, None otherwise.
pub fn which(program: &str) -> Option<PathBuf> {
    which::which(program).ok()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_success() {
        let result = Cmd::new("echo").arg("hello").run().unwrap();
        assert!(result.success());
        assert_eq!(result.stdout_trimmed(), "hello");
    }

    #[test]
    fn test_run_failure_includes_stderr() {
        let err = Cmd::new("ls")
            .arg("/nonexistent_path_12345")
            .run()
            .unwrap_err();
        let msg = err.to_string();

        assert!(msg.contains("No such file") || msg.contains("cannot access"));
        assert!(err.code().is_some());
    }

    #[test]
    fn test_spawn_failure() {
        let err = Cmd::new("nonexistent_program_12345").run().unwrap_err();
        assert!(matches!(err, CommandError::Spawn { .. }));
        assert_eq!(err.code(), None);
    }

    #[test]
    fn test_custom_error_message() {
        let err = Cmd::new("false")
            .error_msg("Custom build step failed")
            .run()
            .unwrap_err();

        assert!(err.to_string().contains("Custom build step failed"));
        assert_eq!(err.code(), Some(1));
    }

    #[test]
    fn test_env_is_passed() {
        let result = Cmd::new("sh")
            .args(["-c", "echo $KERNEL_INSTALL_NOOP"])
            .env("KERNEL_INSTALL_NOOP", "yes")
            .run()
            .unwrap();
        assert_eq!(result.stdout_trimmed(), "yes");
    }

    #[test]
    fn test_cmdline_quotes_only_when_needed() {
        let cmd = Cmd::new("yum")
            .args(["--disablerepo=*", "install", "a package"])
            .arg("it's");
        assert_eq!(
            cmd.cmdline(),
            r"yum --disablerepo=* install 'a package' 'it'\''s'"
        );
    }

    #[test]
    fn test_chroot_prefix() {
        let cmd = Cmd::chroot(Path::new("/work/root"), "depmod").arg("5.10.0");
        assert_eq!(cmd.cmdline(), "chroot /work/root depmod 5.10.0");
    }

    #[test]
    fn test_which_exists() {
        assert!(which("sh").is_some());
        assert!(which("nonexistent_program_12345").is_none());
    }
}
