//! External command execution for provisioning handlers.
//!
//! Provides the [`CommandRunner`] trait so the datastore's
//! `run_and_record` can be unit-tested without spawning processes.
//! Production code uses [`SystemRunner`]; tests use a queue-backed mock
//! (see `test_helpers`).

use std::path::PathBuf;
use std::process::{Command, Output};

use anyhow::{Context as _, Result};

/// An opaque command to execute: program, arguments, working directory
/// and extra environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program to invoke.
    pub program: String,
    /// Arguments, in order.
    pub args: Vec<String>,
    /// Working directory, when the command is directory-sensitive.
    pub cwd: Option<PathBuf>,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    /// A command with no arguments, cwd, or environment.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
        }
    }

    /// Append an argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Set the working directory.
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Add an environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// One-line rendering for logs and error messages.
    #[must_use]
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Result of a command execution.
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Whether the command exited with status zero.
    pub success: bool,
    /// The raw exit code, when the process exited normally.
    pub code: Option<i32>,
}

impl From<Output> for ExecResult {
    fn from(output: Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
            code: output.status.code(),
        }
    }
}

/// Abstraction over subprocess execution.
///
/// A non-zero exit is not an `Err` here; the caller decides whether
/// failure is fatal (the datastore turns it into an `Execution` error
/// and withholds the sentinel).
pub trait CommandRunner: Send + Sync + std::fmt::Debug {
    /// Execute `spec`, capturing output.
    ///
    /// # Errors
    ///
    /// Returns an error only when the process cannot be spawned.
    fn run(&self, spec: &CommandSpec) -> Result<ExecResult>;
}

/// Production [`CommandRunner`] backed by [`std::process::Command`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec) -> Result<ExecResult> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }
        for (k, v) in &spec.env {
            cmd.env(k, v);
        }
        let output = cmd
            .output()
            .with_context(|| format!("failed to execute: {}", spec.display()))?;
        Ok(ExecResult::from(output))
    }
}

/// Shared test doubles for command execution.
///
/// Kept outside `#[cfg(test)]` so integration tests under `tests/` can
/// use the same mock the unit tests do.
pub mod test_helpers {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::{CommandRunner, CommandSpec, ExecResult};

    /// A queue-backed mock runner.
    ///
    /// Responses are `(success, stdout)` pairs consumed in FIFO order;
    /// when the queue is empty every call succeeds with empty output.
    /// [`MockRunner::call_count`] reports how many commands ran, which
    /// is what the idempotence properties assert on.
    #[derive(Debug, Default)]
    pub struct MockRunner {
        responses: Mutex<VecDeque<(bool, String)>>,
        calls: AtomicUsize,
        history: Mutex<Vec<CommandSpec>>,
    }

    impl MockRunner {
        /// A mock whose every call succeeds with empty output.
        #[must_use]
        pub fn ok() -> Self {
            Self::default()
        }

        /// A mock whose first call fails with the given stderr.
        #[must_use]
        pub fn failing(stderr: &str) -> Self {
            Self::with_responses(vec![(false, stderr.to_string())])
        }

        /// A mock with an explicit FIFO response queue.
        #[must_use]
        pub fn with_responses(responses: Vec<(bool, String)>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicUsize::new(0),
                history: Mutex::new(Vec::new()),
            }
        }

        /// Total number of commands executed so far.
        #[must_use]
        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        /// The specs of every executed command, in order.
        #[must_use]
        pub fn history(&self) -> Vec<CommandSpec> {
            self.history
                .lock()
                .map(|h| h.clone())
                .unwrap_or_default()
        }
    }

    impl CommandRunner for MockRunner {
        fn run(&self, spec: &CommandSpec) -> anyhow::Result<ExecResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Ok(mut history) = self.history.lock() {
                history.push(spec.clone());
            }
            let (success, text) = self
                .responses
                .lock()
                .ok()
                .and_then(|mut q| q.pop_front())
                .unwrap_or((true, String::new()));
            Ok(ExecResult {
                stdout: if success { text.clone() } else { String::new() },
                stderr: if success { String::new() } else { text },
                success,
                code: Some(i32::from(!success)),
            })
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::test_helpers::MockRunner;
    use super::*;

    #[test]
    fn spec_display_with_args() {
        let spec = CommandSpec::new("sh").arg("-c").arg("echo hi");
        assert_eq!(spec.display(), "sh -c echo hi");
    }

    #[test]
    fn spec_display_bare_program() {
        assert_eq!(CommandSpec::new("brew").display(), "brew");
    }

    #[cfg(unix)]
    #[test]
    fn system_runner_captures_stdout() {
        let spec = CommandSpec::new("echo").arg("hello");
        let result = SystemRunner.run(&spec).unwrap();
        assert!(result.success);
        assert_eq!(result.stdout.trim(), "hello");
    }

    #[cfg(unix)]
    #[test]
    fn system_runner_reports_nonzero_exit() {
        let result = SystemRunner.run(&CommandSpec::new("false")).unwrap();
        assert!(!result.success);
        assert_eq!(result.code, Some(1));
    }

    #[test]
    fn system_runner_spawn_failure_is_err() {
        let spec = CommandSpec::new("this-program-does-not-exist-12345");
        assert!(SystemRunner.run(&spec).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn system_runner_honors_cwd_and_env() {
        let dir = tempfile::tempdir().unwrap();
        let spec = CommandSpec::new("sh")
            .arg("-c")
            .arg("pwd; printf %s \"$DODOT_TEST\"")
            .current_dir(dir.path())
            .env("DODOT_TEST", "42");
        let result = SystemRunner.run(&spec).unwrap();
        assert!(result.success);
        assert!(result.stdout.contains("42"));
    }

    #[test]
    fn mock_runner_counts_calls_and_drains_queue() {
        let runner = MockRunner::with_responses(vec![
            (true, "first".to_string()),
            (false, "boom".to_string()),
        ]);

        let a = runner.run(&CommandSpec::new("a")).unwrap();
        let b = runner.run(&CommandSpec::new("b")).unwrap();
        let c = runner.run(&CommandSpec::new("c")).unwrap();

        assert!(a.success);
        assert_eq!(a.stdout, "first");
        assert!(!b.success);
        assert_eq!(b.stderr, "boom");
        assert!(c.success, "drained queue defaults to success");
        assert_eq!(runner.call_count(), 3);
        assert_eq!(runner.history().len(), 3);
    }
}
