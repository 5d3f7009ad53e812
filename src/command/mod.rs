//! External command execution seams.
//!
//! Provisioning shells out to short-lived system tools (`adduser`, `chown`,
//! `ssh-keygen`, ...) through the blocking [`CommandRunner`], while the SSH
//! daemon and the mirror passes run through the async [`ProcessLauncher`].
//! Both traits exist so that tests can substitute scripted doubles.

use std::ffi::OsString;
use std::future::Future;
use std::pin::Pin;
use std::process::{Command, Stdio};

use thiserror::Error;
use tracing::debug;

/// Result of running an external command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Human readable exit status, `unknown` when the process was killed.
    #[must_use]
    pub fn status_text(&self) -> String {
        status_text(self.code)
    }
}

pub(crate) fn status_text(code: Option<i32>) -> String {
    code.map_or_else(|| String::from("unknown"), |value| value.to_string())
}

/// Errors surfaced while running external commands.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CommandError {
    /// Raised when a command cannot be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when waiting on a spawned process fails.
    #[error("failed to wait for {program}: {message}")]
    Wait {
        /// Command that was being awaited.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when a named command completes with a non-zero exit code.
    #[error("error {name}: {program} exited with status {status_text}: {stderr}")]
    Failure {
        /// Step name attached to the command.
        name: String,
        /// Program that was executed.
        program: String,
        /// Exit status as reported by the OS.
        status: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the process.
        stderr: String,
    },
}

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner {
    /// Runs `program` with the given arguments, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Spawn`] if the command cannot be started.
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, CommandError>;
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, CommandError> {
        (**self).run(program, args)
    }
}

/// Real command runner that shells out to the host operating system.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, CommandError> {
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|err| CommandError::Spawn {
                program: program.to_owned(),
                message: err.to_string(),
            })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// A command tagged with the step name reported when it fails.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NamedCommand {
    /// Step name, for example `create chroot dir`.
    pub name: String,
    /// Program to execute.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
    /// Whether arguments carry secrets and must stay out of logs.
    pub sensitive: bool,
}

impl NamedCommand {
    /// Starts a command with no arguments.
    #[must_use]
    pub fn new(name: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            sensitive: false,
        }
    }

    /// Marks the arguments as secret so they are never logged.
    #[must_use]
    pub const fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    /// Appends a single argument.
    #[must_use]
    pub fn arg(mut self, value: impl Into<OsString>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Returns a shell-like rendering for logs and assertions.
    #[must_use]
    pub fn command_line(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }

    /// Runs the command and requires a zero exit status.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Spawn`] when the program cannot be started and
    /// [`CommandError::Failure`] (tagged with the step name) when it exits
    /// unsuccessfully.
    pub fn run<R: CommandRunner + ?Sized>(&self, runner: &R) -> Result<CommandOutput, CommandError> {
        let rendered = if self.sensitive {
            format!("{} <redacted>", self.program)
        } else {
            self.command_line()
        };
        debug!(step = %self.name, command = %rendered, "running command");
        let output = runner.run(&self.program, &self.args)?;
        if output.is_success() {
            return Ok(output);
        }

        Err(CommandError::Failure {
            name: self.name.clone(),
            program: self.program.clone(),
            status: output.code,
            status_text: output.status_text(),
            stderr: output.stderr.trim().to_owned(),
        })
    }
}

/// Future returned by [`ProcessLauncher`] operations.
pub type ProcessFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, CommandError>> + Send + 'a>>;

/// Async process execution used by the long-running supervised tasks.
pub trait ProcessLauncher: Send + Sync {
    /// Runs `program` to completion and captures its output.
    fn capture<'a>(&'a self, program: &'a str, args: &'a [OsString])
    -> ProcessFuture<'a, CommandOutput>;

    /// Runs `program` in the foreground with inherited stdout and stderr,
    /// resolving with its exit code once it terminates.
    fn attach<'a>(&'a self, program: &'a str, args: &'a [OsString]) -> ProcessFuture<'a, Option<i32>>;
}

/// [`ProcessLauncher`] backed by `tokio::process`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioProcessLauncher;

impl ProcessLauncher for TokioProcessLauncher {
    fn capture<'a>(
        &'a self,
        program: &'a str,
        args: &'a [OsString],
    ) -> ProcessFuture<'a, CommandOutput> {
        Box::pin(async move {
            let output = tokio::process::Command::new(program)
                .args(args)
                .stdin(Stdio::null())
                .output()
                .await
                .map_err(|err| CommandError::Spawn {
                    program: program.to_owned(),
                    message: err.to_string(),
                })?;

            Ok(CommandOutput {
                code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        })
    }

    fn attach<'a>(&'a self, program: &'a str, args: &'a [OsString]) -> ProcessFuture<'a, Option<i32>> {
        Box::pin(async move {
            let mut child = tokio::process::Command::new(program)
                .args(args)
                .stdin(Stdio::null())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit())
                .spawn()
                .map_err(|err| CommandError::Spawn {
                    program: program.to_owned(),
                    message: err.to_string(),
                })?;
            debug!(program, pid = child.id(), "process started");

            let status = child.wait().await.map_err(|err| CommandError::Wait {
                program: program.to_owned(),
                message: err.to_string(),
            })?;
            Ok(status.code())
        })
    }
}
