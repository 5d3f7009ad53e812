//! Long-running task supervision.
//!
//! [`SshDaemon::start`] keeps `sshd` in the foreground; [`supervise`] runs it
//! next to the sync loop. Both tasks are meant to run forever, so the first
//! one to return ends supervision with a labelled error. The other task is
//! left running until the process exits.

use std::convert::Infallible;
use std::ffi::OsString;
use std::future::Future;

use camino::Utf8Path;
use thiserror::Error;
use tokio::task::JoinError;
use tracing::{info, warn};

use crate::command::{CommandError, ProcessLauncher, status_text};
use crate::schedule::SchedulerError;

/// Errors ending the SSH daemon task.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SshdError {
    /// Raised when the daemon cannot be launched or awaited.
    #[error("failed to run sshd: {0}")]
    ProcessStart(#[source] CommandError),
    /// Raised whenever the daemon exits, including with status 0.
    #[error("sshd exited with status {status_text}")]
    ProcessExit {
        /// Exit code, `None` when killed by a signal.
        code: Option<i32>,
        /// Human readable exit status.
        status_text: String,
    },
}

/// Runs `sshd` in the foreground with inherited stdio.
#[derive(Clone, Debug)]
pub struct SshDaemon<L> {
    launcher: L,
    program: String,
    args: Vec<OsString>,
}

impl<L: ProcessLauncher> SshDaemon<L> {
    /// Prepares `<program> -D -e -f <config_path>`.
    pub fn new(launcher: L, program: impl Into<String>, config_path: &Utf8Path) -> Self {
        Self {
            launcher,
            program: program.into(),
            args: vec![
                OsString::from("-D"),
                OsString::from("-e"),
                OsString::from("-f"),
                OsString::from(config_path.as_str()),
            ],
        }
    }

    /// Arguments passed to the daemon.
    #[must_use]
    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    /// Starts the daemon and waits for it to exit.
    ///
    /// # Errors
    ///
    /// Always returns an error: [`SshdError::ProcessStart`] when the daemon
    /// cannot run, [`SshdError::ProcessExit`] once it terminates.
    pub async fn start(&self) -> Result<Infallible, SshdError> {
        info!(program = %self.program, "sshd started");
        let code = self
            .launcher
            .attach(&self.program, &self.args)
            .await
            .map_err(SshdError::ProcessStart)?;
        info!(code, "sshd finished");
        Err(SshdError::ProcessExit {
            code,
            status_text: status_text(code),
        })
    }
}

/// Error ending supervision, labelled by the task that returned first.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The SSH daemon task returned.
    #[error("SSHD error: {0}")]
    Sshd(#[source] SshdError),
    /// The sync loop returned.
    #[error("rclone error: {0}")]
    Rclone(#[source] SchedulerError),
    /// A task panicked or was cancelled.
    #[error("{task} task aborted: {source}")]
    Join {
        /// Task label.
        task: &'static str,
        /// Runtime join failure.
        #[source]
        source: JoinError,
    },
}

/// Spawns both tasks and returns when the first one completes.
///
/// The remaining task is detached rather than aborted.
///
/// # Errors
///
/// Always returns the [`SupervisorError`] of the first task to finish.
pub async fn supervise<S, R>(sshd: S, sync: R) -> Result<Infallible, SupervisorError>
where
    S: Future<Output = Result<Infallible, SshdError>> + Send + 'static,
    R: Future<Output = Result<Infallible, SchedulerError>> + Send + 'static,
{
    let mut sshd_task = tokio::spawn(sshd);
    let mut sync_task = tokio::spawn(sync);

    let err = tokio::select! {
        joined = &mut sshd_task => match joined {
            Ok(Ok(never)) => match never {},
            Ok(Err(err)) => SupervisorError::Sshd(err),
            Err(source) => SupervisorError::Join { task: "sshd", source },
        },
        joined = &mut sync_task => match joined {
            Ok(Ok(never)) => match never {},
            Ok(Err(err)) => SupervisorError::Rclone(err),
            Err(source) => SupervisorError::Join { task: "rclone", source },
        },
    };
    warn!(error = %err, "supervised task ended");
    Err(err)
}
