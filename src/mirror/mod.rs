//! rclone configuration and single mirror passes.
//!
//! The mirror tool is an external collaborator: this module only writes its
//! remote definition, builds the command line for one pass and interprets
//! the exit status.

use std::ffi::OsString;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::command::{CommandError, ProcessLauncher};
use crate::system::{FilesystemPort, SystemError};

/// Name of the remote section written to `rclone.conf`.
pub const REMOTE_NAME: &str = "s3";

/// Direction of each mirror pass.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SyncMode {
    /// One-way push of the local tree to the bucket.
    Sync,
    /// Bidirectional reconciliation.
    #[default]
    Bisync,
}

impl SyncMode {
    /// Value accepted in `SYNC_MODE`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Bisync => "bisync",
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Raised when `SYNC_MODE` holds an unknown value.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("SYNC_MODE is invalid, must be 'sync' or 'bisync' (got {value:?})")]
pub struct SyncModeError {
    /// Rejected value.
    pub value: String,
}

impl FromStr for SyncMode {
    type Err = SyncModeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "sync" => Ok(Self::Sync),
            "bisync" => Ok(Self::Bisync),
            other => Err(SyncModeError {
                value: other.to_owned(),
            }),
        }
    }
}

/// Credentials and endpoint of the S3 remote.
#[derive(Clone, Eq, PartialEq)]
pub struct RcloneConf {
    /// Access key id.
    pub access_key_id: String,
    /// Secret access key.
    pub secret_access_key: String,
    /// Bucket region.
    pub region: String,
    /// S3-compatible endpoint URL.
    pub endpoint: String,
}

impl fmt::Debug for RcloneConf {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("RcloneConf")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl RcloneConf {
    /// Renders the `rclone.conf` body.
    #[must_use]
    pub fn render(&self) -> String {
        format!(
            "[{REMOTE_NAME}]\ntype = s3\nprovider = Other\naccess_key_id = {}\nsecret_access_key = {}\nregion = {}\nendpoint = {}\n",
            self.access_key_id, self.secret_access_key, self.region, self.endpoint
        )
    }
}

/// Errors raised while configuring or running the mirror tool.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum MirrorError {
    /// Raised when `rclone.conf` cannot be written.
    #[error("failed to write rclone configuration: {0}")]
    Config(#[source] SystemError),
    /// Raised when the mirror process cannot be spawned.
    #[error("failed to launch rclone: {0}")]
    Launch(#[source] CommandError),
    /// Raised when a pass exits unsuccessfully.
    #[error("rclone {mode} exited with status {status_text}: {stderr}")]
    PassFailed {
        /// Mode of the failed pass.
        mode: SyncMode,
        /// Exit code, if any.
        status: Option<i32>,
        /// Human readable exit status.
        status_text: String,
        /// Trimmed stderr of the pass.
        stderr: String,
    },
}

/// Replaces `path` with a freshly rendered configuration.
///
/// # Errors
///
/// Returns [`MirrorError::Config`] when any filesystem step fails.
pub fn write_rclone_conf<F: FilesystemPort + ?Sized>(
    filesystem: &F,
    path: &Utf8Path,
    conf: &RcloneConf,
) -> Result<(), MirrorError> {
    filesystem.remove_file(path).map_err(MirrorError::Config)?;
    if let Some(parent) = path.parent().filter(|parent| !parent.as_str().is_empty()) {
        filesystem
            .create_dir_all(parent)
            .map_err(MirrorError::Config)?;
    }
    filesystem
        .replace_file(path, &conf.render())
        .map_err(MirrorError::Config)?;
    info!(path = %path, "rclone configuration written");
    Ok(())
}

/// Future returned by [`Mirror::run_pass`].
pub type MirrorFuture<'a> = Pin<Box<dyn Future<Output = Result<(), MirrorError>> + Send + 'a>>;

/// One mirroring pass between the local tree and the bucket.
pub trait Mirror: Send + Sync {
    /// Runs a pass, requesting a full baseline resync when `resync` is set.
    fn run_pass(&self, resync: bool) -> MirrorFuture<'_>;
}

/// Where and how [`RcloneMirror`] mirrors.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RcloneTarget {
    /// `rclone` binary.
    pub rclone_bin: String,
    /// Configuration file holding the remote.
    pub config_path: Utf8PathBuf,
    /// Bucket on the remote.
    pub bucket: String,
    /// Local tree users write into.
    pub local_root: Utf8PathBuf,
    /// Pass direction.
    pub mode: SyncMode,
}

impl RcloneTarget {
    /// `s3:<bucket>/`.
    #[must_use]
    pub fn remote_path(&self) -> String {
        format!("{REMOTE_NAME}:{}/", self.bucket)
    }

    /// Arguments for one pass. Only `bisync` understands `--resync`.
    #[must_use]
    pub fn args(&self, resync: bool) -> Vec<OsString> {
        let mut args = vec![
            OsString::from("--config"),
            OsString::from(self.config_path.as_str()),
            OsString::from(self.mode.as_str()),
        ];
        match self.mode {
            SyncMode::Bisync => {
                args.push(OsString::from(self.remote_path()));
                args.push(OsString::from(self.local_root.as_str()));
                if resync {
                    args.push(OsString::from("--resync"));
                }
            }
            SyncMode::Sync => {
                args.push(OsString::from(self.local_root.as_str()));
                args.push(OsString::from(self.remote_path()));
            }
        }
        args
    }
}

/// [`Mirror`] shelling out to `rclone`.
#[derive(Clone, Debug)]
pub struct RcloneMirror<L> {
    launcher: L,
    target: RcloneTarget,
}

impl<L: ProcessLauncher> RcloneMirror<L> {
    /// Creates the mirror.
    pub const fn new(launcher: L, target: RcloneTarget) -> Self {
        Self { launcher, target }
    }

    /// Target in use.
    pub const fn target(&self) -> &RcloneTarget {
        &self.target
    }
}

impl<L: ProcessLauncher> Mirror for RcloneMirror<L> {
    fn run_pass(&self, resync: bool) -> MirrorFuture<'_> {
        Box::pin(async move {
            let args = self.target.args(resync);
            debug!(mode = %self.target.mode, resync, "running rclone pass");
            let output = self
                .launcher
                .capture(&self.target.rclone_bin, &args)
                .await
                .map_err(MirrorError::Launch)?;
            if output.is_success() {
                return Ok(());
            }
            Err(MirrorError::PassFailed {
                mode: self.target.mode,
                status: output.code,
                status_text: output.status_text(),
                stderr: output.stderr.trim().to_owned(),
            })
        })
    }
}
