//! Startup orchestration for each CLI operation.
//!
//! Provisioning is synchronous and fully completes before the supervised
//! phase starts. The host-facing entry points ([`serve`], [`reset`],
//! [`sync_once`]) only wire real ports into the generic helpers, which are
//! what the tests drive.

use std::convert::Infallible;

use camino::Utf8Path;
use thiserror::Error;
use tracing::info;

use crate::command::{ProcessCommandRunner, TokioProcessLauncher};
use crate::config::{ConfigError, RuntimeConfig, S3Config, Settings, SyncSettings};
use crate::mirror::{Mirror, MirrorError, RcloneConf, RcloneMirror, write_rclone_conf};
use crate::provision::{ProvisionError, Provisioner, ResetReport};
use crate::schedule::SyncScheduler;
use crate::supervise::{SshDaemon, SupervisorError, supervise};
use crate::system::{AccountsPort, FilesystemPort, HostFilesystem, ShellAccounts, SystemError};
use crate::users::UserSpec;

/// Errors surfaced to the binary, one variant per failing phase.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration was missing or invalid; nothing was mutated.
    #[error("invalid configuration: {0}")]
    Validation(#[from] ConfigError),
    /// Provisioning stopped part way.
    #[error("error setting up SFTP: {0}")]
    Provision(#[from] ProvisionError),
    /// The provisioned marker could not be inspected.
    #[error("error checking provisioned marker: {0}")]
    Marker(#[source] SystemError),
    /// The mirror could not be configured or a one-off pass failed.
    #[error("error running rclone: {0}")]
    Mirror(#[from] MirrorError),
    /// A supervised task ended.
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
}

/// What [`prepare_host`] did.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PrepareOutcome {
    /// The marker was present and skipping was enabled.
    AlreadyProvisioned,
    /// Host state was reset and rebuilt for this many users.
    Provisioned {
        /// Number of accounts provisioned.
        users: usize,
    },
}

/// Resets and re-applies provisioning, unless `skip_if_provisioned` is set
/// and a previous run left its marker.
///
/// # Errors
///
/// Returns [`AppError::Marker`] when the marker cannot be inspected and
/// [`AppError::Provision`] when applying fails.
pub fn prepare_host<A: AccountsPort, F: FilesystemPort>(
    provisioner: &mut Provisioner<A, F>,
    users: &[UserSpec],
    skip_if_provisioned: bool,
) -> Result<PrepareOutcome, AppError> {
    if skip_if_provisioned && provisioner.is_provisioned().map_err(AppError::Marker)? {
        info!(
            marker = %provisioner.layout().marker_path,
            "already provisioned, skipping setup"
        );
        return Ok(PrepareOutcome::AlreadyProvisioned);
    }

    provisioner.reset();
    provisioner.apply(users)?;
    info!(users = users.len(), "SFTP setup complete");
    Ok(PrepareOutcome::Provisioned { users: users.len() })
}

/// Writes the rclone configuration and runs a single pass.
///
/// # Errors
///
/// Returns [`AppError::Mirror`] when the configuration cannot be written or
/// the pass fails.
pub async fn mirror_once<F: FilesystemPort, M: Mirror>(
    filesystem: &F,
    config_path: &Utf8Path,
    conf: &RcloneConf,
    mirror: &M,
    resync: bool,
) -> Result<(), AppError> {
    write_rclone_conf(filesystem, config_path, conf)?;
    mirror.run_pass(resync).await?;
    info!(resync, "S3 synced");
    Ok(())
}

fn host_provisioner(
    runtime: &RuntimeConfig,
) -> Provisioner<ShellAccounts<ProcessCommandRunner>, HostFilesystem<ProcessCommandRunner>> {
    Provisioner::new(
        ShellAccounts::new(runtime.account_tools(), ProcessCommandRunner),
        HostFilesystem::new(ProcessCommandRunner),
        runtime.layout(),
    )
}

/// Full lifecycle: provision, configure rclone, then supervise `sshd` and
/// the sync loop until one of them ends.
///
/// # Errors
///
/// Always returns an error: either a setup failure or the
/// [`SupervisorError`] of the first supervised task to end.
pub async fn serve(settings: Settings) -> Result<Infallible, AppError> {
    info!("starting s3ftp");
    let runtime = &settings.runtime;
    let mut provisioner = host_provisioner(runtime);
    prepare_host(&mut provisioner, &settings.users, runtime.skip_if_provisioned)?;

    let target = settings.rclone_target();
    write_rclone_conf(
        provisioner.filesystem(),
        &target.config_path,
        &settings.s3.rclone_conf(),
    )?;

    let daemon = SshDaemon::new(
        TokioProcessLauncher,
        runtime.sshd_bin.clone(),
        &provisioner.layout().sshd_config_path,
    );
    let scheduler = SyncScheduler::new(
        RcloneMirror::new(TokioProcessLauncher, target),
        settings.policy.cadence,
    );

    supervise(
        async move { daemon.start().await },
        async move { scheduler.run().await },
    )
    .await
    .map_err(AppError::from)
}

/// Best-effort teardown of everything `serve` provisions.
///
/// # Errors
///
/// Returns [`AppError::Validation`] when the host settings cannot be loaded.
pub fn reset() -> Result<ResetReport, AppError> {
    let runtime = RuntimeConfig::load_without_cli_args()?;
    let mut provisioner = host_provisioner(&runtime);
    Ok(provisioner.reset())
}

/// Writes the rclone configuration and runs exactly one pass.
///
/// # Errors
///
/// Returns [`AppError::Validation`] for invalid settings and
/// [`AppError::Mirror`] when the pass fails.
pub async fn sync_once(resync: bool) -> Result<(), AppError> {
    let s3 = S3Config::load_without_cli_args()?;
    s3.validate()?;
    let policy = SyncSettings::load_without_cli_args()?.policy()?;
    let runtime = RuntimeConfig::load_without_cli_args()?;

    let target = runtime.rclone_target(&s3.bucket, policy.mode);
    let config_path = target.config_path.clone();
    let mirror = RcloneMirror::new(TokioProcessLauncher, target);
    mirror_once(
        &HostFilesystem::new(ProcessCommandRunner),
        &config_path,
        &s3.rclone_conf(),
        &mirror,
        resync,
    )
    .await
}

/// Loads and validates every setting without touching the host.
///
/// # Errors
///
/// Returns [`AppError::Validation`] naming the first invalid setting.
pub fn check() -> Result<Settings, AppError> {
    let settings = Settings::load()?;
    for user in &settings.users {
        info!(user = %user.username, access = user.access_label(), "declared user");
    }
    info!(
        users = settings.users.len(),
        cadence = %settings.policy.cadence,
        mode = %settings.policy.mode,
        bucket = %settings.s3.bucket,
        "configuration is valid"
    );
    Ok(settings)
}
