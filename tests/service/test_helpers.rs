//! Shared fixtures for service supervision behavioural tests.

use camino::Utf8Path;
use rstest::fixture;
use s3ftp::schedule::{Cadence, SyncScheduler};
use s3ftp::supervise::{SshDaemon, supervise};
use s3ftp::test_support::{ScriptedLauncher, ScriptedMirror};

#[derive(Clone, Debug)]
pub struct ServiceContext {
    pub launcher: ScriptedLauncher,
    pub mirror: ScriptedMirror,
    pub cadence: Option<Cadence>,
    pub stopped_with: Option<String>,
}

impl ServiceContext {
    /// Runs both supervised tasks on a paused clock and returns the error
    /// that ended supervision.
    pub fn run(&self) -> Result<String, String> {
        let cadence = self
            .cadence
            .clone()
            .ok_or_else(|| String::from("no cadence configured"))?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .map_err(|err| err.to_string())?;

        let daemon = SshDaemon::new(
            self.launcher.clone(),
            "/usr/sbin/sshd",
            Utf8Path::new("/etc/ssh/sshd_config"),
        );
        let scheduler = SyncScheduler::new(self.mirror.clone(), cadence);
        let result = runtime.block_on(supervise(
            async move { daemon.start().await },
            async move { scheduler.run().await },
        ));
        match result {
            Ok(never) => match never {},
            Err(err) => Ok(err.to_string()),
        }
    }
}

#[fixture]
pub fn service_context() -> ServiceContext {
    ServiceContext {
        launcher: ScriptedLauncher::new(),
        mirror: ScriptedMirror::new(),
        cadence: None,
        stopped_with: None,
    }
}
