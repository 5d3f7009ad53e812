//! BDD step definitions for service supervision.

use rstest_bdd_macros::{given, then, when};
use s3ftp::command::CommandError;
use s3ftp::mirror::{MirrorError, SyncMode};
use s3ftp::schedule::Cadence;

use super::test_helpers::ServiceContext;

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("invalid step input: {0}")]
    Input(String),
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn parse_cadence(raw: &str) -> Result<Cadence, StepError> {
    raw.parse()
        .map_err(|err: s3ftp::CadenceError| StepError::Input(err.to_string()))
}

fn parse_flags(raw: &str) -> Result<Vec<bool>, StepError> {
    raw.split(',')
        .map(|flag| {
            flag.trim()
                .parse::<bool>()
                .map_err(|err| StepError::Input(format!("{flag}: {err}")))
        })
        .collect()
}

#[given("a sync loop every \"{interval}\"")]
fn sync_every(
    mut service_context: ServiceContext,
    interval: String,
) -> Result<ServiceContext, StepError> {
    service_context.cadence = Some(parse_cadence(&interval)?);
    Ok(service_context)
}

#[given("a sync loop on schedule \"{expression}\"")]
fn sync_on_schedule(
    mut service_context: ServiceContext,
    expression: String,
) -> Result<ServiceContext, StepError> {
    let cadence = parse_cadence(&expression)?;
    if !matches!(cadence, Cadence::Cron { .. }) {
        return Err(StepError::Input(format!("{expression} is not a cron expression")));
    }
    service_context.cadence = Some(cadence);
    Ok(service_context)
}

#[given("the mirror succeeds {count:usize} times then fails")]
fn mirror_then_fails(service_context: ServiceContext, count: usize) -> ServiceContext {
    service_context.mirror.push_successes(count);
    service_context.mirror.push_failure(MirrorError::PassFailed {
        mode: SyncMode::Bisync,
        status: Some(7),
        status_text: String::from("7"),
        stderr: String::from("Bisync critical error"),
    });
    service_context
}

#[given("the daemon exits with code \"{code}\"")]
fn daemon_exits(service_context: ServiceContext, code: i32) -> ServiceContext {
    service_context.launcher.push_exit(Some(code));
    service_context
}

#[given("the daemon cannot be started")]
fn daemon_cannot_start(service_context: ServiceContext) -> ServiceContext {
    service_context.launcher.push_attach_error(CommandError::Spawn {
        program: String::from("/usr/sbin/sshd"),
        message: String::from("No such file or directory"),
    });
    service_context
}

#[when("the service runs")]
fn service_runs(mut service_context: ServiceContext) -> Result<ServiceContext, StepError> {
    let message = service_context.run().map_err(StepError::Input)?;
    service_context.stopped_with = Some(message);
    Ok(service_context)
}

#[then("the service stopped with \"{prefix}\"")]
fn stopped_with(service_context: &ServiceContext, prefix: String) -> Result<(), StepError> {
    match &service_context.stopped_with {
        Some(message) if message.starts_with(&prefix) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected an error starting with {prefix:?}, got {other:?}"
        ))),
    }
}

#[then("the passes used resync flags \"{flags}\"")]
fn resync_flags(service_context: &ServiceContext, flags: String) -> Result<(), StepError> {
    let expected = parse_flags(&flags)?;
    let actual = service_context.mirror.passes();
    if actual == expected {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected passes {expected:?}, got {actual:?}"
        )))
    }
}
