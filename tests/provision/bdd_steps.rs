//! BDD step definitions for host provisioning.

use rstest_bdd_macros::{given, then, when};
use s3ftp::PrepareOutcome;
use s3ftp::provision::{DEFAULT_USERS_GROUP, MARKER_CONTENTS};

use super::test_helpers::{ProvisionContext, ProvisionResult};

const SSHD_CONFIG: &str = "/etc/ssh/sshd_config";
const MARKER: &str = "/.s3ftp-executed";

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn user_block(context: &ProvisionContext, user: &str) -> Result<String, StepError> {
    let config = context
        .filesystem
        .file(SSHD_CONFIG)
        .ok_or_else(|| StepError::Assertion(String::from("sshd_config was not written")))?;
    let header = format!("Match User {user}\n");
    let start = config
        .find(&header)
        .ok_or_else(|| StepError::Assertion(format!("no Match block for {user}")))?;
    let block: String = config
        .get(start..)
        .unwrap_or_default()
        .lines()
        .skip(1)
        .take_while(|line| line.starts_with("  "))
        .collect::<Vec<_>>()
        .join("\n");
    Ok(block)
}

#[given("a fresh host")]
fn fresh_host(provision_context: ProvisionContext) -> ProvisionContext {
    provision_context
}

#[given("a host provisioned for \"{users}\"")]
fn provisioned_host(
    provision_context: ProvisionContext,
    users: String,
) -> Result<ProvisionContext, StepError> {
    match provision_context.provision(&users) {
        ProvisionResult::Done(_) => Ok(provision_context),
        ProvisionResult::Failed(message) => Err(StepError::Assertion(format!(
            "seeding the host failed: {message}"
        ))),
    }
}

#[given("skipping provisioned hosts is enabled")]
fn skip_enabled(mut provision_context: ProvisionContext) -> ProvisionContext {
    provision_context.skip_if_provisioned = true;
    provision_context
}

#[given("setting the password for \"{user}\" fails")]
fn password_fails(provision_context: ProvisionContext, user: String) -> ProvisionContext {
    provision_context
        .accounts
        .fail_for("set_password", &user, "chpasswd: PAM authentication failed");
    provision_context
}

#[when("I provision users \"{users}\"")]
fn provision_users(mut provision_context: ProvisionContext, users: String) -> ProvisionContext {
    provision_context.outcome = Some(provision_context.provision(&users));
    provision_context
}

#[then("provisioning succeeds")]
fn provisioning_succeeds(provision_context: &ProvisionContext) -> Result<(), StepError> {
    match &provision_context.outcome {
        Some(ProvisionResult::Done(PrepareOutcome::Provisioned { .. })) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected provisioning, got {other:?}"
        ))),
    }
}

#[then("provisioning is skipped")]
fn provisioning_skipped(provision_context: &ProvisionContext) -> Result<(), StepError> {
    match &provision_context.outcome {
        Some(ProvisionResult::Done(PrepareOutcome::AlreadyProvisioned)) => Ok(()),
        other => Err(StepError::Assertion(format!("expected a skip, got {other:?}"))),
    }
}

#[then("provisioning fails mentioning \"{snippet}\"")]
fn provisioning_fails(provision_context: &ProvisionContext, snippet: String) -> Result<(), StepError> {
    match &provision_context.outcome {
        Some(ProvisionResult::Failed(message)) if message.contains(&snippet) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected failure mentioning {snippet:?}, got {other:?}"
        ))),
    }
}

#[then("account \"{user}\" exists in the marker group")]
fn account_in_group(provision_context: &ProvisionContext, user: String) -> Result<(), StepError> {
    match provision_context.accounts.account(&user) {
        Some(account) if account.group == DEFAULT_USERS_GROUP => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected {user} in {DEFAULT_USERS_GROUP}, got {other:?}"
        ))),
    }
}

#[then("account \"{user}\" does not exist")]
fn account_missing(provision_context: &ProvisionContext, user: String) -> Result<(), StepError> {
    if provision_context.accounts.account(&user).is_none() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("{user} should have been removed")))
    }
}

#[then("sshd_config grants \"{user}\" read-only access")]
fn read_only_access(provision_context: &ProvisionContext, user: String) -> Result<(), StepError> {
    let block = user_block(provision_context, &user)?;
    if block.contains("ForceCommand internal-sftp -R") {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("{user} block is not read-only:\n{block}")))
    }
}

#[then("sshd_config grants \"{user}\" read-write access")]
fn read_write_access(provision_context: &ProvisionContext, user: String) -> Result<(), StepError> {
    let block = user_block(provision_context, &user)?;
    if block.contains("ForceCommand internal-sftp") && !block.contains("internal-sftp -R") {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("{user} block is not read-write:\n{block}")))
    }
}

#[then("the provisioned marker is written")]
fn marker_written(provision_context: &ProvisionContext) -> Result<(), StepError> {
    if provision_context.filesystem.file(MARKER).as_deref() == Some(MARKER_CONTENTS) {
        Ok(())
    } else {
        Err(StepError::Assertion(String::from("marker file missing")))
    }
}

#[then("no host mutation was attempted")]
fn no_mutation(provision_context: &ProvisionContext) -> Result<(), StepError> {
    let operations = provision_context.accounts.operations();
    if operations.is_empty() && provision_context.filesystem.file(SSHD_CONFIG).is_none() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("unexpected operations: {operations:?}")))
    }
}
