//! Shared fixtures for provisioning behavioural tests.

use rstest::fixture;
use s3ftp::provision::{ProvisionLayout, Provisioner};
use s3ftp::test_support::{MemoryAccounts, MemoryFilesystem};
use s3ftp::users::parse_users;
use s3ftp::{PrepareOutcome, app};

/// Result of the provisioning step, with errors rendered to text.
#[derive(Clone, Debug)]
pub enum ProvisionResult {
    Done(PrepareOutcome),
    Failed(String),
}

#[derive(Clone, Debug)]
pub struct ProvisionContext {
    pub accounts: MemoryAccounts,
    pub filesystem: MemoryFilesystem,
    pub skip_if_provisioned: bool,
    pub outcome: Option<ProvisionResult>,
}

impl ProvisionContext {
    pub fn provisioner(&self) -> Provisioner<MemoryAccounts, MemoryFilesystem> {
        Provisioner::new(
            self.accounts.clone(),
            self.filesystem.clone(),
            ProvisionLayout::default(),
        )
    }

    /// Parses `users` and runs the startup provisioning path.
    pub fn provision(&self, users: &str) -> ProvisionResult {
        let specs = match parse_users(users) {
            Ok(specs) => specs,
            Err(err) => return ProvisionResult::Failed(err.to_string()),
        };
        match app::prepare_host(&mut self.provisioner(), &specs, self.skip_if_provisioned) {
            Ok(outcome) => ProvisionResult::Done(outcome),
            Err(err) => ProvisionResult::Failed(err.to_string()),
        }
    }
}

#[fixture]
pub fn provision_context() -> ProvisionContext {
    ProvisionContext {
        accounts: MemoryAccounts::new(),
        filesystem: MemoryFilesystem::new(),
        skip_if_provisioned: false,
        outcome: None,
    }
}
