//! BDD scenarios for host provisioning.

use rstest_bdd_macros::scenario;

use super::test_helpers::{ProvisionContext, provision_context};

#[scenario(path = "tests/features/provision.feature", name = "Provision a fresh host")]
fn scenario_fresh_host(provision_context: ProvisionContext) {
    let _ = provision_context;
}

#[scenario(
    path = "tests/features/provision.feature",
    name = "Re-provisioning replaces stale accounts"
)]
fn scenario_reprovision(provision_context: ProvisionContext) {
    let _ = provision_context;
}

#[scenario(
    path = "tests/features/provision.feature",
    name = "Skip provisioning when the marker is present"
)]
fn scenario_skip_marker(provision_context: ProvisionContext) {
    let _ = provision_context;
}

#[scenario(
    path = "tests/features/provision.feature",
    name = "Surface the failing user step"
)]
fn scenario_user_step_failure(provision_context: ProvisionContext) {
    let _ = provision_context;
}

#[scenario(
    path = "tests/features/provision.feature",
    name = "Reject a malformed user list before touching the host"
)]
fn scenario_malformed_users(provision_context: ProvisionContext) {
    let _ = provision_context;
}

#[scenario(
    path = "tests/features/provision.feature",
    name = "Reject a path-like username before touching the host"
)]
fn scenario_path_like_username(provision_context: ProvisionContext) {
    let _ = provision_context;
}
