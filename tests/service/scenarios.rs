//! BDD scenarios for service supervision.

use rstest_bdd_macros::scenario;

use super::test_helpers::{ServiceContext, service_context};

#[scenario(
    path = "tests/features/service.feature",
    name = "First pass resyncs and later passes do not"
)]
fn scenario_resync_first_pass(service_context: ServiceContext) {
    let _ = service_context;
}

#[scenario(path = "tests/features/service.feature", name = "A failed pass is not retried")]
fn scenario_no_retry(service_context: ServiceContext) {
    let _ = service_context;
}

#[scenario(path = "tests/features/service.feature", name = "Daemon exit ends the service")]
fn scenario_daemon_exit(service_context: ServiceContext) {
    let _ = service_context;
}

#[scenario(path = "tests/features/service.feature", name = "Cron cadence drives the loop")]
fn scenario_cron_cadence(service_context: ServiceContext) {
    let _ = service_context;
}

#[scenario(
    path = "tests/features/service.feature",
    name = "A daemon that cannot start ends the service"
)]
fn scenario_daemon_launch_failure(service_context: ServiceContext) {
    let _ = service_context;
}
