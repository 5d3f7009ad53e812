//! Unit tests for cadences and the sync loop.

use super::*;
use crate::command::CommandError;
use crate::mirror::SyncMode;
use crate::test_support::ScriptedMirror;
use chrono::TimeZone;
use rstest::rstest;

fn failed_pass() -> MirrorError {
    MirrorError::PassFailed {
        mode: SyncMode::Bisync,
        status: Some(1),
        status_text: String::from("1"),
        stderr: String::from("conflict"),
    }
}

fn interval(seconds: u64) -> Cadence {
    Cadence::Interval(Duration::from_secs(seconds))
}

#[rstest]
#[case("5m", 300)]
#[case("90s", 90)]
#[case("1h 30m", 5_400)]
#[case(" 10s ", 10)]
fn cadence_parses_durations(#[case] raw: &str, #[case] seconds: u64) {
    let cadence: Cadence = raw.parse().expect("valid duration");
    assert!(
        matches!(cadence, Cadence::Interval(duration) if duration == Duration::from_secs(seconds)),
        "{cadence:?}"
    );
}

#[rstest]
#[case("*/5 * * * *")]
#[case("0 */5 * * * *")]
#[case("0 0 3 * * * *")]
fn cadence_parses_cron_expressions(#[case] raw: &str) {
    let cadence: Cadence = raw.parse().expect("valid cron");
    assert!(matches!(cadence, Cadence::Cron { .. }), "{cadence:?}");
    assert_eq!(cadence.to_string(), raw);
}

#[rstest]
fn cadence_rejects_zero_duration() {
    assert_eq!(
        "0s".parse::<Cadence>().expect_err("zero"),
        CadenceError::NonPositive {
            value: String::from("0s")
        }
    );
}

#[rstest]
#[case("")]
#[case("   ")]
fn cadence_rejects_blank(#[case] raw: &str) {
    assert_eq!(raw.parse::<Cadence>().expect_err("blank"), CadenceError::Empty);
}

#[rstest]
#[case("soon")]
#[case("-5m")]
#[case("* * *")]
#[case("99 * * * *")]
fn cadence_rejects_garbage(#[case] raw: &str) {
    assert!(matches!(
        raw.parse::<Cadence>(),
        Err(CadenceError::Invalid { .. })
    ));
}

#[rstest]
fn interval_next_run_adds_duration() {
    let now = Utc
        .with_ymd_and_hms(2024, 5, 1, 12, 0, 0)
        .single()
        .expect("valid timestamp");
    let next = interval(300).next_after(now).expect("next run");
    assert_eq!(
        next,
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 5, 0)
            .single()
            .expect("valid timestamp")
    );
}

#[rstest]
fn cron_next_run_follows_schedule() {
    let cadence: Cadence = "*/15 * * * *".parse().expect("valid cron");
    let now = Utc
        .with_ymd_and_hms(2024, 5, 1, 12, 7, 30)
        .single()
        .expect("valid timestamp");
    assert_eq!(
        cadence.next_after(now),
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 15, 0).single()
    );
}

#[tokio::test(start_paused = true)]
async fn first_cycle_resyncs_and_later_cycles_do_not() {
    let mirror = ScriptedMirror::new();
    mirror.push_successes(3);
    mirror.push_failure(failed_pass());
    let scheduler = SyncScheduler::new(mirror.clone(), interval(60));

    let err = scheduler.run().await.expect_err("loop ends on failure");

    assert_eq!(mirror.passes(), [true, false, false, false]);
    assert_eq!(
        err,
        SchedulerError::Mirror {
            cycle: 3,
            source: failed_pass(),
        }
    );
}

#[tokio::test(start_paused = true)]
async fn failure_stops_the_loop_without_retry() {
    let mirror = ScriptedMirror::new();
    mirror.push_successes(1);
    mirror.push_failure(failed_pass());
    mirror.push_successes(5);
    let scheduler = SyncScheduler::new(mirror.clone(), interval(3_600));

    let err = scheduler.run().await.expect_err("loop ends on failure");

    assert!(matches!(err, SchedulerError::Mirror { cycle: 1, .. }));
    assert_eq!(mirror.passes().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn first_pass_failure_is_reported_as_cycle_zero() {
    let mirror = ScriptedMirror::new();
    mirror.push_failure(MirrorError::Launch(CommandError::Spawn {
        program: String::from("rclone"),
        message: String::from("not found"),
    }));
    let scheduler = SyncScheduler::new(mirror.clone(), interval(60));

    let err = scheduler.run().await.expect_err("loop ends on failure");

    assert!(matches!(err, SchedulerError::Mirror { cycle: 0, .. }));
    assert_eq!(mirror.passes(), [true]);
}

#[tokio::test(start_paused = true)]
async fn loop_sleeps_for_the_interval_between_cycles() {
    let mirror = ScriptedMirror::new();
    mirror.push_successes(2);
    mirror.push_failure(failed_pass());
    let scheduler = SyncScheduler::new(mirror, interval(600));

    let started = tokio::time::Instant::now();
    scheduler.run().await.expect_err("loop ends on failure");

    let elapsed = started.elapsed();
    assert!(
        elapsed >= Duration::from_secs(1_200) && elapsed < Duration::from_secs(1_201),
        "two pauses expected, slept {elapsed:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn cron_cadence_never_resyncs_after_first_cycle() {
    let mirror = ScriptedMirror::new();
    mirror.push_successes(2);
    mirror.push_failure(failed_pass());
    let cadence: Cadence = "* * * * * *".parse().expect("every second");
    let scheduler = SyncScheduler::new(mirror.clone(), cadence);

    scheduler.run().await.expect_err("loop ends on failure");

    assert_eq!(mirror.passes(), [true, false, false]);
}

#[tokio::test]
async fn run_cycle_builds_record() {
    let mirror = ScriptedMirror::new();
    mirror.push_successes(2);
    let scheduler = SyncScheduler::new(mirror, interval(300));

    let first = scheduler.run_cycle(0).await.expect("cycle 0");
    let second = scheduler.run_cycle(1).await.expect("cycle 1");

    assert_eq!(first.execution_count, 1);
    assert!(first.resync);
    assert_eq!(second.execution_count, 2);
    assert!(!second.resync);
    assert_eq!(
        second.next_timestamp - second.timestamp,
        chrono::Duration::seconds(300)
    );
}

#[tokio::test]
async fn exhausted_cron_schedule_is_an_error() {
    let mirror = ScriptedMirror::new();
    mirror.push_successes(1);
    let cadence: Cadence = "0 0 0 1 1 * 2001".parse().expect("valid past schedule");
    let scheduler = SyncScheduler::new(mirror, cadence);

    let err = scheduler.run_cycle(0).await.expect_err("no future run");

    assert!(matches!(err, SchedulerError::Exhausted { .. }));
}
