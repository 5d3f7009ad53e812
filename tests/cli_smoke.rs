//! Smoke tests for the CLI entrypoint.
//!
//! Only commands that never touch the host run here: `check` validates
//! configuration and exits.

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use rstest::{fixture, rstest};
use tempfile::TempDir;

const VALID_ENV: [(&str, &str); 8] = [
    ("SFTP_USERS", "alice:pw1,bob:pw2:ro"),
    ("S3_ACCESS_KEY_ID", "AKIAEXAMPLE"),
    ("S3_SECRET_ACCESS_KEY", "s3cr3t"),
    ("S3_REGION", "eu-west-1"),
    ("S3_ENDPOINT", "https://s3.example.test"),
    ("S3_BUCKET", "uploads"),
    ("SYNC_INTERVAL", "5m"),
    ("SYNC_MODE", "bisync"),
];

#[fixture]
fn isolated_home() -> TempDir {
    TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"))
}

fn s3ftp(home: &TempDir, overrides: &[(&str, Option<&str>)]) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("s3ftp");
    cmd.current_dir(home.path())
        .env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path())
        .env_remove("S3FTP_CONFIG_PATH")
        .env("RUST_LOG", "s3ftp=info");
    for (key, value) in VALID_ENV {
        cmd.env(key, value);
    }
    for (key, value) in overrides {
        match value {
            Some(value) => cmd.env(key, value),
            None => cmd.env_remove(key),
        };
    }
    cmd
}

#[test]
fn cli_without_arguments_prints_help() {
    let mut cmd = cargo_bin_cmd!("s3ftp");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Usage"))
        .stderr(predicate::str::contains("sync-once"));
}

#[rstest]
fn check_accepts_valid_environment(isolated_home: TempDir) {
    s3ftp(&isolated_home, &[])
        .arg("check")
        .assert()
        .success()
        .stderr(predicate::str::contains("configuration is valid"))
        .stderr(predicate::str::contains("s3cr3t").not())
        .stderr(predicate::str::contains("pw1").not());
}

#[rstest]
#[case::missing_users(&[("SFTP_USERS", None)], "SFTP_USERS")]
#[case::bad_charset(&[("SFTP_USERS", Some("alice:pw;reboot"))], "invalid character")]
#[case::missing_bucket(&[("S3_BUCKET", None)], "S3_BUCKET")]
#[case::bad_mode(&[("SYNC_MODE", Some("mirror"))], "SYNC_MODE")]
#[case::zero_interval(&[("SYNC_INTERVAL", Some("0s"))], "SYNC_INTERVAL")]
#[case::bad_interval(&[("SYNC_INTERVAL", Some("whenever"))], "SYNC_INTERVAL")]
fn check_rejects_invalid_environment(
    isolated_home: TempDir,
    #[case] overrides: &[(&str, Option<&str>)],
    #[case] snippet: &str,
) {
    s3ftp(&isolated_home, overrides)
        .arg("check")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains(snippet));
}

#[test]
fn unknown_subcommand_is_rejected() {
    let mut cmd = cargo_bin_cmd!("s3ftp");
    cmd.arg("teleport")
        .assert()
        .failure()
        .stderr(predicate::str::contains("teleport"));
}
