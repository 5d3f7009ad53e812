//! Command-line interface definitions for the `s3ftp` binary.
//!
//! Kept separate from `main.rs` so the build script can reuse the parser
//! when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `s3ftp` binary.
///
/// Settings come from the environment and `s3ftp.toml`; the command line
/// only selects what to do.
#[derive(Debug, Parser)]
#[command(
    name = "s3ftp",
    about = "Serve chrooted SFTP accounts whose files are mirrored to an S3 bucket",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Provision accounts, then supervise sshd and the sync loop.
    #[command(name = "serve", about = "Provision accounts, then run sshd and the sync loop")]
    Serve,
    /// Remove provisioned accounts, host keys and configuration.
    #[command(name = "reset", about = "Remove provisioned accounts, host keys and configuration")]
    Reset,
    /// Run a single sync pass and exit.
    #[command(name = "sync-once", about = "Run a single sync pass and exit")]
    SyncOnce(SyncOnceCommand),
    /// Validate configuration without touching the host.
    #[command(name = "check", about = "Validate configuration without touching the host")]
    Check,
}

/// Arguments for the `s3ftp sync-once` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct SyncOnceCommand {
    /// Rebuild the bisync baseline before the pass.
    #[arg(long)]
    pub(crate) resync: bool,
}
