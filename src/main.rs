//! Binary entry point for the s3ftp CLI.

use std::io::{self, Write};
use std::process;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use s3ftp::{AppError, Settings};

mod cli;

use cli::Cli;

const DEFAULT_LOG_FILTER: &str = "s3ftp=info";

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging();

    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            error!(error = %err, "s3ftp stopped");
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn dispatch(cli: Cli) -> Result<(), AppError> {
    match cli {
        Cli::Serve => {
            let settings = Settings::load()?;
            match s3ftp::app::serve(settings).await? {}
        }
        Cli::Reset => {
            let report = s3ftp::app::reset()?;
            info!(
                removed = ?report.removed_accounts,
                skipped = report.failures.len(),
                "reset finished"
            );
            Ok(())
        }
        Cli::SyncOnce(command) => s3ftp::app::sync_once(command.resync).await,
        Cli::Check => s3ftp::app::check().map(|_| ()),
    }
}

fn report_error(err: &AppError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &AppError) {
    writeln!(target, "{err}").ok();
}
