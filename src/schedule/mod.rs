//! Recurring mirror passes.
//!
//! The scheduler runs `Running(0, resync) → Sleeping → Running(n) → ...`
//! until a pass fails. Cycle 0 always asks for a full resync so a
//! bidirectional mirror can establish its baseline; later cycles never do.
//! A failed pass ends the loop; it is not retried.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;
use tracing::info;

use crate::mirror::{Mirror, MirrorError};

/// When the next pass runs.
#[derive(Clone, Debug)]
pub enum Cadence {
    /// Fixed pause between the end of one pass and the start of the next.
    Interval(Duration),
    /// Cron schedule evaluated in UTC.
    Cron {
        /// Expression as configured.
        expression: String,
        /// Parsed schedule, always in six or seven field form.
        schedule: Box<cron::Schedule>,
    },
}

/// Raised when `SYNC_INTERVAL` is neither a duration nor a cron expression.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CadenceError {
    /// Raised when the value is blank.
    #[error("SYNC_INTERVAL is empty")]
    Empty,
    /// Raised for a zero duration.
    #[error("SYNC_INTERVAL must be a positive duration (got {value:?})")]
    NonPositive {
        /// Rejected value.
        value: String,
    },
    /// Raised when the value parses as neither form.
    #[error("SYNC_INTERVAL {value:?} is not a duration or cron expression: {reason}")]
    Invalid {
        /// Rejected value.
        value: String,
        /// Parser message.
        reason: String,
    },
}

impl FromStr for Cadence {
    type Err = CadenceError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let value = raw.trim();
        if value.is_empty() {
            return Err(CadenceError::Empty);
        }

        if let Ok(duration) = humantime::parse_duration(value) {
            if duration.is_zero() {
                return Err(CadenceError::NonPositive {
                    value: value.to_owned(),
                });
            }
            return Ok(Self::Interval(duration));
        }

        let normalised = match value.split_whitespace().count() {
            5 => format!("0 {value}"),
            6 | 7 => value.to_owned(),
            _ => {
                return Err(CadenceError::Invalid {
                    value: value.to_owned(),
                    reason: String::from("expected a duration such as 5m or 5 to 7 cron fields"),
                });
            }
        };
        let schedule =
            cron::Schedule::from_str(&normalised).map_err(|err| CadenceError::Invalid {
                value: value.to_owned(),
                reason: err.to_string(),
            })?;
        Ok(Self::Cron {
            expression: value.to_owned(),
            schedule: Box::new(schedule),
        })
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interval(duration) => {
                write!(formatter, "{}", humantime::format_duration(*duration))
            }
            Self::Cron { expression, .. } => formatter.write_str(expression),
        }
    }
}

impl Cadence {
    /// Next run strictly after `now`, or `None` when a cron schedule has no
    /// future occurrence.
    #[must_use]
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Interval(duration) => {
                chrono::Duration::from_std(*duration)
                    .ok()
                    .and_then(|delta| now.checked_add_signed(delta))
            }
            Self::Cron { schedule, .. } => schedule.after(&now).next(),
        }
    }
}

/// Outcome of one successful cycle.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SyncCycleRecord {
    /// Number of successful passes so far, this one included.
    pub execution_count: u64,
    /// Whether this pass requested a full resync.
    pub resync: bool,
    /// When the pass completed.
    pub timestamp: DateTime<Utc>,
    /// When the next pass is due.
    pub next_timestamp: DateTime<Utc>,
}

/// Errors that end the scheduler loop.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SchedulerError {
    /// Raised when a pass fails.
    #[error("sync cycle {cycle} failed: {source}")]
    Mirror {
        /// Zero-based index of the failed cycle.
        cycle: u64,
        /// Mirror failure.
        #[source]
        source: MirrorError,
    },
    /// Raised when a cron schedule has no upcoming occurrence.
    #[error("schedule {cadence} has no upcoming run")]
    Exhausted {
        /// Rendered cadence.
        cadence: String,
    },
}

/// Runs a [`Mirror`] on a [`Cadence`].
#[derive(Debug)]
pub struct SyncScheduler<M> {
    mirror: M,
    cadence: Cadence,
}

impl<M: Mirror> SyncScheduler<M> {
    /// Creates a scheduler that has not run any cycle yet.
    pub const fn new(mirror: M, cadence: Cadence) -> Self {
        Self { mirror, cadence }
    }

    /// Cadence in use.
    pub const fn cadence(&self) -> &Cadence {
        &self.cadence
    }

    /// Runs passes forever; only a failure returns.
    ///
    /// # Errors
    ///
    /// Returns the first [`SchedulerError`]; no further cycle is attempted.
    pub async fn run(&self) -> Result<Infallible, SchedulerError> {
        info!(cadence = %self.cadence, "starting rclone sync loop");
        let mut cycle = 0;
        loop {
            let record = self.run_cycle(cycle).await?;
            tokio::time::sleep(self.pause_before(&record)).await;
            cycle += 1;
        }
    }

    fn pause_before(&self, record: &SyncCycleRecord) -> Duration {
        match &self.cadence {
            Cadence::Interval(duration) => *duration,
            Cadence::Cron { .. } => (record.next_timestamp - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO),
        }
    }

    /// Runs the pass for `cycle` and logs its record. Cycle 0 resyncs.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Mirror`] when the pass fails and
    /// [`SchedulerError::Exhausted`] when no next run can be computed.
    pub async fn run_cycle(&self, cycle: u64) -> Result<SyncCycleRecord, SchedulerError> {
        let resync = cycle == 0;
        self.mirror
            .run_pass(resync)
            .await
            .map_err(|source| SchedulerError::Mirror { cycle, source })?;

        let timestamp = Utc::now();
        let next_timestamp =
            self.cadence
                .next_after(timestamp)
                .ok_or_else(|| SchedulerError::Exhausted {
                    cadence: self.cadence.to_string(),
                })?;
        let record = SyncCycleRecord {
            execution_count: cycle + 1,
            resync,
            timestamp,
            next_timestamp,
        };
        info!(
            executions = record.execution_count,
            cadence = %self.cadence,
            timestamp = %record.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            next_execution = %record.next_timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            resync = record.resync,
            "S3 synced"
        );
        Ok(record)
    }
}

#[cfg(test)]
mod tests;
