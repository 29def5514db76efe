//! 📊 Aggregation jobs: turn yesterday's pile of rows into one number per day.
//!
//! Four jobs, one template:
//!
//! ```text
//!   begin session ─▶ count ─▶ sort by day ─▶ stage stats ─▶ commit
//!                                                             │
//!                           ┌─────────────────────────────────┼──────────────────┐
//!                           ▼                                 ▼                  ▼
//!                      Committed(n)                   Skipped (dup)      Err(Transient) → retry
//! ```
//!
//! These are plain async functions. Nothing in here knows about schedules or retries;
//! the [`crate::retry`] executor and the scheduler worker wrap them from the outside.
//! The session is scoped to the function body, so it is back in the pool on every exit.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::common::{DailyStatistic, StatName};
use crate::storage::{Storage, StorageError, Table};

/// 🗓️ What to run and over which days. Offsets count back from "today".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobSpec {
    Location {
        #[serde(default = "one")]
        start: u32,
        #[serde(default = "one")]
        end: u32,
    },
    Cell {
        #[serde(default = "one")]
        start: u32,
        #[serde(default = "one")]
        end: u32,
    },
    Wifi {
        #[serde(default = "one")]
        start: u32,
        #[serde(default = "one")]
        end: u32,
    },
    UniqueWifi {
        #[serde(default = "one")]
        ago: u32,
    },
}

fn one() -> u32 {
    1
}

impl JobSpec {
    /// 📅 The nightly lineup: every statistic, for yesterday.
    pub fn defaults() -> Vec<JobSpec> {
        vec![
            JobSpec::Location { start: 1, end: 1 },
            JobSpec::Cell { start: 1, end: 1 },
            JobSpec::Wifi { start: 1, end: 1 },
            JobSpec::UniqueWifi { ago: 1 },
        ]
    }

    pub fn stat_name(&self) -> StatName {
        match self {
            JobSpec::Location { .. } => StatName::Location,
            JobSpec::Cell { .. } => StatName::Cell,
            JobSpec::Wifi { .. } => StatName::Wifi,
            JobSpec::UniqueWifi { .. } => StatName::UniqueWifi,
        }
    }
}

impl std::fmt::Display for JobSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobSpec::Location { start, end } | JobSpec::Cell { start, end } | JobSpec::Wifi { start, end } => {
                write!(f, "{}(start={start}, end={end})", self.stat_name())
            }
            JobSpec::UniqueWifi { ago } => write!(f, "{}(ago={ago})", self.stat_name()),
        }
    }
}

/// 🎫 How a job run ended when it didn't fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// ✅ Rows written.
    Committed(usize),
    /// 🔁 Somebody already computed this day. Nothing written, nothing wrong.
    Skipped,
}

impl JobOutcome {
    /// 🔢 Rows written; a skip wrote none.
    pub fn rows(&self) -> usize {
        match self {
            JobOutcome::Committed(rows) => *rows,
            JobOutcome::Skipped => 0,
        }
    }
}

/// 📋 What the scheduler saw for one job after retries were spent (or not needed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobReport {
    Committed(usize),
    Skipped,
    Failed(String),
}

impl std::fmt::Display for JobReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobReport::Committed(rows) => write!(f, "committed {rows} row(s)"),
            JobReport::Skipped => f.write_str("skipped (already computed)"),
            JobReport::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// 🌩️ Why a job run didn't finish.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobError {
    /// 🔁 Storage hiccup. Worth another go.
    #[error("transient failure: {0}")]
    Transient(String),
    /// 📅 The offset points outside the calendar. Trying again won't move it.
    #[error("{offset} day(s) from {today} is outside the representable date range")]
    DayOutOfRange { today: NaiveDate, offset: u32 },
}

impl JobError {
    pub fn is_transient(&self) -> bool {
        matches!(self, JobError::Transient(_))
    }
}

impl From<StorageError> for JobError {
    fn from(err: StorageError) -> Self {
        JobError::Transient(err.to_string())
    }
}

/// 🚀 Run one job spec against `storage`, with `today` as the anchor for day offsets.
pub async fn run_job(storage: &dyn Storage, spec: JobSpec, today: NaiveDate) -> Result<JobOutcome, JobError> {
    match spec {
        JobSpec::Location { start, end } => {
            histogram(storage, StatName::Location, Table::Measure, start, end, today).await
        }
        JobSpec::Cell { start, end } => histogram(storage, StatName::Cell, Table::CellMeasure, start, end, today).await,
        JobSpec::Wifi { start, end } => histogram(storage, StatName::Wifi, Table::WifiMeasure, start, end, today).await,
        JobSpec::UniqueWifi { ago } => unique_wifi_histogram(storage, ago, today).await,
    }
}

/// 📊 Count `table` rows per day for `start` days ago through `end` days ago, inclusive,
/// and write one `name` statistic per day found.
pub async fn histogram(
    storage: &dyn Storage,
    name: StatName,
    table: Table,
    start: u32,
    end: u32,
    today: NaiveDate,
) -> Result<JobOutcome, JobError> {
    let from = days_ago(today, start)?;
    let to = days_ago(today, end)?;

    let mut session = storage.begin().await?;
    let mut rows = session.count_by_day(table, from, to).await?;
    rows.sort_by_key(|(day, _)| *day);

    let stats: Vec<DailyStatistic> = rows
        .into_iter()
        .map(|(day, value)| DailyStatistic { name, day, value })
        .collect();
    let written = stats.len();
    session.add_stats(stats);
    finish(session.commit().await, name, written)
}

/// 🔑 Distinct wifi keys seen up to and including the day `ago` days back. Always one row.
pub async fn unique_wifi_histogram(storage: &dyn Storage, ago: u32, today: NaiveDate) -> Result<JobOutcome, JobError> {
    let day = days_ago(today, ago)?;
    let day_plus_one = day
        .checked_add_days(Days::new(1))
        .ok_or(JobError::DayOutOfRange { today: day, offset: 1 })?;

    let mut session = storage.begin().await?;
    let value = session.count_distinct_wifi_keys_before(day_plus_one).await?;
    session.add_stats(vec![DailyStatistic {
        name: StatName::UniqueWifi,
        day,
        value,
    }]);
    finish(session.commit().await, StatName::UniqueWifi, 1)
}

fn finish(committed: Result<(), StorageError>, name: StatName, written: usize) -> Result<JobOutcome, JobError> {
    match committed {
        Ok(()) => {
            info!(stat = %name, rows = written, "📊 statistics committed");
            Ok(JobOutcome::Committed(written))
        }
        Err(StorageError::Duplicate { day, .. }) => {
            debug!(stat = %name, %day, "🔁 statistic already present, skipping");
            Ok(JobOutcome::Skipped)
        }
        Err(err) => Err(err.into()),
    }
}

fn days_ago(today: NaiveDate, days: u32) -> Result<NaiveDate, JobError> {
    today
        .checked_sub_days(Days::new(u64::from(days)))
        .ok_or(JobError::DayOutOfRange { today, offset: days })
}
