//! 🗄️ Storage: the seam between this crate and wherever the rows actually live.
//!
//! Everything goes through a [`Session`]. You open one, stage writes, read counts,
//! and either `commit()` it or let it drop. Dropping is a rollback. Dropping also hands
//! the session slot back, no matter how the caller got there (early return, `?`, panic).
//!
//! Two failure kinds matter here and they are kept apart on purpose:
//!
//! - [`StorageError::Duplicate`]: a `(name, day)` statistic already exists. Someone
//!   already did the work.
//! - [`StorageError::Transient`]: anything else. Worth another try.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use crate::common::{CanonicalReport, DailyStatistic, StatName};

mod in_mem;
pub use in_mem::InMemoryStorage;

/// 🗂️ The three report tables aggregation jobs count over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    /// 📍 one row per report
    Measure,
    /// 🗼 one row per cell observation
    CellMeasure,
    /// 📶 one row per wifi observation
    WifiMeasure,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Measure => "measure",
            Table::CellMeasure => "cell_measure",
            Table::WifiMeasure => "wifi_measure",
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// 🔁 The uniqueness constraint on `(name, day)` fired.
    #[error("statistic {name} for {day} already exists")]
    Duplicate { name: StatName, day: NaiveDate },
    /// 🌩️ Connectivity, contention, gremlins.
    #[error("transient storage failure: {0}")]
    Transient(String),
}

impl StorageError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, StorageError::Duplicate { .. })
    }
}

/// 🔌 One unit of work against storage. Uncommitted work vanishes on drop.
#[async_trait]
pub trait Session: Send {
    /// 📅 Rows per calendar day of `created`, for days in `from..=to`. Days with no rows are absent.
    async fn count_by_day(
        &mut self,
        table: Table,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<(NaiveDate, u64)>, StorageError>;

    /// 🔑 Distinct wifi keys among rows created strictly before `before` (midnight UTC).
    async fn count_distinct_wifi_keys_before(&mut self, before: NaiveDate) -> Result<u64, StorageError>;

    /// 📝 Stage statistic rows for the next commit.
    fn add_stats(&mut self, stats: Vec<DailyStatistic>);

    /// 📝 Stage the measure rows for a chunk of reports, all stamped `created`.
    fn add_reports(&mut self, created: DateTime<Utc>, reports: &[CanonicalReport]);

    /// ✅ Apply everything staged, all or nothing.
    async fn commit(self: Box<Self>) -> Result<(), StorageError>;
}

/// 🏦 Hands out sessions.
#[async_trait]
pub trait Storage: std::fmt::Debug + Send + Sync {
    async fn begin(&self) -> Result<Box<dyn Session>, StorageError>;

    /// 🔢 Sessions currently checked out. Zero when nobody is mid-job.
    fn open_sessions(&self) -> usize;
}
