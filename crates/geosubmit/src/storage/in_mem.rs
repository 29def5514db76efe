use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::Mutex;
use tracing::trace;

use crate::common::{CanonicalReport, CellObservation, DailyStatistic, StatName, WifiObservation};
use crate::storage::{Session, Storage, StorageError, Table};

/// 🧠 Storage that lives and dies with the process.
///
/// Every table is a `Vec` behind one `tokio::sync::Mutex`, so a commit is atomic with
/// respect to every other session. The `(name, day)` uniqueness rule on statistics is
/// checked at commit time, same as a real database would on flush.
///
/// Clone it freely. Clones share the same tables, which is how tests get to peek at
/// what a job wrote after handing the storage off.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStorage {
    shared: Arc<Shared>,
}

#[derive(Debug, Default)]
struct Shared {
    tables: Mutex<Tables>,
    open_sessions: AtomicUsize,
    failing_commits: AtomicUsize,
    failing_reads: AtomicUsize,
}

#[derive(Debug, Default)]
struct Tables {
    measure: Vec<MeasureRow>,
    cell_measure: Vec<CellMeasureRow>,
    wifi_measure: Vec<WifiMeasureRow>,
    stats: BTreeMap<(StatName, NaiveDate), u64>,
}

#[derive(Debug, Clone)]
struct MeasureRow {
    created: DateTime<Utc>,
    report: CanonicalReport,
}

#[derive(Debug, Clone)]
struct CellMeasureRow {
    created: DateTime<Utc>,
    cell: CellObservation,
}

#[derive(Debug, Clone)]
struct WifiMeasureRow {
    created: DateTime<Utc>,
    wifi: WifiObservation,
}

impl Tables {
    fn created_dates(&self, table: Table) -> Vec<NaiveDate> {
        match table {
            Table::Measure => self.measure.iter().map(|r| r.created.date_naive()).collect(),
            Table::CellMeasure => self.cell_measure.iter().map(|r| r.created.date_naive()).collect(),
            Table::WifiMeasure => self.wifi_measure.iter().map(|r| r.created.date_naive()).collect(),
        }
    }

    fn insert_reports(&mut self, created: DateTime<Utc>, reports: &[CanonicalReport]) {
        for report in reports {
            self.cell_measure.extend(report.cell.iter().map(|cell| CellMeasureRow {
                created,
                cell: cell.clone(),
            }));
            self.wifi_measure.extend(report.wifi.iter().map(|wifi| WifiMeasureRow {
                created,
                wifi: wifi.clone(),
            }));
            self.measure.push(MeasureRow {
                created,
                report: report.clone(),
            });
        }
    }
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// 🌩️ The next `n` commits fail with a transient error, then things go back to normal.
    pub fn fail_next_commits(&self, n: usize) {
        self.shared.failing_commits.store(n, Ordering::SeqCst);
    }

    /// 🌩️ The next `n` reads fail with a transient error.
    pub fn fail_next_reads(&self, n: usize) {
        self.shared.failing_reads.store(n, Ordering::SeqCst);
    }

    /// 🌱 Write rows directly, bypassing sessions. For fixtures and demos.
    pub async fn seed_reports(&self, created: DateTime<Utc>, reports: &[CanonicalReport]) {
        self.shared.tables.lock().await.insert_reports(created, reports);
    }

    /// 📊 Every committed statistic, ordered by name then day.
    pub async fn stats(&self) -> Vec<DailyStatistic> {
        self.shared
            .tables
            .lock()
            .await
            .stats
            .iter()
            .map(|(&(name, day), &value)| DailyStatistic { name, day, value })
            .collect()
    }

    /// 📄 Every stored report, in insert order.
    pub async fn reports(&self) -> Vec<CanonicalReport> {
        let tables = self.shared.tables.lock().await;
        tables.measure.iter().map(|row| row.report.clone()).collect()
    }

    /// 🗼 Every stored cell observation, in insert order.
    pub async fn cells(&self) -> Vec<CellObservation> {
        let tables = self.shared.tables.lock().await;
        tables.cell_measure.iter().map(|row| row.cell.clone()).collect()
    }

    /// 🔢 Committed rows in one table.
    pub async fn row_count(&self, table: Table) -> usize {
        let tables = self.shared.tables.lock().await;
        match table {
            Table::Measure => tables.measure.len(),
            Table::CellMeasure => tables.cell_measure.len(),
            Table::WifiMeasure => tables.wifi_measure.len(),
        }
    }
}

/// ⬇️ Decrement `counter` if it is above zero. True when a failure should fire.
fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn begin(&self) -> Result<Box<dyn Session>, StorageError> {
        self.shared.open_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(InMemorySession {
            slot: SessionSlot {
                shared: Arc::clone(&self.shared),
            },
            staged_stats: Vec::new(),
            staged_reports: Vec::new(),
        }))
    }

    fn open_sessions(&self) -> usize {
        self.shared.open_sessions.load(Ordering::SeqCst)
    }
}

/// 🎟️ Holds one unit of `open_sessions` and gives it back on drop, however the drop happens.
#[derive(Debug)]
struct SessionSlot {
    shared: Arc<Shared>,
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        self.shared.open_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
struct InMemorySession {
    slot: SessionSlot,
    staged_stats: Vec<DailyStatistic>,
    staged_reports: Vec<(DateTime<Utc>, Vec<CanonicalReport>)>,
}

impl InMemorySession {
    fn check_read(&self) -> Result<(), StorageError> {
        if take_one(&self.slot.shared.failing_reads) {
            return Err(StorageError::Transient("injected read failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Session for InMemorySession {
    async fn count_by_day(
        &mut self,
        table: Table,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<(NaiveDate, u64)>, StorageError> {
        self.check_read()?;
        let tables = self.slot.shared.tables.lock().await;
        let mut per_day: BTreeMap<NaiveDate, u64> = BTreeMap::new();
        for day in tables.created_dates(table) {
            if day >= from && day <= to {
                *per_day.entry(day).or_insert(0) += 1;
            }
        }
        trace!(table = table.as_str(), %from, %to, days = per_day.len(), "📅 counted rows by day");
        Ok(per_day.into_iter().collect())
    }

    async fn count_distinct_wifi_keys_before(&mut self, before: NaiveDate) -> Result<u64, StorageError> {
        self.check_read()?;
        let tables = self.slot.shared.tables.lock().await;
        let distinct: HashSet<&str> = tables
            .wifi_measure
            .iter()
            .filter(|row| row.created.date_naive() < before)
            .map(|row| row.wifi.key.as_str())
            .collect();
        Ok(distinct.len() as u64)
    }

    fn add_stats(&mut self, stats: Vec<DailyStatistic>) {
        self.staged_stats.extend(stats);
    }

    fn add_reports(&mut self, created: DateTime<Utc>, reports: &[CanonicalReport]) {
        self.staged_reports.push((created, reports.to_vec()));
    }

    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        if take_one(&self.slot.shared.failing_commits) {
            return Err(StorageError::Transient("injected commit failure".to_string()));
        }
        let mut tables = self.slot.shared.tables.lock().await;

        // -- check the whole batch first so a conflict leaves the tables untouched
        let mut incoming = BTreeSet::new();
        for stat in &self.staged_stats {
            let key = (stat.name, stat.day);
            if tables.stats.contains_key(&key) || !incoming.insert(key) {
                return Err(StorageError::Duplicate {
                    name: stat.name,
                    day: stat.day,
                });
            }
        }

        for stat in &self.staged_stats {
            tables.stats.insert((stat.name, stat.day), stat.value);
        }
        for (created, reports) in &self.staged_reports {
            tables.insert_reports(*created, reports);
        }
        Ok(())
    }
}
