//! 📊 Metrics: counters and distributions, the two ways we keep score.
//!
//! Same shape as the backends elsewhere in this crate: a small trait, a couple of
//! concrete implementations, one enum to dispatch between them. Production logs
//! through `tracing`; tests use the in-memory one and read back what was emitted.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, trace};

/// 📈 Anything that can count things and remember how big they were.
pub trait Stats: std::fmt::Debug + Send + Sync {
    /// ➕ Bump a counter.
    fn incr(&self, name: &str, amount: u64);
    /// 📏 Record one sample of a distribution (batch sizes, mostly).
    fn timing(&self, name: &str, value: u64);
}

/// 🍞 Emits each metric as a `tracing` event under the `geosubmit::metrics` target.
#[derive(Debug, Default, Clone)]
pub struct LogStats;

impl Stats for LogStats {
    fn incr(&self, name: &str, amount: u64) {
        debug!(target: "geosubmit::metrics", metric = name, amount, "📈 counter");
    }

    fn timing(&self, name: &str, value: u64) {
        trace!(target: "geosubmit::metrics", metric = name, value, "📏 distribution");
    }
}

/// 🧪 Keeps every emission so tests can ask "did we count that?"
#[derive(Debug, Default, Clone)]
pub struct InMemoryStats {
    counters: Arc<Mutex<BTreeMap<String, u64>>>,
    timings: Arc<Mutex<BTreeMap<String, Vec<u64>>>>,
}

impl InMemoryStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// 🔍 Current value of a counter. Never-touched counters read as zero.
    pub fn counter(&self, name: &str) -> u64 {
        self.counters
            .lock()
            .map(|counters| counters.get(name).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// 🔍 Every sample recorded under `name`, oldest first.
    pub fn timings(&self, name: &str) -> Vec<u64> {
        self.timings
            .lock()
            .map(|timings| timings.get(name).cloned().unwrap_or_default())
            .unwrap_or_default()
    }
}

impl Stats for InMemoryStats {
    fn incr(&self, name: &str, amount: u64) {
        if let Ok(mut counters) = self.counters.lock() {
            *counters.entry(name.to_string()).or_insert(0) += amount;
        }
    }

    fn timing(&self, name: &str, value: u64) {
        if let Ok(mut timings) = self.timings.lock() {
            timings.entry(name.to_string()).or_default().push(value);
        }
    }
}

/// 🎭 Which stats sink is wired in. Cloning is cheap; the in-memory one shares its maps.
#[derive(Debug, Clone)]
pub enum StatsBackend {
    Log(LogStats),
    InMemory(InMemoryStats),
}

impl Default for StatsBackend {
    fn default() -> Self {
        StatsBackend::Log(LogStats)
    }
}

impl Stats for StatsBackend {
    fn incr(&self, name: &str, amount: u64) {
        match self {
            StatsBackend::Log(stats) => stats.incr(name, amount),
            StatsBackend::InMemory(stats) => stats.incr(name, amount),
        }
    }

    fn timing(&self, name: &str, value: u64) {
        match self {
            StatsBackend::Log(stats) => stats.timing(name, value),
            StatsBackend::InMemory(stats) => stats.timing(name, value),
        }
    }
}

/// 🏷️ Metric names, in one place so nobody typos `itmes.uploaded`.
pub mod names {
    pub const BATCHES: &str = "items.uploaded.batches";
    pub const BATCH_SIZE: &str = "items.uploaded.batch_size";
    pub const UPLOAD_ERRORS: &str = "geosubmit.upload.errors";
    pub const MISS: &str = "geosubmit.miss";
    pub const INSERTED: &str = "items.inserted";
    pub const INSERT_ERRORS: &str = "items.insert.errors";
    pub const DROPPED_EXPIRED: &str = "items.dropped.expired";

    /// 🔑 `items.api_log.<key>.uploaded.batches`
    pub fn api_key_batches(key_name: &str) -> String {
        format!("items.api_log.{key_name}.uploaded.batches")
    }

    /// 🔑 `items.api_log.<key>.uploaded.batch_size`
    pub fn api_key_batch_size(key_name: &str) -> String {
        format!("items.api_log.{key_name}.uploaded.batch_size")
    }
}
