//! 📡 geosubmit: location observation ingestion.
//!
//! Phones send cell tower and Wi-Fi readings, with or without a GPS fix. We normalize
//! two wire formats into one canonical report, validate it, chunk it onto a queue,
//! store it, and every night roll the stored rows up into daily counters.
//!
//! ```text
//!   http ─▶ ingest ─▶ transforms ─▶ dispatch(validation) ─▶ queue ─▶ insert worker ─▶ storage
//!                 └─▶ locate                                      scheduler ─▶ jobs ─▶ storage
//! ```

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;

pub mod app_config;
pub mod common;
pub mod dispatch;
pub mod http;
pub mod ingest;
pub mod jobs;
pub mod locate;
pub mod metrics;
pub mod queue;
pub mod retry;
pub mod storage;
pub mod transforms;
pub mod validation;
pub mod wire;
mod supervisors;

#[cfg(test)]
mod fixtures;

use crate::app_config::AppConfig;
use crate::jobs::{JobReport, JobSpec};
use crate::metrics::StatsBackend;
use crate::storage::Storage;
use crate::supervisors::Supervisor;

/// 🚀 Serve HTTP with the insert worker and scheduler alongside, until `shutdown` resolves.
pub async fn run(
    app_config: AppConfig,
    storage: Arc<dyn Storage>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    Supervisor::new(app_config, storage, StatsBackend::default())
        .serve(shutdown)
        .await
        .context("Failed to run the geosubmit service")
}

/// 📊 Run every configured aggregation job once against `storage`, anchored at `today`.
pub async fn aggregate(app_config: AppConfig, storage: Arc<dyn Storage>, today: NaiveDate) -> Vec<(JobSpec, JobReport)> {
    Supervisor::new(app_config, storage, StatsBackend::default())
        .aggregate_once(today)
        .await
}
