//! ⏲️ The SchedulerWorker: an alarm clock that runs aggregation jobs.
//!
//! Every tick it runs each configured [`JobSpec`] through the retry executor, one
//! after another, and logs how each one went. A job that exhausts its retries is
//! reported and forgotten until the next tick. Nothing a job does can take this
//! worker down; it only stops when the shutdown channel closes.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_channel::Receiver;
use chrono::{NaiveDate, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::Worker;
use crate::jobs::{JobOutcome, JobReport, JobSpec, run_job};
use crate::retry::{self, RetryPolicy};
use crate::storage::Storage;

#[derive(Debug)]
pub(crate) struct SchedulerWorker {
    storage: Arc<dyn Storage>,
    jobs: Vec<JobSpec>,
    retry: RetryPolicy,
    interval: Duration,
    shutdown: Receiver<()>,
}

impl SchedulerWorker {
    pub(crate) fn new(
        storage: Arc<dyn Storage>,
        jobs: Vec<JobSpec>,
        retry: RetryPolicy,
        interval: Duration,
        shutdown: Receiver<()>,
    ) -> Self {
        Self {
            storage,
            jobs,
            retry,
            interval: interval.max(Duration::from_secs(1)),
            shutdown,
        }
    }
}

impl Worker for SchedulerWorker {
    fn start(self) -> JoinHandle<Result<()>> {
        tokio::spawn(async move {
            info!(jobs = self.jobs.len(), interval = ?self.interval, "⏲️ SchedulerWorker started");
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let today = Utc::now().date_naive();
                        run_jobs_once(self.storage.as_ref(), &self.jobs, &self.retry, today).await;
                    }
                    _ = self.shutdown.recv() => {
                        debug!("🏁 SchedulerWorker: shutdown received.");
                        return Ok(());
                    }
                }
            }
        })
    }
}

/// 🔁 Run every spec once, each through the retry executor. Never fails as a whole.
pub(crate) async fn run_jobs_once(
    storage: &dyn Storage,
    jobs: &[JobSpec],
    policy: &RetryPolicy,
    today: NaiveDate,
) -> Vec<(JobSpec, JobReport)> {
    let mut reports = Vec::with_capacity(jobs.len());
    for &spec in jobs {
        let label = spec.to_string();
        let report = match retry::run(policy, &label, move || run_job(storage, spec, today)).await {
            Ok(JobOutcome::Committed(rows)) => JobReport::Committed(rows),
            Ok(JobOutcome::Skipped) => JobReport::Skipped,
            Err(err) => {
                warn!(job = %label, error = %err, "💀 job failed this round");
                JobReport::Failed(err.to_string())
            }
        };
        debug!(job = %label, ?report, "📊 job finished");
        reports.push((spec, report));
    }
    reports
}
