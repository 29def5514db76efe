//! 🎬 *[a channel fills with chunks. somewhere, an insert worker waits.]*
//! *[the clock on the wall reads 2:47am. some of these chunks were queued at 8pm.]*
//!
//! 🗑️ The InsertWorker: patient, tireless, and deeply unbothered by the chaos
//! happening upstream. It receives jobs. It checks the expiry stamp. Stale jobs go
//! in the bin; fresh ones become rows. It asks no questions.
//!
//! A storage failure on one job is logged and counted, never fatal. The worker only
//! stops when the channel is closed and empty.

use std::sync::Arc;

use anyhow::Result;
use async_channel::Receiver;
use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::Worker;
use crate::metrics::{Stats, StatsBackend, names};
use crate::queue::Job;
use crate::storage::Storage;

/// 🗑️ Takes jobs from a channel, throws their reports into storage.
#[derive(Debug)]
pub(crate) struct InsertWorker {
    rx: Receiver<Job>,
    storage: Arc<dyn Storage>,
    stats: StatsBackend,
}

impl InsertWorker {
    pub(crate) fn new(rx: Receiver<Job>, storage: Arc<dyn Storage>, stats: StatsBackend) -> Self {
        Self { rx, storage, stats }
    }

    /// 📥 One job, start to finish. Never fails the worker.
    async fn insert(&self, job: Job) {
        let now = Utc::now();
        if job.is_expired(now) {
            warn!(expired_at = %job.expires_at, "⏰ job went stale in the queue, discarding");
            self.stats.incr(names::DROPPED_EXPIRED, 1);
            return;
        }

        let reports = match job.reports() {
            Ok(reports) => reports,
            Err(err) => {
                warn!(error = %err, "💀 job payload is not a list of reports, discarding");
                self.stats.incr(names::INSERT_ERRORS, 1);
                return;
            }
        };

        let written = async {
            let mut session = self.storage.begin().await?;
            session.add_reports(now, &reports);
            session.commit().await
        }
        .await;

        match written {
            Ok(()) => {
                debug!(reports = reports.len(), nickname = %job.nickname, "🪣 chunk stored");
                self.stats.incr(names::INSERTED, reports.len() as u64);
            }
            Err(err) => {
                warn!(error = %err, reports = reports.len(), "💀 chunk could not be stored");
                self.stats.incr(names::INSERT_ERRORS, 1);
            }
        }
    }
}

impl Worker for InsertWorker {
    fn start(self) -> JoinHandle<Result<()>> {
        tokio::spawn(async move {
            debug!("📥 InsertWorker started draining the queue...");
            while let Ok(job) = self.rx.recv().await {
                self.insert(job).await;
            }
            // -- channel is empty and closed
            debug!("🏁 InsertWorker: queue closed. Shutting down.");
            Ok(())
        })
    }
}
