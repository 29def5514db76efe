//! 🚚 Dispatch: validated reports in, chunked jobs out.
//!
//! 🎬 *[a batch of 250 reports arrives at the loading dock]*
//! *[the dispatcher counts them, cuts them into three boxes, stamps an expiry on each]*
//! *[the truck only has room for two. none of the boxes go.]*
//!
//! ```text
//!   reports ──▶ validate ──▶ metrics ──▶ chunk(100) ──▶ queue.submit_all(⌈N/100⌉ jobs)
//!                  │                                         │
//!                  └─▶ Rejected(errors)                      └─▶ Degraded (nothing queued)
//! ```
//!
//! Submission is fire-and-forget. Chunks keep batch order internally; nothing
//! promises they are processed in order relative to each other.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, trace, warn};

use crate::app_config::DispatchConfig;
use crate::common::{Attribution, CanonicalReport, Identity};
use crate::metrics::{Stats, StatsBackend, names};
use crate::queue::{INSERT_MEASURES, Job, JobQueue, QueueError};
use crate::validation::{ValidationIssue, validate_batch};

/// 🎫 How a dispatch attempt ended.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// ✅ Every chunk made it onto the queue.
    Dispatched { chunks: usize },
    /// 🛂 Schema said no. Nothing was queued, no metrics were emitted.
    Rejected(Vec<ValidationIssue>),
    /// 💀 The queue refused the batch. No chunk of it was queued.
    Degraded { cause: QueueError },
}

impl DispatchOutcome {
    /// 📝 The validation complaints, if any. Empty for both success and degraded.
    pub fn errors(&self) -> &[ValidationIssue] {
        match self {
            DispatchOutcome::Rejected(errors) => errors,
            _ => &[],
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, DispatchOutcome::Degraded { .. })
    }
}

/// 🚚 Cuts batches into jobs and hands them to a [`JobQueue`].
#[derive(Debug, Clone)]
pub struct Dispatcher {
    queue: Arc<dyn JobQueue>,
    stats: StatsBackend,
    chunk_size: usize,
    ttl: Duration,
}

impl Dispatcher {
    pub fn new(queue: Arc<dyn JobQueue>, stats: StatsBackend, config: &DispatchConfig) -> Self {
        Self {
            queue,
            stats,
            chunk_size: config.chunk_size.max(1),
            ttl: Duration::from_secs(config.job_ttl_secs),
        }
    }

    /// 🚀 Validate, count, chunk and submit. The chunks go onto the queue together or not at all.
    pub async fn dispatch(
        &self,
        identity: &Identity,
        attribution: &Attribution,
        reports: Vec<CanonicalReport>,
    ) -> DispatchOutcome {
        let validated = validate_batch(reports);
        if !validated.is_valid() {
            debug!(errors = validated.errors.len(), "🛂 batch failed validation, nothing dispatched");
            return DispatchOutcome::Rejected(validated.errors);
        }
        let reports = validated.data;
        let length = reports.len() as u64;

        self.stats.incr(names::BATCHES, 1);
        self.stats.timing(names::BATCH_SIZE, length);
        if let Some(key_name) = attribution.logged_name() {
            self.stats.incr(&names::api_key_batches(key_name), 1);
            self.stats.timing(&names::api_key_batch_size(key_name), length);
        }

        let expires_at = self.expiry_from(Utc::now());
        let mut jobs = Vec::with_capacity(reports.len().div_ceil(self.chunk_size));
        for chunk in reports.chunks(self.chunk_size) {
            let items = match serde_json::to_string(chunk) {
                Ok(items) => items,
                Err(err) => {
                    return DispatchOutcome::Rejected(vec![ValidationIssue {
                        path: "items".to_string(),
                        message: format!("chunk could not be serialized: {err}"),
                    }]);
                }
            };
            trace!(chunk = jobs.len() + 1, size = chunk.len(), "📦 chunk packed");
            jobs.push(Job {
                name: INSERT_MEASURES.to_string(),
                nickname: identity.nickname.clone(),
                email: identity.email.clone(),
                items,
                api_key_log: attribution.api_key_log,
                api_key_name: attribution.api_key_name.clone(),
                expires_at,
            });
        }

        let chunks = jobs.len();
        if let Err(cause) = self.queue.submit_all(jobs, self.ttl).await {
            warn!(chunks, %cause, "💀 queue refused the batch, nothing dispatched");
            return DispatchOutcome::Degraded { cause };
        }

        debug!(reports = length, chunks, "🚚 batch dispatched");
        DispatchOutcome::Dispatched { chunks }
    }

    fn expiry_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        TimeDelta::from_std(self.ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}
