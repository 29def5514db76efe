//! ✉️ Queue: where chunks go to wait for an insert worker.
//!
//! ```text
//!   Dispatcher ──try_send──▶ [ async-channel, bounded ] ──recv──▶ InsertWorker
//! ```
//!
//! Submission never waits. A full channel and a closed channel both come back as
//! errors immediately, and the dispatcher decides what that means for the caller.
//! A batch of chunks goes in whole or not at all.

use std::sync::Arc;
use std::time::Duration;

use async_channel::{Receiver, Sender, TrySendError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::common::CanonicalReport;

/// 🏷️ The only job this pipeline knows how to run.
pub const INSERT_MEASURES: &str = "insert_measures";

/// 📦 One chunk of reports plus who sent it and when it goes stale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub name: String,
    pub nickname: String,
    pub email: String,
    /// 🧾 The chunk as a JSON array of canonical reports, in batch order.
    pub items: String,
    pub api_key_log: bool,
    pub api_key_name: Option<String>,
    /// ⏰ Past this instant the job is discarded, not run.
    pub expires_at: DateTime<Utc>,
}

impl Job {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// 📥 Unpack the chunk back into reports.
    pub fn reports(&self) -> serde_json::Result<Vec<CanonicalReport>> {
        serde_json::from_str(&self.items)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// 💀 Nobody is listening on the other end anymore.
    #[error("job queue is unavailable")]
    Unavailable,
    /// 🚧 Backlog hit its cap.
    #[error("job queue is full")]
    Full,
}

/// 📮 Somewhere jobs can be dropped off without waiting for them to run.
#[async_trait]
pub trait JobQueue: std::fmt::Debug + Send + Sync {
    /// 🚀 Enqueue one job. It stops being runnable after `ttl`.
    async fn submit(&self, job: Job, ttl: Duration) -> Result<(), QueueError>;

    /// 📦 Enqueue every job or none of them.
    async fn submit_all(&self, jobs: Vec<Job>, ttl: Duration) -> Result<(), QueueError>;
}

/// ✉️ In-process queue on a bounded `async-channel`.
#[derive(Debug, Clone)]
pub struct ChannelQueue {
    tx: Sender<Job>,
    /// 🚪 One sender at a time, so "is there room for all of these" stays true while we load.
    loading: Arc<Mutex<()>>,
}

impl ChannelQueue {
    /// 🏗️ A queue and the receiving end the insert worker drains.
    pub fn bounded(capacity: usize) -> (Self, Receiver<Job>) {
        let (tx, rx) = async_channel::bounded(capacity.max(1));
        (
            Self {
                tx,
                loading: Arc::new(Mutex::new(())),
            },
            rx,
        )
    }

    /// 📏 Free slots right now. Receivers only ever make this bigger.
    pub fn room(&self) -> usize {
        self.tx.capacity().unwrap_or(usize::MAX).saturating_sub(self.tx.len())
    }

    fn try_send(&self, job: Job) -> Result<(), QueueError> {
        self.tx.try_send(job).map_err(|err| match err {
            TrySendError::Full(_) => QueueError::Full,
            TrySendError::Closed(_) => QueueError::Unavailable,
        })
    }

    /// 🔒 Stop accepting jobs. Workers drain what is left and exit.
    pub fn close(&self) -> bool {
        self.tx.close()
    }
}

#[async_trait]
impl JobQueue for ChannelQueue {
    async fn submit(&self, job: Job, _ttl: Duration) -> Result<(), QueueError> {
        // -- expiry already rides on the job itself; the channel has no notion of time
        let _loading = self.loading.lock().await;
        self.try_send(job)
    }

    async fn submit_all(&self, jobs: Vec<Job>, _ttl: Duration) -> Result<(), QueueError> {
        let _loading = self.loading.lock().await;
        if self.tx.is_closed() {
            return Err(QueueError::Unavailable);
        }
        if self.room() < jobs.len() {
            return Err(QueueError::Full);
        }
        for job in jobs {
            self.try_send(job)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn a_job(expires_at: DateTime<Utc>) -> Job {
        Job {
            name: INSERT_MEASURES.to_string(),
            nickname: String::new(),
            email: String::new(),
            items: "[]".to_string(),
            api_key_log: false,
            api_key_name: None,
            expires_at,
        }
    }

    #[tokio::test]
    async fn the_one_where_a_job_lands_in_the_channel() {
        let (the_queue, the_rx) = ChannelQueue::bounded(4);
        the_queue
            .submit(a_job(Utc::now()), Duration::from_secs(60))
            .await
            .expect("room in the queue");
        let the_job = the_rx.recv().await.expect("job arrives");
        assert_eq!(the_job.name, INSERT_MEASURES);
        assert!(the_job.reports().expect("empty chunk parses").is_empty());
    }

    #[tokio::test]
    async fn the_one_where_a_full_queue_says_so_immediately() {
        let (the_queue, _the_rx) = ChannelQueue::bounded(1);
        let ttl = Duration::from_secs(60);
        the_queue.submit(a_job(Utc::now()), ttl).await.expect("first fits");
        assert_eq!(the_queue.submit(a_job(Utc::now()), ttl).await, Err(QueueError::Full));
    }

    #[tokio::test]
    async fn the_one_where_a_closed_queue_is_unavailable() {
        let (the_queue, the_rx) = ChannelQueue::bounded(4);
        drop(the_rx);
        assert_eq!(
            the_queue.submit(a_job(Utc::now()), Duration::from_secs(60)).await,
            Err(QueueError::Unavailable)
        );
    }

    #[tokio::test]
    async fn the_one_where_a_batch_that_does_not_fit_leaves_no_crumbs() {
        let (the_queue, the_rx) = ChannelQueue::bounded(3);
        let ttl = Duration::from_secs(60);
        the_queue.submit(a_job(Utc::now()), ttl).await.expect("first fits");
        assert_eq!(the_queue.room(), 2);

        let the_three = vec![a_job(Utc::now()), a_job(Utc::now()), a_job(Utc::now())];
        assert_eq!(the_queue.submit_all(the_three, ttl).await, Err(QueueError::Full));
        assert_eq!(the_rx.len(), 1, "nothing from the refused batch got in");

        let the_two = vec![a_job(Utc::now()), a_job(Utc::now())];
        the_queue.submit_all(the_two, ttl).await.expect("exactly enough room");
        assert_eq!(the_rx.len(), 3);
    }

    #[tokio::test]
    async fn the_one_where_a_closed_queue_refuses_a_whole_batch() {
        let (the_queue, the_rx) = ChannelQueue::bounded(4);
        the_queue.close();
        assert_eq!(
            the_queue.submit_all(vec![a_job(Utc::now())], Duration::from_secs(60)).await,
            Err(QueueError::Unavailable)
        );
        assert!(the_rx.is_empty());
    }

    #[test]
    fn the_one_where_stale_jobs_know_they_are_stale() {
        let now = Utc::now();
        assert!(a_job(now - ChronoDuration::seconds(1)).is_expired(now));
        assert!(!a_job(now + ChronoDuration::hours(6)).is_expired(now));
    }
}
