//! 🧵 Workers: the backbone of geosubmit, the unsung heroes, the ones who actually
//! do the work while the Supervisor takes all the credit in the sprint retro.
//!
//! Two of them:
//!
//! - [`InsertWorker`] drains the job queue into storage.
//! - [`SchedulerWorker`] wakes up on a timer and runs the aggregation jobs.
//!
//! ⚠️ "If you're reading this, the code review went poorly."

use anyhow::Result;
use tokio::task::JoinHandle;

mod insert_worker;
mod scheduler_worker;

pub(crate) use insert_worker::InsertWorker;
pub(crate) use scheduler_worker::{SchedulerWorker, run_jobs_once};

/// 🏗️ A background worker, that does work. duh.
///
/// "What's the DEAL with lifetime annotations? You borrow something,
///  you give it back. It's not that hard, Jerry!" (Seinfeld, on Rust)
pub(crate) trait Worker {
    /// 🚀 Start the worker. Returns a JoinHandle because we trust
    /// but verify. Mostly verify. Okay, we don't trust at all.
    fn start(self) -> JoinHandle<Result<()>>;
}
