//! 🎬 *[camera pans across a dimly lit server room]*
//! 🎬 "In a world where phones never stop reporting..."
//! 🎬 "One supervisor dared to wire them all together."
//! 🎬 *[record scratch]* 🦆
//!
//! 📦 The Supervisor builds every long-lived piece from the [`AppConfig`], starts the
//! workers, serves HTTP until told to stop, then shuts the workers down in order:
//! stop accepting requests, close the queue, let the insert worker drain, stop the
//! scheduler.
//!
//! ⚠️ Workers stay private to this module. The outside world gets the Supervisor.

mod workers;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use tracing::{info, warn};

use crate::app_config::{AppConfig, LocateConfig};
use crate::dispatch::Dispatcher;
use crate::http::{AppState, router};
use crate::ingest::GeoSubmitService;
use crate::jobs::{JobReport, JobSpec};
use crate::locate::{DisabledLocator, HttpLocator, Locator, LocatorBackend};
use crate::metrics::StatsBackend;
use crate::queue::ChannelQueue;
use crate::storage::Storage;
use workers::{InsertWorker, SchedulerWorker, Worker, run_jobs_once};

/// 📦 The Supervisor: because even async tasks need someone hovering over them
/// asking "is it done yet?" every 5 milliseconds.
pub(crate) struct Supervisor {
    app_config: AppConfig,
    storage: Arc<dyn Storage>,
    stats: StatsBackend,
}

impl Supervisor {
    pub(crate) fn new(app_config: AppConfig, storage: Arc<dyn Storage>, stats: StatsBackend) -> Self {
        Self {
            app_config,
            storage,
            stats,
        }
    }

    /// 🚀 Serve until `shutdown` resolves, then wind everything down.
    pub(crate) async fn serve(&self, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
        let config = &self.app_config;

        let (queue, queue_rx) = ChannelQueue::bounded(config.queue.capacity);
        let insert_worker = InsertWorker::new(queue_rx, Arc::clone(&self.storage), self.stats.clone()).start();

        let (scheduler_stop, scheduler_stop_rx) = async_channel::bounded::<()>(1);
        let scheduler_worker = SchedulerWorker::new(
            Arc::clone(&self.storage),
            config.scheduler.jobs.clone(),
            config.scheduler.retry.clone(),
            Duration::from_secs(config.scheduler.interval_secs),
            scheduler_stop_rx,
        )
        .start();

        let dispatcher = Dispatcher::new(Arc::new(queue.clone()), self.stats.clone(), &config.dispatch);
        let service = GeoSubmitService::new(dispatcher, self.locator()?, self.stats.clone());
        let app = router(AppState {
            service: Arc::new(service),
            api_keys: Arc::new(config.api_keys.clone()),
            max_body_bytes: config.server.max_body_bytes,
        });

        let listener = tokio::net::TcpListener::bind(config.server.bind_addr)
            .await
            .with_context(|| format!("💀 Could not bind {}. Someone else is sitting in our chair.", config.server.bind_addr))?;
        info!(addr = %config.server.bind_addr, "🌐 geosubmit listening");

        let served = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(shutdown)
            .await
            .context("💀 The HTTP server fell over mid-flight.");

        info!("🛑 HTTP server stopped, draining workers");
        queue.close();
        scheduler_stop.close();
        for (name, handle) in [("insert", insert_worker), ("scheduler", scheduler_worker)] {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(worker = name, error = %err, "💀 worker exited with an error"),
                Err(err) => warn!(worker = name, error = %err, "💀 worker task panicked or was cancelled"),
            }
        }
        served
    }

    /// 📊 Run each configured aggregation job once, right now.
    pub(crate) async fn aggregate_once(&self, today: NaiveDate) -> Vec<(JobSpec, JobReport)> {
        let scheduler = &self.app_config.scheduler;
        run_jobs_once(self.storage.as_ref(), &scheduler.jobs, &scheduler.retry, today).await
    }

    fn locator(&self) -> Result<Arc<dyn Locator>> {
        let backend = match &self.app_config.locate {
            LocateConfig::Disabled => LocatorBackend::Disabled(DisabledLocator),
            LocateConfig::Http(http) => LocatorBackend::Http(
                HttpLocator::new(http.clone()).context("💀 The locate upstream client could not be built.")?,
            ),
        };
        Ok(Arc::new(backend))
    }
}
