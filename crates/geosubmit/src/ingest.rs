//! 📮 The geosubmit entry point: one request body in, one reply out.
//!
//! 🎬 *[two envelopes arrive. one says "items". one doesn't.]*
//!
//! ```text
//!             body
//!              │
//!     non-empty "items"? ──yes──▶ batch:  normalize all ─▶ dispatch ─▶ {} or 503
//!              │
//!              no
//!              ▼
//!           single: parse ─▶ normalize ─▶ validate ─▶ -255? ─yes─▶ locate ─▶ fix or 404
//!                                  │                   │
//!                                  └─▶ 400             no ─▶ dispatch ─▶ echo coordinates back
//! ```
//!
//! The batch check MUST come first: a single report is also a (boring) batch-shaped
//! object, and plain geolocate-style clients rely on landing on the single path.
//!
//! No HTTP types in here. The `http` module turns a [`SubmitReply`] into a response.

use std::net::IpAddr;
use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::common::{Attribution, CanonicalReport, Identity};
use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::locate::{LocateQuery, Locator, Position};
use crate::metrics::{Stats, StatsBackend, names};
use crate::transforms::{NormalizeError, normalize, normalize_item};
use crate::validation::validate_single;
use crate::wire::{GeoSubmitItem, WireFormat, batch_items};

/// 📨 One inbound submission, already pulled apart from its transport.
#[derive(Debug, Clone)]
pub struct Submission {
    pub body: Value,
    pub identity: Identity,
    pub attribution: Attribution,
    pub client_addr: Option<IpAddr>,
}

/// 🎫 What to tell the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitReply {
    /// ✅ `{}`. Sent for batches even when some reports were rejected.
    Accepted,
    /// 📍 Single path: where the device is (echoed or located).
    Located(Position),
    /// 🤷 Single path: asked to locate, nothing found.
    NotFound,
    /// 🧨 Single path: the body isn't a geosubmit report at all.
    Invalid(String),
    /// 💀 Batch path: the queue refused us; the caller should retry later.
    ServiceUnavailable,
}

/// 📮 Wires normalizer, dispatcher and locator together for one request at a time.
#[derive(Debug, Clone)]
pub struct GeoSubmitService {
    dispatcher: Dispatcher,
    locator: Arc<dyn Locator>,
    stats: StatsBackend,
}

impl GeoSubmitService {
    pub fn new(dispatcher: Dispatcher, locator: Arc<dyn Locator>, stats: StatsBackend) -> Self {
        Self {
            dispatcher,
            locator,
            stats,
        }
    }

    /// 🚪 Pick the path and run it.
    pub async fn submit(&self, submission: Submission) -> SubmitReply {
        match batch_items(&submission.body) {
            Some(items) => {
                debug!(items = items.len(), "📦 batch submission");
                self.process_batch(items, &submission).await
            }
            None => {
                debug!("📄 single submission");
                self.process_single(&submission).await
            }
        }
    }

    async fn process_batch(&self, items: &[Value], submission: &Submission) -> SubmitReply {
        let reports = match items
            .iter()
            .enumerate()
            .map(|(index, raw)| normalize(index, raw, WireFormat::Batch, Utc::now()))
            .collect::<Result<Vec<CanonicalReport>, NormalizeError>>()
        {
            Ok(reports) => reports,
            Err(err) => {
                debug!(path = %err.path(), reason = err.reason(), "🧨 malformed batch item, batch dropped");
                self.stats.incr(names::UPLOAD_ERRORS, 1);
                return SubmitReply::Accepted;
            }
        };

        match self
            .dispatcher
            .dispatch(&submission.identity, &submission.attribution, reports)
            .await
        {
            DispatchOutcome::Dispatched { .. } => SubmitReply::Accepted,
            DispatchOutcome::Rejected(errors) => {
                self.stats.incr(names::UPLOAD_ERRORS, errors.len() as u64);
                SubmitReply::Accepted
            }
            DispatchOutcome::Degraded { .. } => SubmitReply::ServiceUnavailable,
        }
    }

    async fn process_single(&self, submission: &Submission) -> SubmitReply {
        let item = match GeoSubmitItem::deserialize(&submission.body) {
            Ok(item) => item,
            Err(err) => return SubmitReply::Invalid(err.to_string()),
        };
        let report = match normalize_item(0, &item, WireFormat::Single, Utc::now()) {
            Ok(report) => report,
            Err(err) => return SubmitReply::Invalid(err.to_string()),
        };

        let issues = validate_single(&report);
        if !issues.is_empty() {
            debug!(errors = issues.len(), first = %issues[0], "🧨 single report failed validation");
            return SubmitReply::Invalid(issues.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "));
        }

        // -- a locate-me report has no position to store; anything else takes the batch-of-one route
        if !item.wants_location() {
            match self
                .dispatcher
                .dispatch(&submission.identity, &submission.attribution, vec![report.clone()])
                .await
            {
                DispatchOutcome::Dispatched { .. } => {}
                DispatchOutcome::Rejected(errors) => {
                    self.stats.incr(names::UPLOAD_ERRORS, errors.len() as u64);
                }
                DispatchOutcome::Degraded { cause } => {
                    warn!(%cause, "💀 single report not queued, answering anyway");
                }
            }
            return SubmitReply::Located(Position {
                lat: item.latitude,
                lon: item.longitude,
                accuracy: item.accuracy,
            });
        }

        let query = LocateQuery {
            source: "geosubmit",
            report,
            client_addr: submission.client_addr,
            attribution: submission.attribution.clone(),
        };
        let found = match self.locator.locate(&query).await {
            Ok(found) => found,
            Err(err) => {
                warn!(error = %err, "🧭 locate failed, treating as a miss");
                None
            }
        };
        match found {
            Some(position) => SubmitReply::Located(position),
            None => {
                self.stats.incr(names::MISS, 1);
                SubmitReply::NotFound
            }
        }
    }
}
