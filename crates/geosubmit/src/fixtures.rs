//! 🧪 Test fixtures shared across modules. Never compiled outside `cargo test`.

use chrono::{DateTime, Utc};

use crate::common::{CanonicalReport, CellObservation, WifiObservation};

/// 📡 A report that passes every rule. Mutate it to break exactly one thing.
pub(crate) fn a_sane_report() -> CanonicalReport {
    a_sane_report_at(Utc::now())
}

pub(crate) fn a_sane_report_at(time: DateTime<Utc>) -> CanonicalReport {
    CanonicalReport {
        lat: 37.7,
        lon: -122.4,
        time,
        accuracy: 10.0,
        altitude: 0.0,
        altitude_accuracy: 0.0,
        radio: "gsm".to_string(),
        heading: -1.0,
        speed: -1.0,
        cell: vec![CellObservation {
            radio: "gsm".to_string(),
            mcc: 310,
            mnc: 410,
            lac: 1,
            cid: 2,
            psc: -1,
            asu: -1,
            signal: 0,
            ta: 0,
        }],
        wifi: vec![WifiObservation {
            key: "aa:bb:cc:dd:ee:ff".to_string(),
            frequency: 0,
            channel: 0,
            signal: 0,
            signal_to_noise_ratio: 0,
        }],
    }
}

/// 🔢 `n` sane reports, each tagged with its position via `accuracy` so order is checkable.
pub(crate) fn numbered_reports(n: usize) -> Vec<CanonicalReport> {
    (0..n)
        .map(|i| {
            let mut report = a_sane_report();
            report.accuracy = i as f64;
            report
        })
        .collect()
}

/// 🧭 A locator with its answer decided in advance. Counts how often it was asked.
#[derive(Debug, Default)]
pub(crate) struct FixedLocator {
    pub(crate) answer: Option<crate::locate::Position>,
    pub(crate) calls: std::sync::atomic::AtomicUsize,
}

impl FixedLocator {
    pub(crate) fn answering(answer: Option<crate::locate::Position>) -> Self {
        Self {
            answer,
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl crate::locate::Locator for FixedLocator {
    async fn locate(
        &self,
        _query: &crate::locate::LocateQuery,
    ) -> Result<Option<crate::locate::Position>, crate::locate::LocateError> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(self.answer)
    }
}
