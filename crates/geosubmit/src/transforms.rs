//! 🔄 Transforms: the Rosetta Stone between what phones send and what we store 🎭
//!
//! ```text
//!   Wire formats                       Canonical
//!  ┌────────────────────┐          ┌───────────────────┐
//!  │ batch item         │──┐       │ lat / lon / time  │
//!  ├────────────────────┤  ├──────▶│ radio, heading... │
//!  │ single report      │──┘       │ cell[] / wifi[]   │
//!  └────────────────────┘          └───────────────────┘
//! ```
//!
//! Pure functions, no I/O. The only outside input is `now`, handed in by the caller,
//! which replaces a zero timestamp. Range checks are NOT done here; that is the
//! validator's job downstream. 🦆

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::common::{CanonicalReport, CellObservation, WifiObservation};
use crate::wire::{GeoSubmitItem, WireFormat};

/// 💀 The item could not even be read as a submission.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum NormalizeError {
    #[error("malformed {format} report at index {index}: {reason}")]
    MalformedReport {
        format: WireFormat,
        index: usize,
        reason: String,
    },
}

impl NormalizeError {
    /// 📍 Where in the request body the bad item lives, for the error list.
    pub fn path(&self) -> String {
        match self {
            NormalizeError::MalformedReport {
                format: WireFormat::Batch,
                index,
                ..
            } => format!("items[{index}]"),
            NormalizeError::MalformedReport {
                format: WireFormat::Single,
                ..
            } => String::new(),
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            NormalizeError::MalformedReport { reason, .. } => reason,
        }
    }
}

/// 📥 Parse one raw item and normalize it. Missing required fields → `MalformedReport`.
pub fn normalize(
    index: usize,
    raw: &Value,
    format: WireFormat,
    now: DateTime<Utc>,
) -> Result<CanonicalReport, NormalizeError> {
    let item: GeoSubmitItem =
        GeoSubmitItem::deserialize(raw).map_err(|err| NormalizeError::MalformedReport {
            format,
            index,
            reason: err.to_string(),
        })?;
    normalize_item(index, &item, format, now)
}

/// 🔧 Map an already parsed item onto the canonical shape.
pub fn normalize_item(
    index: usize,
    item: &GeoSubmitItem,
    format: WireFormat,
    now: DateTime<Utc>,
) -> Result<CanonicalReport, NormalizeError> {
    let time = resolve_timestamp(item.timestamp, now).ok_or_else(|| NormalizeError::MalformedReport {
        format,
        index,
        reason: format!("timestamp {} is outside the representable range", item.timestamp),
    })?;

    // -- every tower inherits the item-level radio, towers don't get a say
    let cell = item
        .cell_towers
        .iter()
        .map(|tower| CellObservation {
            radio: item.radio_type.clone(),
            mcc: tower.mobile_country_code,
            mnc: tower.mobile_network_code,
            lac: tower.location_area_code,
            cid: tower.cell_id,
            psc: tower.psc,
            asu: tower.asu,
            signal: tower.signal_strength,
            ta: tower.timing_advance,
        })
        .collect();

    let wifi = item
        .wifi_access_points
        .iter()
        .map(|ap| WifiObservation {
            key: ap.mac_address.clone(),
            frequency: ap.frequency,
            channel: ap.channel,
            signal: ap.signal_strength,
            signal_to_noise_ratio: ap.signal_to_noise_ratio,
        })
        .collect();

    Ok(CanonicalReport {
        lat: item.latitude,
        lon: item.longitude,
        time,
        accuracy: item.accuracy,
        altitude: item.altitude,
        altitude_accuracy: item.altitude_accuracy,
        radio: item.radio_type.clone(),
        heading: item.heading,
        speed: item.speed,
        cell,
        wifi,
    })
}

/// ⏰ Zero means "use receipt time". Anything else is taken at its word.
fn resolve_timestamp(epoch_millis: i64, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if epoch_millis == 0 {
        return Some(now);
    }
    DateTime::<Utc>::from_timestamp_millis(epoch_millis)
}
