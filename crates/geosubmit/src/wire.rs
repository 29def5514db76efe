//! 📨 Wire formats: what phones actually send us, before we tidy it up.
//!
//! Two shapes arrive at the same door:
//!
//! ```text
//!   batch:   {"items": [ {latitude, longitude, cellTowers: [...], wifiAccessPoints: [...]}, ... ]}
//!   single:  {latitude, longitude, cellTowers: [...], wifiAccessPoints: [...]}
//! ```
//!
//! The single shape is just one batch item hoisted to the top level, which is exactly
//! why batch detection has to run first. Missing numeric fields fall back to the
//! defaults below; `-255` for latitude/longitude means "no idea, please locate me".

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 🎯 The coordinate pair that means "I don't know where I am".
pub const SENTINEL_COORDINATE: f64 = -255.0;

/// 🎭 Which door the item walked through. Only used for logging and error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    Batch,
    Single,
}

impl std::fmt::Display for WireFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireFormat::Batch => f.write_str("batch"),
            WireFormat::Single => f.write_str("single"),
        }
    }
}

/// 📦 One submission item in geosubmit/geolocate camelCase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoSubmitItem {
    #[serde(default = "sentinel")]
    pub latitude: f64,
    #[serde(default = "sentinel")]
    pub longitude: f64,
    #[serde(default)]
    pub accuracy: f64,
    #[serde(default)]
    pub altitude: f64,
    #[serde(default)]
    pub altitude_accuracy: f64,
    #[serde(default = "minus_one_f64")]
    pub heading: f64,
    #[serde(default = "minus_one_f64")]
    pub speed: f64,
    /// ⏰ Epoch millis. `0` means "the phone lost track of time, use ours".
    #[serde(default, deserialize_with = "epoch_millis::deserialize")]
    pub timestamp: i64,
    #[serde(default)]
    pub radio_type: String,
    #[serde(default)]
    pub cell_towers: Vec<CellTower>,
    #[serde(default)]
    pub wifi_access_points: Vec<WifiAccessPoint>,
}

impl GeoSubmitItem {
    /// 🔍 "Locate me" is signalled by either coordinate being the sentinel.
    pub fn wants_location(&self) -> bool {
        self.latitude == SENTINEL_COORDINATE || self.longitude == SENTINEL_COORDINATE
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellTower {
    #[serde(default = "minus_one")]
    pub mobile_country_code: i32,
    #[serde(default = "minus_one")]
    pub mobile_network_code: i32,
    #[serde(default = "minus_one_i64")]
    pub location_area_code: i64,
    #[serde(default = "minus_one_i64")]
    pub cell_id: i64,
    #[serde(default)]
    pub age: i64,
    #[serde(default = "minus_one")]
    pub psc: i32,
    #[serde(default = "minus_one")]
    pub asu: i32,
    #[serde(default)]
    pub signal_strength: i32,
    #[serde(default)]
    pub timing_advance: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WifiAccessPoint {
    /// 🔒 The only required field anywhere in the format.
    pub mac_address: String,
    #[serde(default)]
    pub frequency: i32,
    #[serde(default)]
    pub channel: i32,
    #[serde(default)]
    pub signal_strength: i32,
    #[serde(default)]
    pub signal_to_noise_ratio: i32,
}

fn sentinel() -> f64 {
    SENTINEL_COORDINATE
}

fn minus_one() -> i32 {
    -1
}

fn minus_one_i64() -> i64 {
    -1
}

fn minus_one_f64() -> f64 {
    -1.0
}

/// 🔎 Returns the batch items when the body carries a non-empty `items` array.
///
/// Anything else (no key, not an array, empty array) is not a batch. A one-element
/// `items` list is still a batch.
pub fn batch_items(body: &Value) -> Option<&Vec<Value>> {
    body.get("items")
        .and_then(Value::as_array)
        .filter(|items| !items.is_empty())
}

/// ⏰ Phones send epoch millis as integers, some as floats. Both are fine.
mod epoch_millis {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Millis {
        Whole(i64),
        Fractional(f64),
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        match Millis::deserialize(deserializer)? {
            Millis::Whole(ms) => Ok(ms),
            Millis::Fractional(ms) if ms.is_finite() => Ok(ms.trunc() as i64),
            Millis::Fractional(_) => Err(serde::de::Error::custom("timestamp is not a finite number")),
        }
    }
}
