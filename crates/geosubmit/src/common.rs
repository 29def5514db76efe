//! 📦 Common data structures, the building blocks of geosubmit
//!
//! 🎬 COLD OPEN. EXT. A HIGHWAY SOMEWHERE, 3:47 AM
//!
//! A phone in a cupholder hears four cell towers and eleven Wi-Fi networks.
//! It writes them down, stamps a GPS fix on the page, and mails it to us.
//! Some phones send one page. Some send a hundred. Some forget what time it is
//! and send a timestamp of zero. We take them all.
//!
//! Everything that crosses the wire ends up as a [`CanonicalReport`]. The rest of
//! the crate only ever speaks that shape. 🦆

use chrono::{DateTime, NaiveDate, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::validation::{ReportRules, is_known_radio, latitude, longitude, non_empty_key};

/// 📡 The one shape every submission format converges on before dispatch.
///
/// Created by the normalizer, never mutated afterwards. Once it is serialized into
/// a chunk, the queue owns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[garde(context(ReportRules))]
pub struct CanonicalReport {
    #[garde(custom(latitude))]
    pub lat: f64,
    #[garde(custom(longitude))]
    pub lon: f64,
    /// ⏰ Always a concrete instant. A zero timestamp was already swapped for "now".
    #[garde(skip)]
    #[serde(with = "iso8601")]
    pub time: DateTime<Utc>,
    #[garde(range(min = 0.0))]
    pub accuracy: f64,
    #[garde(skip)]
    pub altitude: f64,
    #[garde(range(min = 0.0))]
    pub altitude_accuracy: f64,
    #[garde(custom(is_known_radio))]
    pub radio: String,
    #[garde(range(min = -1.0, max = 360.0))]
    pub heading: f64,
    #[garde(range(min = -1.0))]
    pub speed: f64,
    #[garde(dive)]
    pub cell: Vec<CellObservation>,
    #[garde(dive)]
    pub wifi: Vec<WifiObservation>,
}

/// 🗼 One cell tower as heard by the device. Towers may repeat within a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[garde(context(ReportRules))]
pub struct CellObservation {
    /// 🔧 Inherited from the item-level radio type, not from the tower itself.
    #[garde(custom(is_known_radio))]
    pub radio: String,
    #[garde(range(min = -1, max = 999))]
    pub mcc: i32,
    #[garde(range(min = -1, max = 32767))]
    pub mnc: i32,
    #[garde(range(min = -1))]
    pub lac: i64,
    #[garde(range(min = -1))]
    pub cid: i64,
    #[garde(skip)]
    pub psc: i32,
    #[garde(skip)]
    pub asu: i32,
    #[garde(skip)]
    pub signal: i32,
    #[garde(skip)]
    pub ta: i32,
}

/// 📶 One Wi-Fi access point. The key is whatever MAC the caller gave us.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[garde(context(ReportRules))]
pub struct WifiObservation {
    #[garde(custom(non_empty_key))]
    pub key: String,
    #[garde(skip)]
    pub frequency: i32,
    #[garde(skip)]
    pub channel: i32,
    #[garde(skip)]
    pub signal: i32,
    #[serde(rename = "signalToNoiseRatio")]
    #[garde(skip)]
    pub signal_to_noise_ratio: i32,
}

/// 🪪 Who sent this, as far as they cared to tell us. Both fields may be empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub nickname: String,
    pub email: String,
}

/// 🏷️ Whether the traffic came from a known API key that wants its own metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribution {
    pub api_key_log: bool,
    pub api_key_name: Option<String>,
}

impl Attribution {
    /// 🎯 The key name to namespace metrics under, only when logging is switched on.
    pub fn logged_name(&self) -> Option<&str> {
        if self.api_key_log {
            self.api_key_name.as_deref()
        } else {
            None
        }
    }
}

/// 📊 The four statistics the aggregation jobs know how to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatName {
    Location,
    Cell,
    Wifi,
    UniqueWifi,
}

impl StatName {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatName::Location => "location",
            StatName::Cell => "cell",
            StatName::Wifi => "wifi",
            StatName::UniqueWifi => "unique_wifi",
        }
    }
}

impl std::fmt::Display for StatName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 📅 One counter for one day. At most one per `(name, day)`; storage enforces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyStatistic {
    pub name: StatName,
    pub day: NaiveDate,
    pub value: u64,
}

/// ⏰ ISO-8601 with an explicit `+00:00` offset. Sub-second digits only when they exist.
pub(crate) mod iso8601 {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub(crate) fn render(time: &DateTime<Utc>) -> String {
        time.to_rfc3339_opts(SecondsFormat::AutoSi, false)
    }

    pub(crate) fn serialize<S: Serializer>(time: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&render(time))
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|parsed| parsed.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn the_one_where_the_timestamp_wears_its_offset_proudly() {
        let the_instant = Utc.timestamp_millis_opt(1_405_602_028_568).single().expect("valid instant");
        assert_eq!(iso8601::render(&the_instant), "2014-07-17T13:00:28.568+00:00");

        let the_round_instant = Utc.timestamp_millis_opt(1_405_602_028_000).single().expect("valid instant");
        assert_eq!(iso8601::render(&the_round_instant), "2014-07-17T13:00:28+00:00");
    }

    #[test]
    fn the_one_where_attribution_only_speaks_when_asked_to_log() {
        let the_quiet_key = Attribution {
            api_key_log: false,
            api_key_name: Some("shy".to_string()),
        };
        let the_loud_key = Attribution {
            api_key_log: true,
            api_key_name: Some("loud".to_string()),
        };
        assert_eq!(the_quiet_key.logged_name(), None);
        assert_eq!(the_loud_key.logged_name(), Some("loud"));
        assert_eq!(Attribution::default().logged_name(), None);
    }

    #[test]
    fn the_one_where_wifi_keeps_its_camel_case_snr() {
        let the_wifi = WifiObservation {
            key: "aa:bb:cc:dd:ee:ff".to_string(),
            frequency: 2412,
            channel: 1,
            signal: -70,
            signal_to_noise_ratio: 12,
        };
        let the_json = serde_json::to_value(&the_wifi).expect("serializes");
        assert_eq!(the_json["signalToNoiseRatio"], 12);
    }
}
