//! 🧭 Locate: "where am I?", asked on behalf of a phone that sent `-255`.
//!
//! We don't do positioning here. We forward the observations to something that does,
//! and hand back whatever it says. Same backend pattern as everywhere else: a trait,
//! the concrete locators, and an enum the config picks between.
//!
//! - [`DisabledLocator`]: always "no idea". Every locate request becomes a miss.
//! - [`HttpLocator`]: POSTs a geolocate body upstream. 200 is a fix, 404 is a miss,
//!   anything else is a [`LocateError`].

use std::net::IpAddr;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

use crate::common::{Attribution, CanonicalReport};

/// 📍 A position fix. `lon` is spelled `lng` on the HTTP response, not here.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
    pub accuracy: f64,
}

/// ❓ Everything a locator might want to know about the request.
#[derive(Debug, Clone)]
pub struct LocateQuery {
    /// 🏷️ Which API surface is asking, for upstream bookkeeping.
    pub source: &'static str,
    /// 📡 The normalized observations. Coordinates are ignored.
    pub report: CanonicalReport,
    pub client_addr: Option<IpAddr>,
    pub attribution: Attribution,
}

#[derive(Debug, Error)]
pub enum LocateError {
    #[error("locate request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("locate upstream answered {0}")]
    UnexpectedStatus(StatusCode),
}

#[async_trait]
pub trait Locator: std::fmt::Debug + Send + Sync {
    /// 🧭 `Ok(None)` means "looked, found nothing".
    async fn locate(&self, query: &LocateQuery) -> Result<Option<Position>, LocateError>;
}

/// 🙈 Never finds anything.
#[derive(Debug, Default, Clone)]
pub struct DisabledLocator;

#[async_trait]
impl Locator for DisabledLocator {
    async fn locate(&self, query: &LocateQuery) -> Result<Option<Position>, LocateError> {
        trace!(source = query.source, "🙈 locate disabled, reporting a miss");
        Ok(None)
    }
}

/// 🔧 Upstream geolocate endpoint.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct HttpLocatorConfig {
    /// 📡 Full endpoint URL, e.g. `https://locate.internal/v1/geolocate`.
    pub url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    5
}

/// 📡 Asks an upstream geolocate service over HTTP.
#[derive(Debug, Clone)]
pub struct HttpLocator {
    client: reqwest::Client,
    config: HttpLocatorConfig,
}

impl HttpLocator {
    pub fn new(config: HttpLocatorConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("💀 Could not build the HTTP client for the locate upstream. The TLS stack sends its regrets.")?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl Locator for HttpLocator {
    async fn locate(&self, query: &LocateQuery) -> Result<Option<Position>, LocateError> {
        let body = GeolocateRequest::from_report(&query.report);
        let mut request = self.client.post(&self.config.url).json(&body);
        if let Some(addr) = query.client_addr {
            request = request.header("X-Forwarded-For", addr.to_string());
        }
        if let Some(key_name) = query.attribution.logged_name() {
            request = request.header("X-Api-Key-Name", key_name);
        }

        let response = request.send().await?;
        match response.status() {
            StatusCode::OK => {
                let found: GeolocateResponse = response.json().await?;
                debug!(source = query.source, lat = found.location.lat, lng = found.location.lng, "🧭 upstream located the device");
                Ok(Some(Position {
                    lat: found.location.lat,
                    lon: found.location.lng,
                    accuracy: found.accuracy,
                }))
            }
            StatusCode::NOT_FOUND => Ok(None),
            other => Err(LocateError::UnexpectedStatus(other)),
        }
    }
}

/// 🎭 The locator the config asked for.
#[derive(Debug, Clone)]
pub enum LocatorBackend {
    Disabled(DisabledLocator),
    Http(HttpLocator),
}

#[async_trait]
impl Locator for LocatorBackend {
    async fn locate(&self, query: &LocateQuery) -> Result<Option<Position>, LocateError> {
        match self {
            LocatorBackend::Disabled(locator) => locator.locate(query).await,
            LocatorBackend::Http(locator) => locator.locate(query).await,
        }
    }
}

/// 📤 Geolocate request body, built back out of the canonical observations.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeolocateRequest {
    radio_type: String,
    cell_towers: Vec<GeolocateCell>,
    wifi_access_points: Vec<GeolocateWifi>,
    consider_ip: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeolocateCell {
    radio_type: String,
    mobile_country_code: i32,
    mobile_network_code: i32,
    location_area_code: i64,
    cell_id: i64,
    psc: i32,
    signal_strength: i32,
    timing_advance: i32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeolocateWifi {
    mac_address: String,
    frequency: i32,
    channel: i32,
    signal_strength: i32,
    signal_to_noise_ratio: i32,
}

impl GeolocateRequest {
    fn from_report(report: &CanonicalReport) -> Self {
        Self {
            radio_type: report.radio.clone(),
            cell_towers: report
                .cell
                .iter()
                .map(|cell| GeolocateCell {
                    radio_type: cell.radio.clone(),
                    mobile_country_code: cell.mcc,
                    mobile_network_code: cell.mnc,
                    location_area_code: cell.lac,
                    cell_id: cell.cid,
                    psc: cell.psc,
                    signal_strength: cell.signal,
                    timing_advance: cell.ta,
                })
                .collect(),
            wifi_access_points: report
                .wifi
                .iter()
                .map(|wifi| GeolocateWifi {
                    mac_address: wifi.key.clone(),
                    frequency: wifi.frequency,
                    channel: wifi.channel,
                    signal_strength: wifi.signal,
                    signal_to_noise_ratio: wifi.signal_to_noise_ratio,
                })
                .collect(),
            consider_ip: true,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GeolocateResponse {
    location: GeolocateLocation,
    accuracy: f64,
}

#[derive(Debug, Deserialize)]
struct GeolocateLocation {
    lat: f64,
    lng: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::a_sane_report;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn a_query() -> LocateQuery {
        LocateQuery {
            source: "geosubmit",
            report: a_sane_report(),
            client_addr: Some("10.1.2.3".parse().expect("valid ip")),
            attribution: Attribution::default(),
        }
    }

    fn a_locator_for(server: &MockServer) -> HttpLocator {
        HttpLocator::new(HttpLocatorConfig {
            url: format!("{}/v1/geolocate", server.uri()),
            timeout_secs: 5,
        })
        .expect("client builds")
    }

    #[tokio::test]
    async fn the_one_where_upstream_knows_exactly_where_we_are() {
        let the_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/geolocate"))
            .and(header("X-Forwarded-For", "10.1.2.3"))
            .and(body_partial_json(json!({
                "radioType": "gsm",
                "cellTowers": [{"mobileCountryCode": 310, "cellId": 2}],
                "wifiAccessPoints": [{"macAddress": "aa:bb:cc:dd:ee:ff"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "location": {"lat": 37.7, "lng": -122.4},
                "accuracy": 50.0
            })))
            .expect(1)
            .mount(&the_server)
            .await;

        let the_fix = a_locator_for(&the_server).locate(&a_query()).await.expect("no transport error");
        assert_eq!(
            the_fix,
            Some(Position {
                lat: 37.7,
                lon: -122.4,
                accuracy: 50.0
            })
        );
    }

    #[tokio::test]
    async fn the_one_where_upstream_shrugs_with_a_404() {
        let the_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&the_server)
            .await;

        let the_fix = a_locator_for(&the_server).locate(&a_query()).await.expect("404 is not an error");
        assert_eq!(the_fix, None);
    }

    #[tokio::test]
    async fn the_one_where_upstream_has_a_bad_day() {
        let the_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&the_server)
            .await;

        let the_error = a_locator_for(&the_server).locate(&a_query()).await.expect_err("500 is an error");
        assert!(matches!(the_error, LocateError::UnexpectedStatus(StatusCode::INTERNAL_SERVER_ERROR)));
    }

    #[tokio::test]
    async fn the_one_where_the_disabled_locator_never_finds_anything() {
        let the_backend = LocatorBackend::Disabled(DisabledLocator);
        assert_eq!(the_backend.locate(&a_query()).await.expect("never fails"), None);
    }
}
