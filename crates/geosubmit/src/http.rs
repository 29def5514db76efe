//! 🌐 HTTP surface: one route, two body shapes, five possible answers.
//!
//! ```text
//!   POST /v1/geosubmit?key=<api key>
//!     headers: X-Nickname, X-Email (optional), Content-Encoding: gzip (optional)
//!
//!   200 {}                                          batch accepted
//!   200 {"location":{"lat","lng"},"accuracy"}      single report answered
//!   400 parse error body                            not JSON / not a report
//!   404 not-found body                              locate came back empty
//!   503                                             queue unavailable (batch only)
//! ```
//!
//! This module only translates between HTTP and [`Submission`] / [`SubmitReply`].
//! Everything interesting happens in [`crate::ingest`].

use std::collections::HashMap;
use std::io::Read;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{ConnectInfo, DefaultBodyLimit, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use flate2::read::GzDecoder;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use crate::app_config::ApiKeyConfig;
use crate::common::{Attribution, Identity};
use crate::ingest::{GeoSubmitService, SubmitReply, Submission};

/// 🤷 Fixed body for "we looked and found nothing".
pub const NOT_FOUND_BODY: &str = r#"{"error": {"errors": [{"domain": "geolocation", "reason": "notFound", "message": "Not found"}], "code": 404, "message": "Not found"}}"#;

/// 🧨 Fixed body for "that wasn't something we can read".
pub const PARSE_ERROR_BODY: &str = r#"{"error": {"errors": [{"domain": "global", "reason": "parseError", "message": "Parse Error"}], "code": 400, "message": "Parse Error"}}"#;

/// 🧰 What every request handler gets to share.
#[derive(Debug, Clone)]
pub struct AppState {
    pub service: Arc<GeoSubmitService>,
    pub api_keys: Arc<HashMap<String, ApiKeyConfig>>,
    pub max_body_bytes: usize,
}

/// 🗺️ The whole public surface.
pub fn router(state: AppState) -> Router {
    let max_body_bytes = state.max_body_bytes;
    Router::new()
        .route("/v1/geosubmit", post(geosubmit_handler))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct KeyParams {
    key: Option<String>,
}

#[instrument(skip_all, fields(bytes = body.len()))]
async fn geosubmit_handler(
    State(state): State<AppState>,
    Query(params): Query<KeyParams>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let body = match decode_body(&headers, &body, state.max_body_bytes) {
        Ok(body) => body,
        Err(reason) => {
            debug!(%reason, "🧨 unreadable request body");
            return SubmitReply::Invalid(reason).into_response();
        }
    };

    let submission = Submission {
        body,
        identity: Identity {
            nickname: header_text(&headers, "X-Nickname"),
            email: header_text(&headers, "X-Email"),
        },
        attribution: attribution_for(&state.api_keys, params.key.as_deref()),
        client_addr: client_addr(&headers, connect_info.map(|ConnectInfo(addr)| addr)),
    };

    state.service.submit(submission).await.into_response()
}

impl IntoResponse for SubmitReply {
    fn into_response(self) -> Response {
        match self {
            SubmitReply::Accepted => (StatusCode::OK, Json(json!({}))).into_response(),
            SubmitReply::Located(position) => (
                StatusCode::OK,
                Json(json!({
                    "location": {"lat": position.lat, "lng": position.lon},
                    "accuracy": position.accuracy,
                })),
            )
                .into_response(),
            SubmitReply::NotFound => fixed_json(StatusCode::NOT_FOUND, NOT_FOUND_BODY),
            SubmitReply::Invalid(_) => fixed_json(StatusCode::BAD_REQUEST, PARSE_ERROR_BODY),
            SubmitReply::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE.into_response(),
        }
    }
}

fn fixed_json(status: StatusCode, body: &'static str) -> Response {
    (status, [(header::CONTENT_TYPE, "application/json")], body).into_response()
}

/// 📥 Inflate if gzipped, then parse. An empty body reads as `{}`.
fn decode_body(headers: &HeaderMap, raw: &Bytes, limit: usize) -> Result<Value, String> {
    let gzipped = headers
        .get(header::CONTENT_ENCODING)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|encoding| encoding.eq_ignore_ascii_case("gzip"));

    let bytes = if gzipped {
        let mut inflated = Vec::new();
        GzDecoder::new(raw.as_ref())
            .take(limit as u64 + 1)
            .read_to_end(&mut inflated)
            .map_err(|err| format!("gzip body could not be inflated: {err}"))?;
        if inflated.len() > limit {
            return Err(format!("inflated body exceeds {limit} bytes"));
        }
        inflated
    } else {
        raw.to_vec()
    };

    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(json!({}));
    }
    serde_json::from_slice(&bytes).map_err(|err| err.to_string())
}

/// 🪪 Free-text header, lossy-decoded. Missing means empty.
fn header_text(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
        .unwrap_or_default()
}

/// 🏷️ Known key → its name and logging flag. Unknown or missing keys are anonymous.
fn attribution_for(api_keys: &HashMap<String, ApiKeyConfig>, key: Option<&str>) -> Attribution {
    match key.and_then(|key| api_keys.get(key)) {
        Some(known) => Attribution {
            api_key_log: known.log,
            api_key_name: Some(known.name.clone()),
        },
        None => Attribution::default(),
    }
}

/// 🌍 First hop in `X-Forwarded-For` if present and parseable, else the socket peer.
fn client_addr(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<IpAddr> {
    headers
        .get("X-Forwarded-For")
        .and_then(|value| value.to_str().ok())
        .and_then(|forwarded| forwarded.split(',').next())
        .and_then(|first| first.trim().parse().ok())
        .or_else(|| peer.map(|addr| addr.ip()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_config::DispatchConfig;
    use crate::dispatch::Dispatcher;
    use crate::fixtures::FixedLocator;
    use crate::locate::Position;
    use crate::metrics::{InMemoryStats, StatsBackend, names};
    use crate::queue::{ChannelQueue, Job};
    use async_channel::Receiver;
    use axum::body::Body;
    use axum::http::Request;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;
    use tower::ServiceExt;

    struct Rig {
        app: Router,
        rx: Receiver<Job>,
        stats: InMemoryStats,
    }

    fn a_rig(answer: Option<Position>) -> Rig {
        let (queue, rx) = ChannelQueue::bounded(64);
        let stats = InMemoryStats::new();
        let dispatcher = Dispatcher::new(
            Arc::new(queue),
            StatsBackend::InMemory(stats.clone()),
            &DispatchConfig::default(),
        );
        let service = GeoSubmitService::new(
            dispatcher,
            Arc::new(FixedLocator::answering(answer)),
            StatsBackend::InMemory(stats.clone()),
        );
        let mut api_keys = HashMap::new();
        api_keys.insert(
            "abc123".to_string(),
            ApiKeyConfig {
                name: "acme".to_string(),
                log: true,
            },
        );
        let app = router(AppState {
            service: Arc::new(service),
            api_keys: Arc::new(api_keys),
            max_body_bytes: 64 * 1024,
        });
        Rig { app, rx, stats }
    }

    fn a_post(uri: &str, body: impl Into<Body>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body.into())
            .expect("request builds")
    }

    async fn read_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body reads");
        serde_json::from_slice(&bytes).expect("body is JSON")
    }

    fn a_batch_body() -> String {
        json!({"items": [{
            "latitude": 51.5, "longitude": -0.12, "accuracy": 10.0,
            "radioType": "gsm",
            "cellTowers": [{"mobileCountryCode": 234, "mobileNetworkCode": 10, "locationAreaCode": 1, "cellId": 9}]
        }]})
        .to_string()
    }

    #[tokio::test]
    async fn the_one_where_a_batch_gets_an_empty_object_and_a_job() {
        let the_rig = a_rig(None);
        let the_request = Request::builder()
            .method("POST")
            .uri("/v1/geosubmit?key=abc123")
            .header("X-Nickname", "roadrunner")
            .header("X-Email", "beep@beep.test")
            .body(Body::from(a_batch_body()))
            .expect("request builds");

        let the_response = the_rig.app.oneshot(the_request).await.expect("infallible");
        assert_eq!(the_response.status(), StatusCode::OK);
        assert_eq!(read_json(the_response).await, json!({}));

        let the_job = the_rig.rx.try_recv().expect("one job queued");
        assert_eq!(the_job.nickname, "roadrunner");
        assert_eq!(the_job.email, "beep@beep.test");
        assert_eq!(the_job.api_key_name.as_deref(), Some("acme"));
        assert_eq!(the_rig.stats.counter(&names::api_key_batches("acme")), 1);
    }

    #[tokio::test]
    async fn the_one_where_the_locate_me_request_gets_a_location_shaped_answer() {
        let the_rig = a_rig(Some(Position {
            lat: 37.7,
            lon: -122.4,
            accuracy: 50.0,
        }));
        let the_body = json!({
            "latitude": -255, "longitude": -255,
            "wifiAccessPoints": [{"macAddress": "aa:bb:cc:dd:ee:ff"}, {"macAddress": "aa:bb:cc:dd:ee:00"}]
        });

        let the_response = the_rig
            .app
            .oneshot(a_post("/v1/geosubmit", the_body.to_string()))
            .await
            .expect("infallible");
        assert_eq!(the_response.status(), StatusCode::OK);
        assert_eq!(
            read_json(the_response).await,
            json!({"location": {"lat": 37.7, "lng": -122.4}, "accuracy": 50.0})
        );
    }

    #[tokio::test]
    async fn the_one_where_nobody_knows_where_the_phone_is() {
        let the_rig = a_rig(None);
        let the_response = the_rig
            .app
            .oneshot(a_post("/v1/geosubmit", r#"{"latitude": -255, "longitude": -255}"#))
            .await
            .expect("infallible");
        assert_eq!(the_response.status(), StatusCode::NOT_FOUND);
        let the_expected: Value = serde_json::from_str(NOT_FOUND_BODY).expect("fixed body is JSON");
        assert_eq!(read_json(the_response).await, the_expected);
        assert_eq!(the_rig.stats.counter(names::MISS), 1);
    }

    #[tokio::test]
    async fn the_one_where_garbage_in_means_parse_error_out() {
        let the_rig = a_rig(None);
        let the_response = the_rig
            .app
            .oneshot(a_post("/v1/geosubmit", "{this is not json"))
            .await
            .expect("infallible");
        assert_eq!(the_response.status(), StatusCode::BAD_REQUEST);
        let the_expected: Value = serde_json::from_str(PARSE_ERROR_BODY).expect("fixed body is JSON");
        assert_eq!(read_json(the_response).await, the_expected);
    }

    #[tokio::test]
    async fn the_one_where_a_single_report_off_the_map_gets_a_400() {
        let the_rig = a_rig(None);
        let the_response = the_rig
            .app
            .oneshot(a_post("/v1/geosubmit", r#"{"latitude": 95, "longitude": 2}"#))
            .await
            .expect("infallible");
        assert_eq!(the_response.status(), StatusCode::BAD_REQUEST);
        let the_expected: Value = serde_json::from_str(PARSE_ERROR_BODY).expect("fixed body is JSON");
        assert_eq!(read_json(the_response).await, the_expected);
        assert!(the_rig.rx.is_empty());
    }

    #[tokio::test]
    async fn the_one_where_a_gzipped_batch_is_inflated_first() {
        let the_rig = a_rig(None);
        let mut the_encoder = GzEncoder::new(Vec::new(), Compression::default());
        the_encoder
            .write_all(a_batch_body().as_bytes())
            .expect("compresses");
        let the_gzipped = the_encoder.finish().expect("finishes");

        let the_request = Request::builder()
            .method("POST")
            .uri("/v1/geosubmit")
            .header(header::CONTENT_ENCODING, "gzip")
            .body(Body::from(the_gzipped))
            .expect("request builds");
        let the_response = the_rig.app.oneshot(the_request).await.expect("infallible");
        assert_eq!(the_response.status(), StatusCode::OK);
        assert_eq!(the_rig.rx.len(), 1);
    }

    #[tokio::test]
    async fn the_one_where_a_dead_queue_means_503_for_batches() {
        let the_rig = a_rig(None);
        the_rig.rx.close();
        let the_response = the_rig
            .app
            .oneshot(a_post("/v1/geosubmit", a_batch_body()))
            .await
            .expect("infallible");
        assert_eq!(the_response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn the_one_where_forwarded_for_beats_the_socket() {
        let mut the_headers = HeaderMap::new();
        let the_peer: SocketAddr = "192.0.2.1:4242".parse().expect("valid");
        assert_eq!(client_addr(&the_headers, Some(the_peer)), Some(the_peer.ip()));

        the_headers.insert("X-Forwarded-For", "203.0.113.7, 10.0.0.1".parse().expect("valid header"));
        assert_eq!(
            client_addr(&the_headers, Some(the_peer)),
            Some("203.0.113.7".parse().expect("valid ip"))
        );
    }

    #[test]
    fn the_one_where_unknown_keys_stay_anonymous() {
        let mut the_keys = HashMap::new();
        the_keys.insert(
            "quiet".to_string(),
            ApiKeyConfig {
                name: "shh".to_string(),
                log: false,
            },
        );
        assert_eq!(attribution_for(&the_keys, Some("nope")), Attribution::default());
        assert_eq!(attribution_for(&the_keys, None), Attribution::default());
        let the_quiet = attribution_for(&the_keys, Some("quiet"));
        assert!(!the_quiet.api_key_log);
        assert_eq!(the_quiet.api_key_name.as_deref(), Some("shh"));
    }
}
