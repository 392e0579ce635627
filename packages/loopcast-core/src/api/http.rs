//! HTTP route handlers.
//!
//! All handlers are thin - they delegate to services for business logic.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::State,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    routing::get,
    Json, Router,
};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::response::api_success;
use crate::api::stream::stream_capture;
use crate::api::AppState;
use crate::error::{LoopcastError, LoopcastResult};
use crate::metadata::TrackInfo;
use crate::protocol_constants::{DEFAULT_CHANNELS, DEFAULT_SAMPLE_RATE, SERVICE_ID};
use crate::stream::IcyFormatter;

/// Interval between SSE keep-alive comments.
const SSE_KEEP_ALIVE: Duration = Duration::from_secs(15);

// ─────────────────────────────────────────────────────────────────────────────
// Request / Response Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct MetadataRequest {
    title: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeviceInfo {
    id: String,
    name: String,
    is_default: bool,
    sample_rate: u32,
    channels: u16,
    bits_per_sample: u16,
    /// Capture is currently running.
    active: bool,
    consumers: usize,
    failed: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FormatInfo {
    id: &'static str,
    name: &'static str,
    mime: String,
    network_descriptor: String,
    is_default: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

/// Creates the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/capture", get(stream_capture))
        .route("/api/devices", get(list_devices))
        .route("/api/formats", get(list_formats))
        .route("/api/metadata", get(get_metadata).post(set_metadata))
        .route("/api/events", get(event_stream))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Liveness probe. Always 200 while the server is responding.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    api_success(json!({
        "status": "ok",
        "service": SERVICE_ID,
        "sessions": {
            "active": state.sessions.active(),
            "max": state.sessions.max()
        }
    }))
}

async fn list_devices(State(state): State<AppState>) -> impl IntoResponse {
    let active = state.multiplexer.active_devices();
    let default_id = state.multiplexer.resolve_device(None).ok().map(|d| d.id);

    let devices: Vec<DeviceInfo> = state
        .multiplexer
        .devices()
        .into_iter()
        .map(|device| {
            let running = active.iter().find(|a| a.device_id == device.id);
            DeviceInfo {
                is_default: default_id.as_deref() == Some(device.id.as_str()),
                sample_rate: device.format.sample_rate,
                channels: device.format.channels,
                bits_per_sample: device.format.bits_per_sample,
                active: running.is_some(),
                consumers: running.map_or(0, |a| a.consumers),
                failed: running.is_some_and(|a| a.failed),
                id: device.id,
                name: device.name,
            }
        })
        .collect();

    api_success(json!({ "devices": devices }))
}

/// Lists formats with descriptors for the default device's sample layout.
async fn list_formats(State(state): State<AppState>) -> impl IntoResponse {
    let (rate, channels) = state
        .multiplexer
        .resolve_device(None)
        .map(|d| (d.format.sample_rate, d.format.channels))
        .unwrap_or((DEFAULT_SAMPLE_RATE, DEFAULT_CHANNELS));
    let default = state.formats.default_format();

    let formats: Vec<FormatInfo> = state
        .formats
        .iter()
        .map(|f| FormatInfo {
            id: f.id(),
            name: f.name(),
            mime: f.mime_descriptor(rate, channels),
            network_descriptor: f.network_descriptor(rate, channels),
            is_default: f == default,
        })
        .collect();

    api_success(json!({ "formats": formats }))
}

async fn get_metadata(State(state): State<AppState>) -> impl IntoResponse {
    api_success(state.track_hub.current())
}

/// Sets the current title. Rejects titles that don't fit one ICY block.
async fn set_metadata(
    State(state): State<AppState>,
    Json(payload): Json<MetadataRequest>,
) -> LoopcastResult<impl IntoResponse> {
    let title = payload.title.trim();
    if title.is_empty() {
        return Err(LoopcastError::InvalidRequest("title must not be empty".into()));
    }

    IcyFormatter::format_block(&TrackInfo::from_title(title))?;
    let info = state.track_hub.set_title(title);
    log::info!("[Metadata] Title set over HTTP: {}", info.full_title);
    Ok(api_success(info))
}

/// Server-sent event feed of every broadcast event.
async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.event_bridge.subscribe();
    let events = BroadcastStream::new(rx).filter_map(|res| match res {
        Ok(event) => match Event::default().event(event.category()).json_data(&event) {
            Ok(sse) => Some(Ok(sse)),
            Err(e) => {
                log::warn!("[Events] Failed to serialize event: {}", e);
                None
            }
        },
        Err(BroadcastStreamRecvError::Lagged(n)) => {
            log::debug!("[Events] SSE subscriber lagged, skipped {} event(s)", n);
            None
        }
    });

    Sse::new(events).keep_alive(KeepAlive::new().interval(SSE_KEEP_ALIVE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;

    use crate::bootstrap::bootstrap_with_backend;
    use crate::state::Config;
    use crate::stream::multiplexer::tests::MockBackend;

    fn app_with(config: Config) -> (Router, Arc<MockBackend>, AppState) {
        let backend = Arc::new(MockBackend::default());
        let services = bootstrap_with_backend(&config, backend.clone()).unwrap();
        let state = AppState::new(&services);
        let router = create_router(state.clone())
            .layer(MockConnectInfo(SocketAddr::from(([192, 168, 1, 20], 5000))));
        (router, backend, state)
    }

    fn app() -> (Router, Arc<MockBackend>, AppState) {
        app_with(Config::default())
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), 1 << 20).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn health_reports_session_limits() {
        let (router, _, _) = app();
        let response = router.oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["service"], SERVICE_ID);
        assert_eq!(body["sessions"]["max"], 16);
        assert_eq!(body["sessions"]["active"], 0);
    }

    #[tokio::test]
    async fn lists_devices_and_formats() {
        let (router, _, _) = app();
        let body = json_body(router.clone().oneshot(get("/api/devices")).await.unwrap()).await;
        let devices = body["devices"].as_array().unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0]["id"], "main");
        assert_eq!(devices[0]["isDefault"], true);
        assert_eq!(devices[0]["active"], false);

        let body = json_body(router.oneshot(get("/api/formats")).await.unwrap()).await;
        let formats = body["formats"].as_array().unwrap();
        assert_eq!(formats[0]["id"], "lpcm");
        assert_eq!(formats[0]["mime"], "audio/L16;rate=48000;channels=2");
        assert_eq!(formats[0]["isDefault"], true);
        assert_eq!(formats[1]["id"], "wav");
    }

    #[tokio::test]
    async fn metadata_round_trips_through_the_hub() {
        let (router, _, state) = app();
        let request = Request::builder()
            .method("POST")
            .uri("/api/metadata")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"title": "Aphex Twin – Xtal"}"#))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.track_hub.current().artist.as_deref(), Some("Aphex Twin"));

        let body = json_body(router.oneshot(get("/api/metadata")).await.unwrap()).await;
        assert_eq!(body["track"], "Xtal");
    }

    #[tokio::test]
    async fn overlong_title_is_rejected() {
        let (router, _, state) = app();
        let title = "x".repeat(5000);
        let request = Request::builder()
            .method("POST")
            .uri("/api/metadata")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({ "title": title }).to_string()))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "title_too_long");
        assert_eq!(state.track_hub.current(), TrackInfo::unavailable());
    }

    #[tokio::test]
    async fn unknown_format_and_device_are_rejected() {
        let (router, backend, _) = app();
        let response = router
            .clone()
            .oneshot(get("/capture?format=ogg"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = router.oneshot(get("/capture?id=nope")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(backend.starts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn capture_sets_streaming_headers() {
        let (router, backend, state) = app();
        let request = Request::builder()
            .uri("/capture?format=wav")
            .header("Icy-MetaData", "1")
            .body(Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], "audio/wav");
        assert_eq!(headers[header::CONTENT_LENGTH], u32::MAX.to_string().as_str());
        assert_eq!(headers["TransferMode.dlna.org"], "Streaming");
        assert_eq!(headers["icy-metaint"], "96000");
        assert_eq!(headers["icy-name"], "Loopcast");

        assert_eq!(backend.starts.load(Ordering::SeqCst), 1);
        assert_eq!(state.sessions.active(), 1);
        assert_eq!(state.track_hub.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn session_limit_returns_unavailable() {
        let mut config = Config::default();
        config.streaming.max_sessions = 1;
        let (router, _, _) = app_with(config);

        let first = router.clone().oneshot(get("/capture")).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = router.oneshot(get("/capture")).await.unwrap();
        assert_eq!(second.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json_body(second).await["error"], "too_many_sessions");
    }

    #[tokio::test]
    async fn capture_start_failure_is_unavailable() {
        let (router, backend, state) = app();
        backend.fail_start.store(true, Ordering::SeqCst);

        let response = router.oneshot(get("/capture")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(state.sessions.active(), 0);
    }
}
