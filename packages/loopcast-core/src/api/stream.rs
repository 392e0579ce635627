//! Audio streaming handler.
//!
//! Separated from the REST handlers: building a consumer pipeline means
//! resolving device and format, attaching a ring buffer, deciding on ICY
//! metadata and spawning the session that feeds the response body.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{connect_info::ConnectInfo, Query, State},
    http::{header, HeaderMap},
    response::Response,
};
use serde::Deserialize;
use tokio_stream::wrappers::ReceiverStream;

use crate::api::AppState;
use crate::error::{LoopcastError, LoopcastResult};
use crate::events::EventEmitter;
use crate::protocol_constants::{
    APP_NAME, ICY_METADATA_HEADER, ICY_METAINT_HEADER, SERVER_HEADER, WAV_STREAM_SIZE_MAX,
};
use crate::runtime::TaskSpawner;
use crate::stream::{
    create_wav_header, AudioFormat, ChannelTransport, EndianTransform, StreamSession,
    StreamSessionConfig,
};

// ─────────────────────────────────────────────────────────────────────────────
// Session Limit
// ─────────────────────────────────────────────────────────────────────────────

/// Counts live consumer sessions against a fixed maximum.
#[derive(Debug, Clone)]
pub struct SessionLimiter {
    active: Arc<AtomicUsize>,
    max: usize,
}

impl SessionLimiter {
    pub fn new(max: usize) -> Self {
        Self {
            active: Arc::new(AtomicUsize::new(0)),
            max,
        }
    }

    /// Reserves a slot, or `None` when `max` sessions are already live.
    pub fn try_acquire(&self) -> Option<SessionSlot> {
        self.active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.max).then_some(n + 1)
            })
            .ok()
            .map(|_| SessionSlot {
                active: Arc::clone(&self.active),
            })
    }

    /// Number of live sessions.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn max(&self) -> usize {
        self.max
    }
}

/// A reserved session slot, released on drop.
#[derive(Debug)]
pub struct SessionSlot {
    active: Arc<AtomicUsize>,
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handler
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(super) struct CaptureQuery {
    /// Device id; the default device when absent.
    id: Option<String>,
    /// Streaming format id; the configured default when absent.
    format: Option<String>,
}

/// Whether the client asked for interleaved Shoutcast metadata.
fn wants_icy(headers: &HeaderMap) -> bool {
    headers
        .get(ICY_METADATA_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        == Some("1")
}

/// Audio bytes between metadata blocks: configured, or `sample_rate * 2`
/// bytes (half a second of 16-bit stereo).
fn icy_interval(configured: Option<usize>, format: &AudioFormat) -> usize {
    configured.unwrap_or(format.sample_rate as usize * 2)
}

pub(super) async fn stream_capture(
    State(state): State<AppState>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    Query(query): Query<CaptureQuery>,
    headers: HeaderMap,
) -> LoopcastResult<Response> {
    let streaming = &state.config.streaming;

    let format = state.formats.resolve(query.format.as_deref())?;
    let device = state.multiplexer.resolve_device(query.id.as_deref())?;
    let slot = state
        .sessions
        .try_acquire()
        .ok_or(LoopcastError::TooManySessions(state.sessions.max()))?;

    let preamble = if format.needs_wav_header() {
        create_wav_header(&device.format)
    } else {
        bytes::Bytes::new()
    };
    let transform = EndianTransform::for_format(format, device.format.block_align());
    let lease = state
        .multiplexer
        .attach(Some(&device.id), Box::new(transform), &preamble)?;

    let icy_metaint = wants_icy(&headers).then(|| icy_interval(streaming.icy_metaint, &device.format));
    let track = icy_metaint.map(|_| state.track_hub.subscribe());

    let session_id = uuid::Uuid::new_v4().to_string();
    log::info!(
        "[Stream] {} requested {} from {} (icy={})",
        remote_addr,
        format.id(),
        device.id,
        icy_metaint.is_some()
    );

    let mut builder = Response::builder()
        .header(
            header::CONTENT_TYPE,
            format.mime_descriptor(device.format.sample_rate, device.format.channels),
        )
        // Fixed length avoids chunked encoding, which renderers handle poorly for PCM.
        .header(header::CONTENT_LENGTH, WAV_STREAM_SIZE_MAX.to_string())
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .header("TransferMode.dlna.org", "Streaming")
        .header(header::SERVER, SERVER_HEADER)
        .header("icy-name", APP_NAME);
    if let Some(interval) = icy_metaint {
        builder = builder.header(ICY_METAINT_HEADER, interval.to_string());
    }

    let (mut transport, rx) = ChannelTransport::channel(
        streaming.transport_channel_capacity,
        streaming.write_buffer_size,
    );
    let session = StreamSession::new(
        lease,
        StreamSessionConfig {
            session_id,
            format,
            poll_interval: Duration::from_millis(streaming.poll_interval_ms),
            silence_ms: streaming.silence_ms,
            icy_metaint,
            remote_addr: Some(remote_addr.to_string()),
        },
        track,
        Arc::clone(&state.event_bridge) as Arc<dyn EventEmitter>,
    );

    state.spawner.spawn(async move {
        let _slot = slot;
        session.run(&mut transport).await;
    });

    builder
        .body(Body::from_stream(ReceiverStream::new(rx)))
        .map_err(|e| LoopcastError::Internal(e.to_string()))
}
