//! Pipeline lifecycle events.
//!
//! This module provides:
//! - [`EventEmitter`] trait for pipeline components to emit events
//! - [`BroadcastEventBridge`] for the SSE transport
//! - Event types for capture devices, consumer sessions and track metadata

mod bridge;
mod emitter;

pub use bridge::BroadcastEventBridge;
pub use emitter::{EventEmitter, LoggingEventEmitter, NoopEventEmitter};

use serde::Serialize;

/// Events broadcast to observers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "category", rename_all = "camelCase")]
pub enum BroadcastEvent {
    /// Capture device start/stop/failure.
    Capture(CaptureEvent),

    /// Consumer session start/end.
    Session(SessionEvent),

    /// Track info changes.
    Metadata(MetadataEvent),
}

impl BroadcastEvent {
    /// Serialized `category` tag, used as the SSE event name.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::Capture(_) => "capture",
            Self::Session(_) => "session",
            Self::Metadata(_) => "metadata",
        }
    }
}

/// Events related to a physical capture device.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CaptureEvent {
    /// Capture started because the first consumer attached.
    Started {
        #[serde(rename = "deviceId")]
        device_id: String,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// Capture stopped because the last consumer detached.
    Stopped {
        #[serde(rename = "deviceId")]
        device_id: String,
        timestamp: u64,
    },
    /// Capture failed; attached sessions will end.
    Failed {
        #[serde(rename = "deviceId")]
        device_id: String,
        error: String,
        timestamp: u64,
    },
}

/// How a consumer session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionOutcome {
    /// The consumer went away.
    Disconnected,
    /// The capture device failed.
    SourceFailed,
    /// Captured data couldn't be converted for this consumer.
    TransformFailed,
}

/// Events related to consumer sessions.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    /// A consumer connected and its buffer was attached.
    Started {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "deviceId")]
        device_id: String,
        /// Wire format identifier (`lpcm`, `wav`).
        format: String,
        /// Whether ICY metadata is embedded.
        metadata: bool,
        #[serde(rename = "remoteAddr", skip_serializing_if = "Option::is_none")]
        remote_addr: Option<String>,
        timestamp: u64,
    },
    /// A session finished and its buffer was detached.
    Ended {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "deviceId")]
        device_id: String,
        outcome: SessionOutcome,
        #[serde(rename = "bytesSent")]
        bytes_sent: u64,
        timestamp: u64,
    },
}

/// Events related to now-playing metadata.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MetadataEvent {
    /// The current track changed.
    TrackChanged {
        #[serde(rename = "fullTitle")]
        full_title: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        artist: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        track: Option<String>,
        timestamp: u64,
    },
}

impl From<CaptureEvent> for BroadcastEvent {
    fn from(event: CaptureEvent) -> Self {
        BroadcastEvent::Capture(event)
    }
}

impl From<SessionEvent> for BroadcastEvent {
    fn from(event: SessionEvent) -> Self {
        BroadcastEvent::Session(event)
    }
}

impl From<MetadataEvent> for BroadcastEvent {
    fn from(event: MetadataEvent) -> Self {
        BroadcastEvent::Metadata(event)
    }
}
