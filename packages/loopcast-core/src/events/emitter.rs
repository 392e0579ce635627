//! Event emitter abstraction for decoupling the pipeline from transport.
//!
//! The multiplexer, sessions and track hub depend on the [`EventEmitter`]
//! trait rather than a concrete channel.

use super::{CaptureEvent, MetadataEvent, SessionEvent};

/// Trait for emitting pipeline events without knowledge of transport.
pub trait EventEmitter: Send + Sync {
    /// Emits a capture device event.
    fn emit_capture(&self, event: CaptureEvent);

    /// Emits a consumer session event.
    fn emit_session(&self, event: SessionEvent);

    /// Emits a track metadata event.
    fn emit_metadata(&self, event: MetadataEvent);
}

/// No-op emitter for tests and embedding without observers.
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit_capture(&self, _event: CaptureEvent) {}

    fn emit_session(&self, _event: SessionEvent) {}

    fn emit_metadata(&self, _event: MetadataEvent) {}
}

/// Logs all events at debug level.
pub struct LoggingEventEmitter;

impl EventEmitter for LoggingEventEmitter {
    fn emit_capture(&self, event: CaptureEvent) {
        tracing::debug!(?event, "capture_event");
    }

    fn emit_session(&self, event: SessionEvent) {
        tracing::debug!(?event, "session_event");
    }

    fn emit_metadata(&self, event: MetadataEvent) {
        tracing::debug!(?event, "metadata_event");
    }
}
