//! Loopcast Core - live capture fan-out for network audio renderers.
//!
//! Captures audio from local devices and serves it to any number of HTTP
//! consumers (DLNA/UPnP renderers, internet radio players) as raw LPCM or
//! WAV, optionally with Shoutcast (ICY) now-playing metadata interleaved.
//!
//! # Architecture
//!
//! - [`capture`]: Capture backends (external command, test tone)
//! - [`stream`]: Ring buffers, byte transforms, the capture multiplexer,
//!   the ICY metadata embedder and per-consumer sessions
//! - [`metadata`]: Track info hub and title sources
//! - [`events`]: Lifecycle events and the broadcast bridge
//! - [`api`]: axum router and server startup
//! - [`state`]: Configuration
//! - [`error`]: Centralized error types
//!
//! # Abstraction Traits
//!
//! - [`CaptureBackend`](capture::CaptureBackend): Device enumeration and capture
//! - [`Transport`](stream::Transport): Where a session's bytes go
//! - [`TitleSource`](metadata::TitleSource): Now-playing title lookup
//! - [`TaskSpawner`](runtime::TaskSpawner): Spawning background tasks
//! - [`EventEmitter`](events::EventEmitter): Emitting domain events

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod bootstrap;
pub mod capture;
pub mod error;
pub mod events;
pub mod metadata;
pub mod protocol_constants;
pub mod runtime;
pub mod state;
pub mod stream;
pub mod utils;

// Re-export commonly used types at the crate root
pub use capture::{CaptureBackend, CaptureDevice, CaptureError, CaptureSourceSpec};
pub use error::{ErrorCode, LoopcastError, LoopcastResult};
pub use events::{
    BroadcastEvent, BroadcastEventBridge, CaptureEvent, EventEmitter, MetadataEvent, SessionEvent,
};
pub use metadata::{TrackInfo, TrackInfoHub, TrackSubscription};
pub use runtime::{TaskSpawner, TokioSpawner};
pub use state::{Config, MetadataConfig, MetadataSourceKind, StreamingConfig};
pub use utils::now_millis;

// Re-export stream types
pub use stream::{AudioFormat, CaptureMultiplexer, FormatRegistry, StreamingFormat};

// Re-export bootstrap types
pub use bootstrap::{bootstrap_services, bootstrap_with_backend, BootstrappedServices};

// Re-export API types
pub use api::{start_server, AppState, AppStateBuilder, ServerError};
