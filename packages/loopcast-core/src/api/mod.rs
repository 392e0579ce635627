//! HTTP API layer.
//!
//! Thin axum handlers over the bootstrapped services, plus router
//! construction and server startup.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::bootstrap::BootstrappedServices;
use crate::events::BroadcastEventBridge;
use crate::metadata::TrackInfoHub;
use crate::runtime::TokioSpawner;
use crate::state::Config;
use crate::stream::{CaptureMultiplexer, FormatRegistry};

pub mod http;
pub mod response;
mod stream;

pub use stream::{SessionLimiter, SessionSlot};

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind or serve.
    #[error("Failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(#[from] std::io::Error),

    /// `AppStateBuilder::build` was called without a required component.
    #[error("Missing application component: {0}")]
    MissingComponent(&'static str),
}

/// Shared application state for the API layer.
///
/// Holds handles to services only; cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub multiplexer: CaptureMultiplexer,
    pub formats: FormatRegistry,
    pub track_hub: TrackInfoHub,
    /// Event bridge, subscribed to by `/api/events` and emitted to by sessions.
    pub event_bridge: Arc<BroadcastEventBridge>,
    pub config: Arc<Config>,
    /// Spawns one delivery task per consumer.
    pub spawner: TokioSpawner,
    /// Concurrent session accounting against `max_sessions`.
    pub sessions: SessionLimiter,
}

/// Builder for constructing an `AppState`.
#[derive(Default)]
pub struct AppStateBuilder {
    multiplexer: Option<CaptureMultiplexer>,
    formats: Option<FormatRegistry>,
    track_hub: Option<TrackInfoHub>,
    event_bridge: Option<Arc<BroadcastEventBridge>>,
    config: Option<Arc<Config>>,
    spawner: Option<TokioSpawner>,
}

impl AppStateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn multiplexer(mut self, multiplexer: CaptureMultiplexer) -> Self {
        self.multiplexer = Some(multiplexer);
        self
    }

    pub fn formats(mut self, formats: FormatRegistry) -> Self {
        self.formats = Some(formats);
        self
    }

    pub fn track_hub(mut self, hub: TrackInfoHub) -> Self {
        self.track_hub = Some(hub);
        self
    }

    pub fn event_bridge(mut self, bridge: Arc<BroadcastEventBridge>) -> Self {
        self.event_bridge = Some(bridge);
        self
    }

    pub fn config(mut self, config: Arc<Config>) -> Self {
        self.config = Some(config);
        self
    }

    pub fn spawner(mut self, spawner: TokioSpawner) -> Self {
        self.spawner = Some(spawner);
        self
    }

    /// Builds the `AppState`. The format registry defaults to the one named
    /// by the config; everything else is required.
    pub fn build(self) -> Result<AppState, ServerError> {
        let config = self.config.ok_or(ServerError::MissingComponent("config"))?;
        let formats = match self.formats {
            Some(formats) => formats,
            None => FormatRegistry::with_default_id(&config.streaming.default_format)
                .unwrap_or_default(),
        };
        Ok(AppState {
            multiplexer: self
                .multiplexer
                .ok_or(ServerError::MissingComponent("multiplexer"))?,
            formats,
            track_hub: self
                .track_hub
                .ok_or(ServerError::MissingComponent("track_hub"))?,
            event_bridge: self
                .event_bridge
                .ok_or(ServerError::MissingComponent("event_bridge"))?,
            sessions: SessionLimiter::new(config.streaming.max_sessions),
            spawner: self.spawner.ok_or(ServerError::MissingComponent("spawner"))?,
            config,
        })
    }
}

impl AppState {
    /// Creates a new builder for constructing an `AppState`.
    pub fn builder() -> AppStateBuilder {
        AppStateBuilder::new()
    }

    /// Builds the state from bootstrapped services.
    pub fn new(services: &BootstrappedServices) -> Self {
        Self {
            multiplexer: services.multiplexer.clone(),
            formats: services.formats.clone(),
            track_hub: services.track_hub.clone(),
            event_bridge: Arc::clone(&services.event_bridge),
            sessions: SessionLimiter::new(services.config.streaming.max_sessions),
            spawner: services.spawner.clone(),
            config: Arc::clone(&services.config),
        }
    }
}

/// Binds `addr` and serves the API until `shutdown` is cancelled.
pub async fn start_server(
    state: AppState,
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;

    log::info!("Server listening on http://{}", listener.local_addr()?);
    let app = http::create_router(state);

    // ConnectInfo<SocketAddr> is extracted by the capture handler.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown.cancelled_owned())
    .await?;
    Ok(())
}
