//! Application bootstrap and dependency wiring.
//!
//! The composition root: every long-lived service is created here, in
//! dependency order, and handed out as one [`BootstrappedServices`] value.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::capture::{CaptureBackend, CaptureDevice, ConfiguredCaptureBackend};
use crate::error::{LoopcastError, LoopcastResult};
use crate::events::{BroadcastEventBridge, EventEmitter, LoggingEventEmitter};
use crate::metadata::{CommandTitleSource, TitleSource, TrackInfoHub};
use crate::protocol_constants::{TITLE_COMMAND_TIMEOUT_MS, WAV_HEADER_LEN};
use crate::runtime::TokioSpawner;
use crate::state::{Config, MetadataConfig, MetadataSourceKind};
use crate::stream::{CaptureMultiplexer, FormatRegistry};

/// Container for all bootstrapped services.
#[derive(Clone)]
pub struct BootstrappedServices {
    /// Owns capture streams and fans them out to consumers.
    pub multiplexer: CaptureMultiplexer,
    /// Wire formats consumers can ask for.
    pub formats: FormatRegistry,
    /// Current track info and its subscriptions.
    pub track_hub: TrackInfoHub,
    /// Event bridge feeding the SSE endpoint and the log.
    pub event_bridge: Arc<BroadcastEventBridge>,
    /// Task spawner for background operations.
    pub spawner: TokioSpawner,
    /// Cancellation token for graceful shutdown.
    pub cancel_token: CancellationToken,
    /// Validated configuration.
    pub config: Arc<Config>,
}

impl BootstrappedServices {
    /// Stops polling and capture. Sessions still running see their source
    /// fail and end on their next round.
    pub async fn shutdown(&self) {
        log::info!("[Bootstrap] Beginning graceful shutdown...");

        self.cancel_token.cancel();
        self.track_hub.shutdown();

        let active = self.multiplexer.active_devices().len();
        // Stopping joins capture threads.
        let multiplexer = self.multiplexer.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || multiplexer.shutdown()).await {
            log::warn!("[Bootstrap] Capture shutdown task failed: {}", e);
        }
        log::info!("[Bootstrap] Stopped {} capture device(s)", active);

        log::info!("[Bootstrap] Shutdown complete");
    }
}

/// Bootstraps services over the devices declared in configuration.
///
/// # Errors
///
/// Returns [`LoopcastError::Configuration`] if the configuration or a device
/// format is invalid.
pub fn bootstrap_services(
    config: &Config,
    devices: Vec<CaptureDevice>,
) -> LoopcastResult<BootstrappedServices> {
    let backend = ConfiguredCaptureBackend::new(devices, config.streaming.capture_chunk_ms)
        .map_err(|e| LoopcastError::Configuration(e.to_string()))?;
    bootstrap_with_backend(config, Arc::new(backend))
}

/// Bootstraps services over an arbitrary capture backend.
///
/// Wiring order:
///
/// 1. Config validation and the format registry
/// 2. Event bridge (with logging as the secondary emitter)
/// 3. Capture multiplexer
/// 4. Track hub and its title source
///
/// Must be called from within a Tokio runtime.
pub fn bootstrap_with_backend(
    config: &Config,
    backend: Arc<dyn CaptureBackend>,
) -> LoopcastResult<BootstrappedServices> {
    config.validate().map_err(LoopcastError::Configuration)?;
    let formats = FormatRegistry::with_default_id(&config.streaming.default_format)?;

    let devices = backend.devices();
    if devices.is_empty() {
        log::warn!("[Bootstrap] No capture devices configured");
    }
    for device in &devices {
        check_device_fits(config, device)?;
    }

    let spawner = TokioSpawner::current();
    let cancel_token = CancellationToken::new();

    let event_bridge = Arc::new(BroadcastEventBridge::new(config.event_channel_capacity));
    event_bridge.set_external_emitter(Arc::new(LoggingEventEmitter));

    let multiplexer = CaptureMultiplexer::new(
        backend,
        config.streaming.buffer_capacity,
        Arc::clone(&event_bridge) as Arc<dyn EventEmitter>,
    );

    let track_hub = TrackInfoHub::new(
        title_source(&config.metadata),
        Duration::from_millis(config.metadata.poll_interval_ms),
        spawner.clone(),
        Arc::clone(&event_bridge) as Arc<dyn EventEmitter>,
    );
    if let Some(title) = &config.metadata.initial_title {
        track_hub.set_title(title);
    }

    log::info!(
        "[Bootstrap] {} device(s), default format {}, metadata source {:?}",
        devices.len(),
        formats.default_format().id(),
        config.metadata.source
    );

    Ok(BootstrappedServices {
        multiplexer,
        formats,
        track_hub,
        event_bridge,
        spawner,
        cancel_token,
        config: Arc::new(config.clone()),
    })
}

/// Every single write into a session's ring (WAV header, capture chunk,
/// silence block) must fit in it.
fn check_device_fits(config: &Config, device: &CaptureDevice) -> LoopcastResult<()> {
    let streaming = &config.streaming;
    let writes = [
        ("WAV header", WAV_HEADER_LEN),
        (
            "capture chunk",
            device.format.frame_bytes(streaming.capture_chunk_ms),
        ),
        ("silence block", device.format.frame_bytes(streaming.silence_ms)),
    ];
    for (what, len) in writes {
        if len > streaming.buffer_capacity {
            return Err(LoopcastError::Configuration(format!(
                "{}: {} is {} bytes, more than buffer_capacity {}",
                device.id, what, len, streaming.buffer_capacity
            )));
        }
    }
    Ok(())
}

fn title_source(config: &MetadataConfig) -> Option<Arc<dyn TitleSource>> {
    match (config.source, &config.command) {
        (MetadataSourceKind::Command, Some(program)) => {
            let source: Arc<dyn TitleSource> = Arc::new(
                CommandTitleSource::new(
                    program.clone(),
                    config.args.clone(),
                    Duration::from_millis(TITLE_COMMAND_TIMEOUT_MS),
                )
                .with_strip_prefix(config.strip_prefix.clone()),
            );
            Some(source)
        }
        _ => None,
    }
}
