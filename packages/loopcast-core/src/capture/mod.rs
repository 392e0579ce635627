//! Capture subsystem.
//!
//! A [`CaptureBackend`] enumerates devices and opens [`CaptureStream`]s. An
//! open stream delivers interleaved s16le chunks to a [`CaptureSink`] from
//! its own thread, in hardware order, until stopped or until it fails.
//!
//! Two backends are built in, both selected per device in configuration:
//! - `command`: raw PCM read from a child process's stdout (`parec`,
//!   `arecord`, `pw-record`, ...).
//! - `tone`: a sine generator, handy for testing renderers without a sound card.

mod command;
mod tone;

pub use command::CommandCaptureStream;
pub use tone::ToneCaptureStream;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::stream::AudioFormat;

/// Errors from opening or running a capture stream.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// No device with the given id is configured.
    #[error("unknown capture device: {0}")]
    UnknownDevice(String),

    /// No devices are configured at all.
    #[error("no capture devices configured")]
    NoDevices,

    /// The device can't be captured in its declared format.
    #[error("unsupported capture format: {0}")]
    UnsupportedFormat(String),

    /// Starting capture failed (process spawn, thread spawn, ...).
    #[error("failed to start capture: {0}")]
    StartFailed(String),

    /// A running capture stopped delivering data.
    #[error("capture device lost: {0}")]
    DeviceLost(String),
}

/// Where a device's samples come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CaptureSourceSpec {
    /// Raw s16le PCM on a child process's stdout.
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
    /// Generated sine wave.
    Tone {
        #[serde(default = "default_tone_frequency")]
        frequency_hz: f32,
    },
}

fn default_tone_frequency() -> f32 {
    440.0
}

/// A capturable audio device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureDevice {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub format: AudioFormat,
    pub source: CaptureSourceSpec,
}

/// Receives captured audio.
///
/// Called from the capture thread. Implementations must not block for long:
/// every call holds up the next hardware chunk.
pub trait CaptureSink: Send + Sync {
    /// A chunk of interleaved s16le frames.
    fn on_data(&self, chunk: &[u8]);

    /// Capture stopped on its own. No further calls follow.
    fn on_error(&self, error: CaptureError);
}

/// An opened capture stream.
pub trait CaptureStream: Send {
    /// Begins delivering data to the sink.
    fn start(&mut self) -> Result<(), CaptureError>;

    /// Stops delivery and releases OS resources. Idempotent. No sink calls
    /// happen after it returns.
    fn stop(&mut self);
}

/// Source of capture devices and streams.
pub trait CaptureBackend: Send + Sync {
    /// All devices this backend can open.
    fn devices(&self) -> Vec<CaptureDevice>;

    /// The device used when a consumer doesn't name one.
    fn default_device(&self) -> Option<CaptureDevice> {
        let devices = self.devices();
        devices
            .iter()
            .find(|d| d.is_default)
            .or_else(|| devices.first())
            .cloned()
    }

    /// Looks a device up by id.
    fn device(&self, id: &str) -> Option<CaptureDevice> {
        self.devices().into_iter().find(|d| d.id == id)
    }

    /// Opens (but doesn't start) a stream on `device`.
    fn open(
        &self,
        device: &CaptureDevice,
        sink: Arc<dyn CaptureSink>,
    ) -> Result<Box<dyn CaptureStream>, CaptureError>;
}

/// Backend built from a fixed device list, dispatching on each device's
/// [`CaptureSourceSpec`].
pub struct ConfiguredCaptureBackend {
    devices: Vec<CaptureDevice>,
    chunk_ms: u32,
}

impl ConfiguredCaptureBackend {
    /// Creates a backend over `devices`, delivering roughly `chunk_ms` of
    /// audio per sink call.
    pub fn new(devices: Vec<CaptureDevice>, chunk_ms: u32) -> Result<Self, CaptureError> {
        for device in &devices {
            device
                .format
                .validate()
                .map_err(|e| CaptureError::UnsupportedFormat(format!("{}: {}", device.id, e)))?;
        }
        Ok(Self {
            devices,
            chunk_ms: chunk_ms.max(1),
        })
    }
}

impl CaptureBackend for ConfiguredCaptureBackend {
    fn devices(&self) -> Vec<CaptureDevice> {
        self.devices.clone()
    }

    fn open(
        &self,
        device: &CaptureDevice,
        sink: Arc<dyn CaptureSink>,
    ) -> Result<Box<dyn CaptureStream>, CaptureError> {
        let chunk_bytes = device.format.frame_bytes(self.chunk_ms).max(device.format.block_align());

        match &device.source {
            CaptureSourceSpec::Command { program, args } => Ok(Box::new(
                CommandCaptureStream::new(
                    device.id.clone(),
                    program.clone(),
                    args.clone(),
                    device.format,
                    chunk_bytes,
                    sink,
                ),
            )),
            CaptureSourceSpec::Tone { frequency_hz } => Ok(Box::new(ToneCaptureStream::new(
                device.id.clone(),
                *frequency_hz,
                device.format,
                self.chunk_ms,
                sink,
            ))),
        }
    }
}
