//! Core configuration types.
//!
//! Everything here is plain serde data with defaults, validated once at
//! bootstrap. Embedders (the server binary) build a [`Config`] from their own
//! config files and hand it to [`bootstrap_services`](crate::bootstrap_services).

use serde::{Deserialize, Serialize};

use crate::protocol_constants::{
    CAPTURE_CHUNK_MS, DEFAULT_BUFFER_CAPACITY, DEFAULT_POLL_INTERVAL_MS, DEFAULT_SILENCE_MS,
    DEFAULT_TITLE_POLL_MS, DEFAULT_WRITE_BUFFER_SIZE, EVENT_CHANNEL_CAPACITY,
    TRANSPORT_CHANNEL_CAPACITY,
};
use crate::stream::FormatRegistry;

/// Configuration for audio delivery to consumers.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct StreamingConfig {
    /// Ring buffer size per consumer, in bytes.
    pub buffer_capacity: usize,

    /// Sleep between delivery rounds of a session (milliseconds).
    pub poll_interval_ms: u64,

    /// Silence written into an empty buffer (milliseconds of audio).
    pub silence_ms: u32,

    /// Upper bound for one body write, in bytes.
    pub write_buffer_size: usize,

    /// Format used when a request has no `format` parameter.
    pub default_format: String,

    /// Audio bytes between ICY metadata blocks. `None` means
    /// `sample_rate * 2` bytes at the device rate.
    pub icy_metaint: Option<usize>,

    /// Maximum number of concurrent consumer sessions.
    pub max_sessions: usize,

    /// Body chunks queued between a session and its HTTP response.
    pub transport_channel_capacity: usize,

    /// Audio per capture callback (milliseconds).
    pub capture_chunk_ms: u32,
}

impl StreamingConfig {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.buffer_capacity == 0 {
            return Err("buffer_capacity must be >= 1".to_string());
        }
        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be >= 1".to_string());
        }
        if self.silence_ms == 0 || self.silence_ms > 1000 {
            return Err("silence_ms must be between 1 and 1000".to_string());
        }
        if self.write_buffer_size == 0 {
            return Err("write_buffer_size must be >= 1".to_string());
        }
        if self.icy_metaint == Some(0) {
            return Err("icy_metaint must be >= 1 when set".to_string());
        }
        if self.max_sessions == 0 {
            return Err("max_sessions must be >= 1".to_string());
        }
        if self.transport_channel_capacity == 0 {
            return Err("transport_channel_capacity must be >= 1".to_string());
        }
        if self.capture_chunk_ms == 0 {
            return Err("capture_chunk_ms must be >= 1".to_string());
        }
        FormatRegistry::with_default_id(&self.default_format).map_err(|e| e.to_string())?;
        Ok(())
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            silence_ms: DEFAULT_SILENCE_MS,
            write_buffer_size: DEFAULT_WRITE_BUFFER_SIZE,
            default_format: "lpcm".to_string(),
            icy_metaint: None,
            max_sessions: 16,
            transport_channel_capacity: TRANSPORT_CHANNEL_CAPACITY,
            capture_chunk_ms: CAPTURE_CHUNK_MS,
        }
    }
}

/// Where track titles come from.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MetadataSourceKind {
    /// Only set through the HTTP API.
    #[default]
    Manual,
    /// Polled from an external command.
    Command,
}

/// Configuration for now-playing metadata.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct MetadataConfig {
    pub source: MetadataSourceKind,

    /// Program run for `command` sources.
    pub command: Option<String>,

    pub args: Vec<String>,

    /// Prefix removed from the command's output (e.g. `"Spotify – "`).
    pub strip_prefix: Option<String>,

    /// Poll interval for `command` sources (milliseconds).
    pub poll_interval_ms: u64,

    /// Title published at startup.
    pub initial_title: Option<String>,
}

impl MetadataConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.poll_interval_ms == 0 {
            return Err("metadata poll_interval_ms must be >= 1".to_string());
        }
        if self.source == MetadataSourceKind::Command
            && self.command.as_deref().map_or(true, str::is_empty)
        {
            return Err("metadata source `command` needs a command".to_string());
        }
        Ok(())
    }
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            source: MetadataSourceKind::Manual,
            command: None,
            args: Vec::new(),
            strip_prefix: None,
            poll_interval_ms: DEFAULT_TITLE_POLL_MS,
            initial_title: None,
        }
    }
}

/// Configuration for the Loopcast core.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub streaming: StreamingConfig,

    pub metadata: MetadataConfig,

    /// Capacity of the event broadcast channel.
    pub event_channel_capacity: usize,
}

impl Config {
    pub fn validate(&self) -> Result<(), String> {
        self.streaming.validate()?;
        self.metadata.validate()?;
        if self.event_channel_capacity == 0 {
            return Err(
                "event_channel_capacity must be >= 1 (broadcast::channel panics on 0)".to_string(),
            );
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            streaming: StreamingConfig::default(),
            metadata: MetadataConfig::default(),
            event_channel_capacity: EVENT_CHANNEL_CAPACITY,
        }
    }
}
