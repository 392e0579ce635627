//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::net::IpAddr;
use std::path::Path;

use anyhow::{Context, Result};
use loopcast_core::{
    CaptureDevice, CaptureSourceSpec, MetadataConfig, MetadataSourceKind, StreamingConfig,
};
use serde::Deserialize;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the HTTP server to.
    /// Override: `LOOPCAST_BIND_ADDRESS`
    pub bind_address: IpAddr,

    /// Port to bind the HTTP server to.
    /// Override: `LOOPCAST_BIND_PORT`
    pub bind_port: u16,

    /// Delivery settings shared by all consumers.
    pub streaming: StreamingConfig,

    /// Now-playing title source.
    pub metadata: MetadataConfig,

    /// Capture devices. When empty, a single test-tone device is served.
    pub devices: Vec<CaptureDevice>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::from([0, 0, 0, 0]),
            bind_port: 49500,
            streaming: StreamingConfig::default(),
            metadata: MetadataConfig::default(),
            devices: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Applies `LOOPCAST_*` overrides looked up through `var`.
    ///
    /// Unparseable values are logged and ignored.
    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        fn parse<T: std::str::FromStr>(key: &str, val: String) -> Option<T> {
            let parsed = val.trim().parse().ok();
            if parsed.is_none() {
                log::warn!("Ignoring invalid {}={:?}", key, val);
            }
            parsed
        }

        if let Some(addr) = var("LOOPCAST_BIND_ADDRESS").and_then(|v| parse("LOOPCAST_BIND_ADDRESS", v)) {
            self.bind_address = addr;
        }
        if let Some(port) = var("LOOPCAST_BIND_PORT").and_then(|v| parse("LOOPCAST_BIND_PORT", v)) {
            self.bind_port = port;
        }
        if let Some(format) = var("LOOPCAST_DEFAULT_FORMAT") {
            self.streaming.default_format = format.trim().to_lowercase();
        }
        if let Some(max) = var("LOOPCAST_MAX_SESSIONS").and_then(|v| parse("LOOPCAST_MAX_SESSIONS", v)) {
            self.streaming.max_sessions = max;
        }
        if let Some(metaint) = var("LOOPCAST_ICY_METAINT").and_then(|v| parse("LOOPCAST_ICY_METAINT", v)) {
            self.streaming.icy_metaint = Some(metaint);
        }
        if let Some(command) = var("LOOPCAST_METADATA_COMMAND").filter(|c| !c.trim().is_empty()) {
            self.metadata.source = MetadataSourceKind::Command;
            self.metadata.command = Some(command.trim().to_string());
        }
        if let Some(title) = var("LOOPCAST_TITLE") {
            self.metadata.initial_title = Some(title);
        }
    }

    /// Devices to serve, falling back to a 440 Hz tone.
    pub fn capture_devices(&self) -> Vec<CaptureDevice> {
        if !self.devices.is_empty() {
            return self.devices.clone();
        }
        vec![CaptureDevice {
            id: "tone".to_string(),
            name: "Test tone".to_string(),
            is_default: true,
            format: Default::default(),
            source: CaptureSourceSpec::Tone {
                frequency_hz: 440.0,
            },
        }]
    }

    /// Converts to loopcast-core's Config type.
    pub fn to_core_config(&self) -> loopcast_core::Config {
        loopcast_core::Config {
            streaming: self.streaming.clone(),
            metadata: self.metadata.clone(),
            ..Default::default()
        }
    }
}
