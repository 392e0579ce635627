//! Wire formats advertised to consumers.
//!
//! Two formats exist: big-endian 16-bit LPCM (what DLNA renderers expect for
//! `audio/L16`) and canonical little-endian WAV. They differ only in a handful
//! of values, so they're modelled as an enum plus a lookup registry.

use serde::Serialize;
use thiserror::Error;

/// Errors from format lookup.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// No format is registered under the given identifier.
    #[error("unknown streaming format: {0}")]
    UnknownFormat(String),
}

/// Audio sample encoding delivered on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamingFormat {
    /// Raw big-endian 16-bit PCM (`audio/L16`).
    Lpcm,
    /// Little-endian PCM in a RIFF/WAVE container.
    Wav,
}

impl StreamingFormat {
    /// All built-in formats, in registry order.
    pub const ALL: [StreamingFormat; 2] = [StreamingFormat::Lpcm, StreamingFormat::Wav];

    /// Short identifier used in URLs and configuration (`lpcm`, `wav`).
    #[must_use]
    pub const fn id(&self) -> &'static str {
        match self {
            Self::Lpcm => "lpcm",
            Self::Wav => "wav",
        }
    }

    /// Human-readable name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Lpcm => "LPCM",
            Self::Wav => "WAV",
        }
    }

    /// Whether samples must be byte-swapped to big-endian before delivery.
    #[must_use]
    pub const fn big_endian(&self) -> bool {
        matches!(self, Self::Lpcm)
    }

    /// Whether each consumer stream starts with a RIFF/WAVE header.
    #[must_use]
    pub const fn needs_wav_header(&self) -> bool {
        matches!(self, Self::Wav)
    }

    /// MIME type used as the HTTP `Content-Type`.
    pub fn mime_descriptor(&self, sample_rate: u32, channels: u16) -> String {
        match self {
            Self::Lpcm => format!("audio/L16;rate={};channels={}", sample_rate, channels),
            Self::Wav => "audio/wav".to_string(),
        }
    }

    /// DLNA protocol-info string advertised to renderers.
    pub fn network_descriptor(&self, sample_rate: u32, channels: u16) -> String {
        let mime = self.mime_descriptor(sample_rate, channels);
        match self {
            Self::Lpcm => format!("http-get:*:{}:DLNA.ORG_PN=LPCM", mime),
            Self::Wav => format!("http-get:*:{}:*", mime),
        }
    }
}

/// Immutable set of selectable formats with a default.
///
/// Built once from configuration and shared by value; nothing mutates it after
/// startup.
#[derive(Debug, Clone)]
pub struct FormatRegistry {
    formats: Vec<StreamingFormat>,
    default: StreamingFormat,
}

impl FormatRegistry {
    /// Creates a registry of the built-in formats with the given default.
    #[must_use]
    pub fn new(default: StreamingFormat) -> Self {
        Self {
            formats: StreamingFormat::ALL.to_vec(),
            default,
        }
    }

    /// Creates a registry whose default is looked up by identifier.
    pub fn with_default_id(default_id: &str) -> Result<Self, FormatError> {
        let default = Self::new(StreamingFormat::Lpcm).get(default_id)?;
        Ok(Self::new(default))
    }

    /// Looks up a format by identifier.
    pub fn get(&self, id: &str) -> Result<StreamingFormat, FormatError> {
        self.formats
            .iter()
            .copied()
            .find(|f| f.id() == id)
            .ok_or_else(|| FormatError::UnknownFormat(id.to_string()))
    }

    /// Resolves an optional request parameter, falling back to the default.
    pub fn resolve(&self, id: Option<&str>) -> Result<StreamingFormat, FormatError> {
        match id {
            Some(id) => self.get(id),
            None => Ok(self.default),
        }
    }

    /// The format used when a request doesn't name one.
    #[must_use]
    pub fn default_format(&self) -> StreamingFormat {
        self.default
    }

    /// Iterates over all registered formats.
    pub fn iter(&self) -> impl Iterator<Item = StreamingFormat> + '_ {
        self.formats.iter().copied()
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::new(StreamingFormat::Lpcm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_id() {
        let registry = FormatRegistry::default();
        assert_eq!(registry.get("lpcm"), Ok(StreamingFormat::Lpcm));
        assert_eq!(registry.get("wav"), Ok(StreamingFormat::Wav));
    }

    #[test]
    fn unknown_id_is_rejected() {
        let registry = FormatRegistry::default();
        assert_eq!(
            registry.get("flac"),
            Err(FormatError::UnknownFormat("flac".into()))
        );
        assert!(FormatRegistry::with_default_id("mp3").is_err());
    }

    #[test]
    fn resolve_falls_back_to_default() {
        let registry = FormatRegistry::with_default_id("wav").expect("wav is registered");
        assert_eq!(registry.resolve(None), Ok(StreamingFormat::Wav));
        assert_eq!(registry.resolve(Some("lpcm")), Ok(StreamingFormat::Lpcm));
    }

    #[test]
    fn lpcm_descriptors() {
        let f = StreamingFormat::Lpcm;
        assert!(f.big_endian());
        assert_eq!(f.mime_descriptor(44100, 2), "audio/L16;rate=44100;channels=2");
        assert_eq!(
            f.network_descriptor(48000, 1),
            "http-get:*:audio/L16;rate=48000;channels=1:DLNA.ORG_PN=LPCM"
        );
    }

    #[test]
    fn wav_descriptors() {
        let f = StreamingFormat::Wav;
        assert!(!f.big_endian());
        assert!(f.needs_wav_header());
        assert_eq!(f.mime_descriptor(44100, 2), "audio/wav");
        assert_eq!(f.network_descriptor(44100, 2), "http-get:*:audio/wav:*");
    }
}
