//! Audio delivery pipeline.
//!
//! Capture chunks enter through the [`CaptureMultiplexer`], which fans them
//! out to one [`RingBuffer`] per consumer. Each consumer's [`StreamSession`]
//! drains its buffer (through a [`MetadataEmbedder`] when ICY metadata was
//! requested) into a [`Transport`].

pub mod format;
pub mod icy;
pub mod multiplexer;
pub mod ring_buffer;
pub mod session;
pub mod transform;
pub mod wav;

pub use format::{FormatError, FormatRegistry, StreamingFormat};
pub use icy::{Embedded, IcyFormatter, MetadataEmbedder, MetadataError, MetadataHandle};
pub use multiplexer::{ActiveDevice, BufferLease, CaptureMultiplexer, MultiplexerError};
pub use ring_buffer::{BufferError, ByteSource, RingBuffer};
pub use session::{
    ChannelTransport, SessionOutcome, StreamSession, StreamSessionConfig, Transport,
    TransportError,
};
pub use transform::{EndianTransform, IdentityTransform, InputTransform, TransformError};
pub use wav::create_wav_header;

use std::collections::HashMap;
use std::sync::OnceLock;

use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::protocol_constants::{
    DEFAULT_CHANNELS, DEFAULT_SAMPLE_RATE, PCM_BITS_PER_SAMPLE, PCM_BYTES_PER_SAMPLE,
};

// ─────────────────────────────────────────────────────────────────────────────
// Silence Frame Cache
// ─────────────────────────────────────────────────────────────────────────────

/// Silence frames keyed by byte length. Never cleared; there are only a few
/// distinct sizes per process.
static SILENCE_CACHE: OnceLock<RwLock<HashMap<usize, Bytes>>> = OnceLock::new();

fn get_or_create_silence(byte_len: usize) -> Bytes {
    let cache = SILENCE_CACHE.get_or_init(|| RwLock::new(HashMap::new()));

    if let Some(silence) = cache.read().get(&byte_len) {
        return silence.clone();
    }

    let mut cache_write = cache.write();
    if let Some(silence) = cache_write.get(&byte_len) {
        return silence.clone();
    }

    let silence = Bytes::from(vec![0u8; byte_len]);
    cache_write.insert(byte_len, silence.clone());
    silence
}

// ─────────────────────────────────────────────────────────────────────────────
// Audio Format
// ─────────────────────────────────────────────────────────────────────────────

/// PCM format of a capture device.
///
/// Capture is always interleaved signed 16-bit little-endian; only rate and
/// channel count vary per device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    #[serde(default = "default_bits_per_sample")]
    pub bits_per_sample: u16,
}

fn default_bits_per_sample() -> u16 {
    PCM_BITS_PER_SAMPLE
}

impl AudioFormat {
    pub fn new(sample_rate: u32, channels: u16, bits_per_sample: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample,
        }
    }

    /// Bytes in one interleaved frame (one sample for every channel).
    #[inline]
    pub const fn block_align(&self) -> usize {
        self.channels as usize * PCM_BYTES_PER_SAMPLE
    }

    /// Bytes per second of audio.
    #[inline]
    pub const fn byte_rate(&self) -> u32 {
        self.sample_rate * self.block_align() as u32
    }

    /// Bytes covering `duration_ms` of audio, rounded down to whole frames.
    #[inline]
    pub fn frame_bytes(&self, duration_ms: u32) -> usize {
        let frames = (self.sample_rate as u64).saturating_mul(duration_ms as u64) / 1000;
        frames.saturating_mul(self.block_align() as u64) as usize
    }

    /// Digital silence of `duration_ms`. Cached by length, so clones are cheap.
    pub fn silence_frame(&self, duration_ms: u32) -> Bytes {
        get_or_create_silence(self.frame_bytes(duration_ms))
    }

    /// Checks the format can be captured and streamed.
    ///
    /// Only mono and stereo 16-bit are accepted: the 44-byte WAV header has to
    /// stay frame-aligned when it's written into a consumer's buffer.
    pub fn validate(&self) -> Result<(), String> {
        if self.sample_rate == 0 {
            return Err("sample_rate must be greater than 0".to_string());
        }
        if !(1..=2).contains(&self.channels) {
            return Err(format!("channels must be 1 or 2, got {}", self.channels));
        }
        if self.bits_per_sample != PCM_BITS_PER_SAMPLE {
            return Err(format!(
                "bits_per_sample must be {}, got {}",
                PCM_BITS_PER_SAMPLE, self.bits_per_sample
            ));
        }
        Ok(())
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            bits_per_sample: PCM_BITS_PER_SAMPLE,
        }
    }
}
