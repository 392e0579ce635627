//! Fixed protocol constants that should NOT be changed.
//!
//! These values are defined by external specifications (Shoutcast, RIFF/WAVE,
//! DLNA) and changing them would break protocol compliance.

// ─────────────────────────────────────────────────────────────────────────────
// Audio Standards
// ─────────────────────────────────────────────────────────────────────────────

/// Default audio sample rate (Hz).
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Default number of audio channels (stereo).
pub const DEFAULT_CHANNELS: u16 = 2;

/// The only sample width the pipeline carries. The endianness transform swaps
/// 16-bit sample pairs, and LPCM (`audio/L16`) is 16-bit by definition.
pub const PCM_BITS_PER_SAMPLE: u16 = 16;

/// Bytes per 16-bit PCM sample.
pub const PCM_BYTES_PER_SAMPLE: usize = 2;

/// Maximum size indicator for WAV streams (4,294,967,295 bytes / ~4.3 GB).
///
/// Used as HTTP Content-Length to signal an "infinite" stream. This prevents
/// chunked transfer encoding, which many renderers handle poorly for PCM.
pub const WAV_STREAM_SIZE_MAX: u32 = u32::MAX;

/// Size of the canonical RIFF/WAVE header.
pub const WAV_HEADER_LEN: usize = 44;

// ─────────────────────────────────────────────────────────────────────────────
// ICY Protocol (Shoutcast metadata)
// ─────────────────────────────────────────────────────────────────────────────

/// Request header a client sends to ask for interleaved metadata.
pub const ICY_METADATA_HEADER: &str = "icy-metadata";

/// Response header carrying the metadata interval in bytes.
pub const ICY_METAINT_HEADER: &str = "icy-metaint";

/// Payload granularity of an ICY metadata block.
pub const ICY_BLOCK_UNIT: usize = 16;

/// Largest padded ICY payload (the length byte counts 16-byte units, max 255).
pub const ICY_MAX_PAYLOAD: usize = ICY_BLOCK_UNIT * u8::MAX as usize;

// ─────────────────────────────────────────────────────────────────────────────
// Application Identity
// ─────────────────────────────────────────────────────────────────────────────

/// Application name used in protocol headers (`icy-name`).
pub const APP_NAME: &str = "Loopcast";

/// Value of the HTTP `Server` header on audio responses.
pub const SERVER_HEADER: &str = "UPnP/1.0 DLNADOC/1.50 Loopcast/1.0";

/// Service identifier returned by the health endpoint.
pub const SERVICE_ID: &str = "loopcast";

// ─────────────────────────────────────────────────────────────────────────────
// Streaming Configuration Defaults
// ─────────────────────────────────────────────────────────────────────────────

/// Default per-consumer ring buffer capacity (1 MiB).
pub const DEFAULT_BUFFER_CAPACITY: usize = 8192 * 128;

/// Default pause between two reads of a session loop (ms).
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Default duration of the silence block written into an empty buffer (ms).
pub const DEFAULT_SILENCE_MS: u32 = 100;

/// Default upper bound for a single transport write (bytes).
pub const DEFAULT_WRITE_BUFFER_SIZE: usize = 64 * 1024;

/// Number of in-flight body chunks between a session and its HTTP response.
pub const TRANSPORT_CHANNEL_CAPACITY: usize = 4;

/// Default interval for polling the track title source (ms).
pub const DEFAULT_TITLE_POLL_MS: u64 = 2000;

/// Capacity of the capture/session event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Capture chunk duration for generated sources (ms).
pub const CAPTURE_CHUNK_MS: u32 = 10;

/// Upper bound on one run of a title command (ms).
pub const TITLE_COMMAND_TIMEOUT_MS: u64 = 1500;
