//! ICY (Shoutcast) protocol metadata handling.
//!
//! A client that sends `Icy-MetaData: 1` gets a metadata block after every
//! `interval` audio bytes. Blocks are `[n][payload padded to 16 * n]`; a lone
//! zero byte means "no change".
//!
//! The embedder here is pull-based: it wraps a [`ByteSource`] and produces the
//! interleaved stream on `read`, keeping exact byte accounting across partial
//! reads and interval boundaries.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use thiserror::Error;

use super::ring_buffer::ByteSource;
use crate::metadata::TrackInfo;
use crate::protocol_constants::{ICY_BLOCK_UNIT, ICY_MAX_PAYLOAD};

/// Errors from building a metadata block.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MetadataError {
    /// The padded payload would not fit the one-byte length prefix.
    #[error("metadata payload of {padded_len} bytes exceeds the {max} byte limit")]
    TitleTooLong { padded_len: usize, max: usize },
}

/// Formats track info into ICY metadata blocks.
pub struct IcyFormatter;

impl IcyFormatter {
    /// The "no change" block: a single zero length byte.
    #[must_use]
    pub fn empty_block() -> Bytes {
        Bytes::from_static(&[0])
    }

    /// Builds a complete block (length byte plus padded payload) for `info`.
    ///
    /// The payload is `StreamTitle='<full title>';` in UTF-8, zero-padded up to
    /// the next multiple of 16. An already aligned payload gets no padding.
    pub fn format_block(info: &TrackInfo) -> Result<Bytes, MetadataError> {
        // Single quotes delimit the value; swap in U+2019 so a title like
        // "It's" can't terminate it early.
        let title = info.full_title.replace('\'', "\u{2019}");
        let payload = format!("StreamTitle='{}';", title);
        let payload = payload.as_bytes();

        let num_blocks = payload.len().div_ceil(ICY_BLOCK_UNIT);
        let padded_len = num_blocks * ICY_BLOCK_UNIT;
        if padded_len > ICY_MAX_PAYLOAD {
            return Err(MetadataError::TitleTooLong {
                padded_len,
                max: ICY_MAX_PAYLOAD,
            });
        }

        let mut block = Vec::with_capacity(padded_len + 1);
        block.push(num_blocks as u8);
        block.extend_from_slice(payload);
        block.resize(padded_len + 1, 0);

        log::trace!(
            "[ICY] StreamTitle='{}' ({} blocks)",
            info.full_title,
            num_blocks
        );
        Ok(Bytes::from(block))
    }
}

/// Cloneable setter for an embedder's pending metadata block.
///
/// Lets a track-info listener update the block while the owning session keeps
/// reading. The block is swapped whole under a lock, and the embedder takes a
/// snapshot before emitting, so a reader never sees a mix of two titles.
#[derive(Clone)]
pub struct MetadataHandle {
    pending: Arc<Mutex<Bytes>>,
}

impl MetadataHandle {
    /// Replaces the pending block with one built from `info`.
    ///
    /// On [`MetadataError::TitleTooLong`] the previous block is kept.
    pub fn set_track_info(&self, info: &TrackInfo) -> Result<(), MetadataError> {
        let block = IcyFormatter::format_block(info)?;
        *self.pending.lock() = block;
        Ok(())
    }

    /// Takes the pending block, leaving the "no change" block in its place.
    fn take(&self) -> Bytes {
        std::mem::replace(&mut *self.pending.lock(), IcyFormatter::empty_block())
    }

    #[cfg(test)]
    fn peek(&self) -> Bytes {
        self.pending.lock().clone()
    }
}

/// Where the embedder is within the current interval.
enum EmbedState {
    /// Passing audio through; counts bytes since the last block.
    Streaming,
    /// Emitting `block` starting at `offset`.
    EmittingMetadata { block: Bytes, offset: usize },
}

/// Interleaves metadata blocks into a byte source every `interval` bytes.
///
/// Exposes the same `read` contract as the wrapped source. One call may cross
/// any number of interval boundaries; it stops early only when the inner
/// source has nothing more to give.
pub struct MetadataEmbedder {
    interval: usize,
    bytes_since_last_block: usize,
    state: EmbedState,
    handle: MetadataHandle,
}

impl MetadataEmbedder {
    /// Creates an embedder that inserts a block after every `interval` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `interval` is zero.
    pub fn new(interval: usize) -> Self {
        assert!(interval > 0, "metadata interval must be non-zero");
        Self {
            interval,
            bytes_since_last_block: 0,
            state: EmbedState::Streaming,
            handle: MetadataHandle {
                pending: Arc::new(Mutex::new(IcyFormatter::empty_block())),
            },
        }
    }

    /// Audio bytes between two metadata blocks.
    #[must_use]
    pub fn interval(&self) -> usize {
        self.interval
    }

    /// Returns a setter that can update metadata from elsewhere.
    #[must_use]
    pub fn handle(&self) -> MetadataHandle {
        self.handle.clone()
    }

    /// Replaces the pending metadata block.
    pub fn set_track_info(&self, info: &TrackInfo) -> Result<(), MetadataError> {
        self.handle.set_track_info(info)
    }

    /// Audio bytes delivered since the last block.
    #[must_use]
    pub fn bytes_since_last_block(&self) -> usize {
        self.bytes_since_last_block
    }

    /// Borrows `source` as a [`ByteSource`] that yields the interleaved
    /// stream, so embedders and other decorators can be stacked.
    pub fn wrap<'a, S: ByteSource + ?Sized>(&'a mut self, source: &'a mut S) -> Embedded<'a, S> {
        Embedded {
            embedder: self,
            source,
        }
    }

    /// Fills `out` with interleaved audio and metadata read from `source`.
    ///
    /// Returns the number of bytes written to `out`.
    pub fn read<S: ByteSource + ?Sized>(&mut self, source: &mut S, out: &mut [u8]) -> usize {
        let mut written = 0;

        while written < out.len() {
            match &mut self.state {
                EmbedState::Streaming => {
                    let room = self.interval - self.bytes_since_last_block;
                    if room == 0 {
                        self.state = EmbedState::EmittingMetadata {
                            block: self.handle.take(),
                            offset: 0,
                        };
                        continue;
                    }

                    let want = room.min(out.len() - written);
                    let n = source.read(&mut out[written..written + want]);
                    if n == 0 {
                        break;
                    }
                    self.bytes_since_last_block += n;
                    written += n;
                }
                EmbedState::EmittingMetadata { block, offset } => {
                    let n = (block.len() - *offset).min(out.len() - written);
                    out[written..written + n].copy_from_slice(&block[*offset..*offset + n]);
                    *offset += n;
                    written += n;

                    if *offset == block.len() {
                        self.bytes_since_last_block = 0;
                        self.state = EmbedState::Streaming;
                    }
                }
            }
        }

        written
    }
}

/// A source read through a [`MetadataEmbedder`]. See [`MetadataEmbedder::wrap`].
pub struct Embedded<'a, S: ?Sized> {
    embedder: &'a mut MetadataEmbedder,
    source: &'a mut S,
}

impl<S: ByteSource + ?Sized> ByteSource for Embedded<'_, S> {
    fn read(&mut self, out: &mut [u8]) -> usize {
        self.embedder.read(self.source, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Endless source of a repeating byte.
    struct Fill(u8);

    impl ByteSource for Fill {
        fn read(&mut self, out: &mut [u8]) -> usize {
            out.fill(self.0);
            out.len()
        }
    }

    /// Source with a fixed number of bytes, then dry.
    struct Limited(usize);

    impl ByteSource for Limited {
        fn read(&mut self, out: &mut [u8]) -> usize {
            let n = out.len().min(self.0);
            out[..n].fill(0xAA);
            self.0 -= n;
            n
        }
    }

    fn titled(title: &str) -> TrackInfo {
        TrackInfo::from_title(title)
    }

    #[test]
    fn block_length_byte_rounds_up() {
        // "StreamTitle='ab';" is 17 bytes -> two 16-byte units.
        let block = IcyFormatter::format_block(&titled("ab")).unwrap();
        assert_eq!(block[0], 2);
        assert_eq!(block.len(), 33);
        assert_eq!(&block[1..18], b"StreamTitle='ab';");
        assert!(block[18..].iter().all(|&b| b == 0));
    }

    #[test]
    fn aligned_payload_gets_no_extra_padding() {
        // "StreamTitle='';" is 15 bytes; a 1-char title makes exactly 16.
        let block = IcyFormatter::format_block(&titled("x")).unwrap();
        assert_eq!(&block[1..], b"StreamTitle='x';");
        assert_eq!(block[0], 1);
        assert_eq!(block.len(), 17);

        // 32-byte payload: 2 units, not 3.
        let block = IcyFormatter::format_block(&titled("abcdefghijklmnopq")).unwrap();
        assert_eq!(block.len(), 33);
        assert_eq!(block[0], 2);
    }

    #[test]
    fn quotes_are_replaced() {
        let block = IcyFormatter::format_block(&titled("It's")).unwrap();
        let text = String::from_utf8_lossy(&block[1..]);
        assert!(text.contains("It\u{2019}s"));
        assert!(!text.contains("It's"));
    }

    #[test]
    fn oversized_title_is_rejected_and_previous_block_kept() {
        let embedder = MetadataEmbedder::new(1000);
        embedder.set_track_info(&titled("short")).unwrap();
        let before = embedder.handle.peek();

        let long = "x".repeat(ICY_MAX_PAYLOAD);
        assert!(matches!(
            embedder.set_track_info(&titled(&long)),
            Err(MetadataError::TitleTooLong { .. })
        ));
        assert_eq!(embedder.handle.peek(), before);
    }

    #[test]
    fn largest_title_that_fits() {
        // 15 bytes of framing + 4065 title bytes = 4080 exactly.
        let title = "y".repeat(ICY_MAX_PAYLOAD - 15);
        let block = IcyFormatter::format_block(&titled(&title)).unwrap();
        assert_eq!(block[0], 255);
        assert_eq!(block.len(), ICY_MAX_PAYLOAD + 1);
    }

    #[test]
    fn interval_then_block_then_audio() {
        let mut embedder = MetadataEmbedder::new(1000);
        embedder.set_track_info(&titled("ab")).unwrap();
        let mut source = Fill(0x55);

        let mut out = vec![0u8; 1033];
        assert_eq!(embedder.read(&mut source, &mut out), 1033);
        assert!(out[..1000].iter().all(|&b| b == 0x55));
        assert_eq!(out[1000], 2);
        assert_eq!(&out[1001..1018], b"StreamTitle='ab';");
        assert!(out[1018..1033].iter().all(|&b| b == 0));
        assert_eq!(embedder.bytes_since_last_block(), 0);

        let mut next = vec![0u8; 1000];
        assert_eq!(embedder.read(&mut source, &mut next), 1000);
        assert!(next.iter().all(|&b| b == 0x55));
    }

    #[test]
    fn block_is_sent_once_then_empty_marker() {
        let mut embedder = MetadataEmbedder::new(16);
        embedder.set_track_info(&titled("x")).unwrap();
        let mut source = Fill(1);

        // 16 audio + 17 block + 16 audio + 1 empty marker
        let mut out = vec![0xFFu8; 50];
        assert_eq!(embedder.read(&mut source, &mut out), 50);
        assert_eq!(out[16], 1);
        assert_eq!(&out[17..33], b"StreamTitle='x';");
        assert!(out[33..49].iter().all(|&b| b == 1));
        assert_eq!(out[49], 0);
    }

    #[test]
    fn read_spans_many_boundaries() {
        let mut embedder = MetadataEmbedder::new(10);
        let mut source = Fill(7);

        // Empty blocks are one byte each: 3 intervals = 3 * 11.
        let mut out = vec![0u8; 33];
        assert_eq!(embedder.read(&mut source, &mut out), 33);
        for i in 0..3 {
            let start = i * 11;
            assert!(out[start..start + 10].iter().all(|&b| b == 7));
            assert_eq!(out[start + 10], 0);
        }
    }

    #[test]
    fn block_split_across_small_reads() {
        let mut embedder = MetadataEmbedder::new(4);
        embedder.set_track_info(&titled("x")).unwrap();
        let mut source = Fill(9);

        let mut collected = Vec::new();
        let mut chunk = [0u8; 3];
        while collected.len() < 4 + 17 + 4 {
            let n = embedder.read(&mut source, &mut chunk);
            collected.extend_from_slice(&chunk[..n]);
        }
        assert_eq!(&collected[..4], &[9, 9, 9, 9]);
        assert_eq!(collected[4], 1);
        assert_eq!(&collected[5..21], b"StreamTitle='x';");
        assert_eq!(&collected[21..25], &[9, 9, 9, 9]);
    }

    #[test]
    fn dry_source_stops_early_and_resumes_mid_interval() {
        let mut embedder = MetadataEmbedder::new(10);
        let mut source = Limited(6);

        let mut out = [0u8; 20];
        assert_eq!(embedder.read(&mut source, &mut out), 6);
        assert_eq!(embedder.bytes_since_last_block(), 6);

        let mut source = Limited(100);
        assert_eq!(embedder.read(&mut source, &mut out), 20);
        // 4 audio to finish the interval, empty marker, 15 audio
        assert_eq!(out[4], 0);
        assert_eq!(embedder.bytes_since_last_block(), 15);
    }

    #[test]
    fn wrapped_embedders_stack() {
        let mut inner = MetadataEmbedder::new(4);
        let mut outer = MetadataEmbedder::new(5);
        let mut source = Fill(7);

        let mut once = inner.wrap(&mut source);
        let mut twice = outer.wrap(&mut once);

        // The outer embedder counts the inner markers as payload.
        let mut out = [0xFFu8; 12];
        assert_eq!(twice.read(&mut out), 12);
        assert_eq!(out, [7, 7, 7, 7, 0, 0, 7, 7, 7, 7, 0, 0]);
    }

    #[test]
    fn update_during_emission_waits_for_next_interval() {
        let mut embedder = MetadataEmbedder::new(4);
        embedder.set_track_info(&titled("x")).unwrap();
        let handle = embedder.handle();
        let mut source = Fill(3);

        // Stop halfway through the first block.
        let mut out = [0u8; 10];
        assert_eq!(embedder.read(&mut source, &mut out), 10);
        assert_eq!(out[4], 1);

        handle.set_track_info(&titled("y")).unwrap();

        let mut rest = [0u8; 11 + 4 + 17];
        assert_eq!(embedder.read(&mut source, &mut rest), rest.len());
        // Remainder of the old block is untouched by the update.
        assert_eq!(&rest[..11], b"mTitle='x';");
        assert!(rest[11..15].iter().all(|&b| b == 3));
        assert_eq!(rest[15], 1);
        assert_eq!(&rest[16..32], b"StreamTitle='y';");
    }
}
