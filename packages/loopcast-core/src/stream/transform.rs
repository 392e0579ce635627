//! Write-time byte transforms.
//!
//! A transform turns captured bytes into the representation stored in a
//! consumer's ring buffer. It runs once per write, before storage.

use thiserror::Error;

use super::StreamingFormat;
use crate::protocol_constants::PCM_BYTES_PER_SAMPLE;

/// Errors raised while transforming a captured chunk.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransformError {
    /// The chunk doesn't hold a whole number of sample frames.
    #[error("chunk of {len} bytes is not a multiple of the {frame_bytes}-byte frame size")]
    InvalidChunkLength { len: usize, frame_bytes: usize },
}

/// Transforms captured source bytes into output bytes.
///
/// Implementations may keep a scratch buffer and return a slice into it, or
/// return the input unchanged. Only one writer calls a given transform at a
/// time (the ring buffer owning it is always behind a lock).
pub trait InputTransform: Send {
    /// Returns the bytes to store for `data`.
    fn transform<'a>(&'a mut self, data: &'a [u8]) -> Result<&'a [u8], TransformError>;
}

/// Stores bytes as captured.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityTransform;

impl InputTransform for IdentityTransform {
    fn transform<'a>(&'a mut self, data: &'a [u8]) -> Result<&'a [u8], TransformError> {
        Ok(data)
    }
}

/// Converts 16-bit little-endian capture data to the wire byte order.
///
/// When the target format is big-endian every sample pair is swapped into a
/// reusable scratch buffer; otherwise the input slice is returned as-is.
/// Either way the chunk must hold whole frames.
#[derive(Debug)]
pub struct EndianTransform {
    big_endian: bool,
    frame_bytes: usize,
    scratch: Vec<u8>,
}

impl EndianTransform {
    /// Creates a transform for the given byte order and frame size.
    ///
    /// `frame_bytes` is the size of one interleaved frame (channels × 2). It's
    /// clamped to at least one sample.
    #[must_use]
    pub fn new(big_endian: bool, frame_bytes: usize) -> Self {
        Self {
            big_endian,
            frame_bytes: frame_bytes.max(PCM_BYTES_PER_SAMPLE),
            scratch: Vec::new(),
        }
    }

    /// Creates the transform a consumer of `format` needs.
    #[must_use]
    pub fn for_format(format: StreamingFormat, frame_bytes: usize) -> Self {
        Self::new(format.big_endian(), frame_bytes)
    }

    /// Whether this transform swaps bytes.
    #[must_use]
    pub fn is_big_endian(&self) -> bool {
        self.big_endian
    }
}

impl InputTransform for EndianTransform {
    fn transform<'a>(&'a mut self, data: &'a [u8]) -> Result<&'a [u8], TransformError> {
        if data.len() % self.frame_bytes != 0 {
            return Err(TransformError::InvalidChunkLength {
                len: data.len(),
                frame_bytes: self.frame_bytes,
            });
        }

        if !self.big_endian {
            return Ok(data);
        }

        // Grows to the largest chunk seen, then stays put.
        if self.scratch.len() < data.len() {
            self.scratch.resize(data.len(), 0);
        }
        let out = &mut self.scratch[..data.len()];
        for (dst, src) in out
            .chunks_exact_mut(PCM_BYTES_PER_SAMPLE)
            .zip(data.chunks_exact(PCM_BYTES_PER_SAMPLE))
        {
            dst[0] = src[1];
            dst[1] = src[0];
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn big_endian_swaps_sample_pairs() {
        let mut t = EndianTransform::new(true, 2);
        let out = t.transform(&[0x01, 0x02, 0x03, 0x04]).unwrap();
        assert_eq!(out, &[0x02, 0x01, 0x04, 0x03]);
    }

    #[test]
    fn little_endian_returns_same_slice() {
        let mut t = EndianTransform::new(false, 2);
        let input = [0x01, 0x02, 0x03, 0x04];
        let out = t.transform(&input).unwrap();
        assert_eq!(out, &input);
        assert!(std::ptr::eq(out.as_ptr(), input.as_ptr()));
    }

    #[test]
    fn rejects_partial_frames() {
        let mut t = EndianTransform::new(true, 4);
        assert_eq!(
            t.transform(&[0u8; 6]),
            Err(TransformError::InvalidChunkLength {
                len: 6,
                frame_bytes: 4
            })
        );

        let mut odd = EndianTransform::new(false, 2);
        assert!(odd.transform(&[1, 2, 3]).is_err());
    }

    #[test]
    fn scratch_is_reused_across_sizes() {
        let mut t = EndianTransform::new(true, 2);
        assert_eq!(t.transform(&[1, 2, 3, 4, 5, 6]).unwrap(), &[2, 1, 4, 3, 6, 5]);
        // A shorter chunk afterwards must not leak stale scratch bytes.
        assert_eq!(t.transform(&[7, 8]).unwrap(), &[8, 7]);
    }

    #[test]
    fn format_selects_byte_order() {
        assert!(EndianTransform::for_format(StreamingFormat::Lpcm, 4).is_big_endian());
        assert!(!EndianTransform::for_format(StreamingFormat::Wav, 4).is_big_endian());
    }
}
