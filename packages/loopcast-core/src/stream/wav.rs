use bytes::{BufMut, Bytes, BytesMut};

use super::AudioFormat;
use crate::protocol_constants::{WAV_HEADER_LEN, WAV_STREAM_SIZE_MAX};

/// Generates a standard 44-byte WAVE header for an unbounded PCM stream.
///
/// The RIFF and data chunk sizes are set to the largest values a 32-bit
/// header can express, so players treat the stream as a very long file.
pub fn create_wav_header(format: &AudioFormat) -> Bytes {
    let mut header = BytesMut::with_capacity(WAV_HEADER_LEN);

    // RIFF header
    header.put_slice(b"RIFF");
    header.put_u32_le(WAV_STREAM_SIZE_MAX - 8); // Everything after this field
    header.put_slice(b"WAVE");

    // fmt chunk
    header.put_slice(b"fmt ");
    header.put_u32_le(16); // Chunk size
    header.put_u16_le(1); // Audio format (PCM)
    header.put_u16_le(format.channels);
    header.put_u32_le(format.sample_rate);
    header.put_u32_le(format.byte_rate());
    header.put_u16_le(format.block_align() as u16);
    header.put_u16_le(format.bits_per_sample);

    // data chunk
    header.put_slice(b"data");
    header.put_u32_le(WAV_STREAM_SIZE_MAX - WAV_HEADER_LEN as u32);

    header.freeze()
}
