//! Checksummed frames.
//!
//! Every value written to a storage file is wrapped in a frame:
//!
//! ```text
//! | payload_len (4, LE) | payload (N) | crc32 (4, LE) |
//! ```
//!
//! The checksum covers the length prefix and the payload, so a torn or
//! bit-flipped frame never decodes.

use crate::error::{CodecError, CodecResult};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the length prefix.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Bytes a frame adds around its payload.
pub const FRAME_OVERHEAD: usize = FRAME_HEADER_SIZE + 4;

/// Upper bound on a single payload (256 MiB).
pub const MAX_PAYLOAD_SIZE: usize = 256 * 1024 * 1024;

/// Wraps a payload into a frame.
#[must_use]
pub fn frame(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(payload.len() + FRAME_OVERHEAD);
    #[allow(clippy::cast_possible_truncation)]
    buf.put_u32_le(payload.len() as u32);
    buf.put_slice(payload);
    let crc = crc32(&buf);
    buf.put_u32_le(crc);
    buf.freeze()
}

/// Returns the total frame length announced by a frame header.
///
/// # Errors
///
/// Fails if fewer than four header bytes are given or the declared
/// payload exceeds [`MAX_PAYLOAD_SIZE`].
pub fn frame_len(mut header: &[u8]) -> CodecResult<usize> {
    if header.len() < FRAME_HEADER_SIZE {
        return Err(CodecError::UnexpectedEof {
            needed: FRAME_HEADER_SIZE,
            available: header.len(),
        });
    }
    let payload_len = header.get_u32_le() as usize;
    if payload_len > MAX_PAYLOAD_SIZE {
        return Err(CodecError::InvalidFrameLength {
            length: payload_len,
        });
    }
    Ok(payload_len + FRAME_OVERHEAD)
}

/// Validates a complete frame and returns its payload.
///
/// # Errors
///
/// Fails on truncated input or a checksum mismatch.
pub fn unframe(data: &[u8]) -> CodecResult<&[u8]> {
    let total = frame_len(data)?;
    if data.len() < total {
        return Err(CodecError::UnexpectedEof {
            needed: total,
            available: data.len(),
        });
    }
    let body_end = total - 4;
    let mut tail = &data[body_end..total];
    let expected = tail.get_u32_le();
    let actual = crc32(&data[..body_end]);
    if expected != actual {
        return Err(CodecError::ChecksumMismatch { expected, actual });
    }
    Ok(&data[FRAME_HEADER_SIZE..body_end])
}

/// Computes CRC32 (IEEE polynomial).
#[must_use]
pub fn crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            #[allow(clippy::cast_possible_truncation)]
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ 0xEDB8_8320
                } else {
                    crc >> 1
                };
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        crc = (crc >> 8) ^ TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize];
    }
    !crc
}
