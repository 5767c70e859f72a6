//! Framing of records on a ledger.
//!
//! ```text
//! | magic "SSLG" (4) | length (4) | record (length) | crc32 (4) |
//! ```
//!
//! The CRC covers magic, length and record. Integers are big-endian.

use crate::error::{CoreError, CoreResult};

/// Magic bytes opening every frame.
pub const FRAME_MAGIC: [u8; 4] = *b"SSLG";

/// Size of the frame header (magic + length).
pub const FRAME_HEADER_SIZE: usize = 8;

/// Size of the trailing checksum.
pub const CRC_SIZE: usize = 4;

/// Bytes a frame adds around its record.
pub const FRAME_OVERHEAD: usize = FRAME_HEADER_SIZE + CRC_SIZE;

/// Computes the CRC32 checksum of data.
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Wraps a serialized record in a frame.
///
/// # Errors
///
/// Returns [`CoreError::SerializationPrecondition`] if the record does not
/// fit the 32-bit length field.
pub fn encode_frame(record: &[u8]) -> CoreResult<Vec<u8>> {
    let len = u32::try_from(record.len())
        .map_err(|_| CoreError::precondition("record", "larger than 4 GiB"))?;

    let mut frame = Vec::with_capacity(FRAME_OVERHEAD + record.len());
    frame.extend_from_slice(&FRAME_MAGIC);
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(record);
    let crc = compute_crc32(&frame);
    frame.extend_from_slice(&crc.to_be_bytes());
    Ok(frame)
}

/// Parses a frame header, returning the record length.
///
/// # Errors
///
/// Returns [`CoreError::LogCorruption`] if the magic is wrong.
pub fn decode_header(header: &[u8; FRAME_HEADER_SIZE], offset: u64) -> CoreResult<usize> {
    if header[0..4] != FRAME_MAGIC {
        return Err(CoreError::log_corruption(format!(
            "invalid frame magic at offset {offset}"
        )));
    }
    Ok(u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize)
}

/// Verifies a complete frame and returns its record bytes.
///
/// # Errors
///
/// Returns [`CoreError::ChecksumMismatch`] if the CRC does not match.
pub fn verify_frame(frame: &[u8]) -> CoreResult<&[u8]> {
    if frame.len() < FRAME_OVERHEAD {
        return Err(CoreError::log_corruption("frame shorter than its envelope"));
    }
    let (body, crc) = frame.split_at(frame.len() - CRC_SIZE);
    let expected = u32::from_be_bytes([crc[0], crc[1], crc[2], crc[3]]);
    let actual = compute_crc32(body);
    if expected != actual {
        return Err(CoreError::ChecksumMismatch { expected, actual });
    }
    Ok(&body[FRAME_HEADER_SIZE..])
}
