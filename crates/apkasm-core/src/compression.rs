//! Detection and decoding of the `XALZ` assembly compression envelope.
//!
//! Assemblies packed by the Android build may be LZ4 block compressed. Such
//! blobs carry a 12-byte header:
//!
//! ```text
//! [ 4 bytes magic "XALZ" ][ 4 bytes descriptor index ][ 4 bytes i32 decompressed length ]
//! [ LZ4 block payload ... ]
//! ```
//!
//! Anything that does not start with the magic is stored as-is.

use crate::binary;
use crate::error::{Error, Result};
use bytes::Bytes;
use tracing::trace;

/// Envelope magic, `"XALZ"` read as a little-endian `u32`
pub const COMPRESSED_DATA_MAGIC: u32 = 0x5A4C_4158;

/// Size of the envelope header preceding the LZ4 payload
pub const HEADER_SIZE: usize = 12;

/// Parsed compression envelope header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeHeader {
    /// Opaque descriptor index written by the packager
    pub descriptor_index: u32,
    /// Exact size of the decoded payload
    pub decompressed_len: usize,
}

/// Returns true if `data` starts with the envelope magic.
pub fn is_compressed(data: &[u8]) -> bool {
    matches!(binary::le_u32(data, 0), Ok(COMPRESSED_DATA_MAGIC))
}

/// Reads the envelope header.
///
/// Returns `Ok(None)` when the magic is absent. Once the magic matches, the
/// remaining header fields are mandatory.
pub fn read_header(data: &[u8]) -> Result<Option<EnvelopeHeader>> {
    if !is_compressed(data) {
        return Ok(None);
    }

    if data.len() < HEADER_SIZE {
        return Err(Error::malformed_header(
            data.len(),
            format!(
                "compression header needs {} bytes, but only {} are available",
                HEADER_SIZE,
                data.len()
            ),
        ));
    }

    let descriptor_index = binary::le_u32(data, 4)?;
    let length = binary::le_i32(data, 8)?;
    let decompressed_len = usize::try_from(length).map_err(|_| {
        Error::malformed_header(8, format!("negative decompressed length {}", length))
    })?;

    Ok(Some(EnvelopeHeader {
        descriptor_index,
        decompressed_len,
    }))
}

/// Decompresses `data` if it carries the envelope.
///
/// `Ok(None)` means the input is not compressed and should be used unchanged.
pub fn decompress(data: &[u8]) -> Result<Option<Vec<u8>>> {
    let Some(header) = read_header(data)? else {
        return Ok(None);
    };

    let payload = &data[HEADER_SIZE..];
    trace!(
        "Decompressing {} byte LZ4 payload into {} bytes",
        payload.len(),
        header.decompressed_len
    );

    let mut output = vec![0u8; header.decompressed_len];
    if header.decompressed_len == 0 {
        return Ok(Some(output));
    }

    let decoded = lz4_flex::block::decompress_into(payload, &mut output)?;
    if decoded != header.decompressed_len {
        return Err(Error::DecodeMismatch {
            expected: header.decompressed_len,
            actual: decoded,
        });
    }

    Ok(Some(output))
}

/// Decompresses a shared buffer, handing back the same buffer when it is not
/// compressed.
///
/// `data` may be a slice of a larger store buffer; the returned value never
/// aliases a buffer that another call could write to.
pub fn decompress_bytes(data: Bytes) -> Result<Bytes> {
    match decompress(&data)? {
        Some(decoded) => Ok(Bytes::from(decoded)),
        None => Ok(data),
    }
}
