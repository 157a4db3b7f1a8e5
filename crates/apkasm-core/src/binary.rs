//! Bounds-checked fixed-width integer reads.
//!
//! Every container format handled by this crate is a sequence of fixed-width
//! little- or big-endian fields at computed offsets. These helpers turn any
//! out-of-range access into [`Error::MalformedHeader`] instead of a panic.

use crate::error::{Error, Result};

/// Byte order of a binary structure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    /// Least significant byte first
    Little,
    /// Most significant byte first
    Big,
}

/// Returns `data[offset..offset + len]` or a malformed-header error.
pub fn slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    let end = offset.checked_add(len).ok_or_else(|| {
        Error::malformed_header(offset, format!("length {} overflows the address space", len))
    })?;

    data.get(offset..end).ok_or_else(|| {
        Error::malformed_header(
            offset,
            format!("need {} bytes, but only {} are available", len, data.len().saturating_sub(offset)),
        )
    })
}

fn array<const N: usize>(data: &[u8], offset: usize) -> Result<[u8; N]> {
    let mut out = [0u8; N];
    out.copy_from_slice(slice(data, offset, N)?);
    Ok(out)
}

/// Reads a single byte.
pub fn read_u8(data: &[u8], offset: usize) -> Result<u8> {
    data.get(offset)
        .copied()
        .ok_or_else(|| Error::malformed_header(offset, "need 1 byte, but none are available"))
}

/// Reads a `u16` in the given byte order.
pub fn read_u16(data: &[u8], offset: usize, endian: Endian) -> Result<u16> {
    let bytes = array::<2>(data, offset)?;
    Ok(match endian {
        Endian::Little => u16::from_le_bytes(bytes),
        Endian::Big => u16::from_be_bytes(bytes),
    })
}

/// Reads a `u32` in the given byte order.
pub fn read_u32(data: &[u8], offset: usize, endian: Endian) -> Result<u32> {
    let bytes = array::<4>(data, offset)?;
    Ok(match endian {
        Endian::Little => u32::from_le_bytes(bytes),
        Endian::Big => u32::from_be_bytes(bytes),
    })
}

/// Reads a `u64` in the given byte order.
pub fn read_u64(data: &[u8], offset: usize, endian: Endian) -> Result<u64> {
    let bytes = array::<8>(data, offset)?;
    Ok(match endian {
        Endian::Little => u64::from_le_bytes(bytes),
        Endian::Big => u64::from_be_bytes(bytes),
    })
}

/// Reads a little-endian `u16`.
pub fn le_u16(data: &[u8], offset: usize) -> Result<u16> {
    read_u16(data, offset, Endian::Little)
}

/// Reads a little-endian `u32`.
pub fn le_u32(data: &[u8], offset: usize) -> Result<u32> {
    read_u32(data, offset, Endian::Little)
}

/// Reads a little-endian `i32`.
pub fn le_i32(data: &[u8], offset: usize) -> Result<i32> {
    Ok(i32::from_le_bytes(array::<4>(data, offset)?))
}

/// Reads a little-endian `u64`.
pub fn le_u64(data: &[u8], offset: usize) -> Result<u64> {
    read_u64(data, offset, Endian::Little)
}

/// Converts a 64-bit file offset or size into `usize`.
pub fn to_usize(value: u64, offset: usize) -> Result<usize> {
    usize::try_from(value).map_err(|_| {
        Error::malformed_header(offset, format!("value {:#x} does not fit in memory", value))
    })
}
