use super::error::{Corruption, Error, Result};
use byteorder::{ByteOrder, LE};

/// The only high word other than zero an offset may carry: the sign bit.
pub const SIGN_WORD: u32 = 0x8000_0000;

/// Single bsdiff control instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Control {
    /// Bytes taken from the diff section and added to the source.
    pub add: usize,
    /// Bytes copied verbatim from the extra section.
    pub copy: usize,
    /// Adjustment of the source cursor.
    pub seek: i64,
}

/// Decodes the offset stored at `view[offset..offset + 8]`.
///
/// Offsets are sign-magnitude 64-bit little endian integers. Only magnitudes
/// that fit in 32 bits are supported: the high word has to be either zero or
/// the bare sign bit, anything else is an `Error::OffsetRange`. Fewer than 8
/// bytes at `offset` is a `Corruption::TruncatedOffset`.
#[inline]
pub fn decode_offset(view: &[u8], offset: usize) -> Result<i64> {
    let b = offset
        .checked_add(8)
        .and_then(|end| view.get(offset..end))
        .ok_or(Corruption::TruncatedOffset {
            offset,
            len: view.len(),
        })?;
    let low = LE::read_i32(&b[..4]) as i64;
    match LE::read_u32(&b[4..]) {
        0 => Ok(low),
        SIGN_WORD => Ok(-low),
        high => Err(Error::OffsetRange { high }),
    }
}
