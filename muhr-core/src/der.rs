//! Minimal DER tag-length-value reading.

use thiserror::Error;

/// Structural DER decoding failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DerError {
    #[error("unexpected tag {found:#04x} at offset {offset}, expected {expected:#04x}")]
    UnexpectedTag {
        offset: usize,
        expected: u8,
        found: u8,
    },
    #[error("truncated TLV record at offset {offset}")]
    Truncated { offset: usize },
}

/// Reads one TLV record at `cursor`, checking the tag byte against
/// `expected`. Returns the value slice and the cursor advanced past it.
///
/// Long-form lengths (length byte with the high bit set) combine the
/// following big-endian octets into the true length; short-form lengths are
/// the low seven bits directly. A zero-length value is valid and yields an
/// empty slice. Nested structures are read by calling this again on a
/// returned value slice with a fresh cursor.
pub fn expect_tlv(buf: &[u8], cursor: usize, expected: u8) -> Result<(&[u8], usize), DerError> {
    let mut pos = cursor;
    let found = *buf.get(pos).ok_or(DerError::Truncated { offset: pos })?;
    if found != expected {
        return Err(DerError::UnexpectedTag {
            offset: pos,
            expected,
            found,
        });
    }
    pos += 1;

    let first = *buf.get(pos).ok_or(DerError::Truncated { offset: pos })?;
    pos += 1;
    let len = if first & 0x80 != 0 {
        let octets = (first & 0x7f) as usize;
        let mut len = 0usize;
        for _ in 0..octets {
            let octet = *buf.get(pos).ok_or(DerError::Truncated { offset: pos })?;
            len = (len << 8) | octet as usize;
            pos += 1;
        }
        len
    } else {
        (first & 0x7f) as usize
    };

    let value = buf
        .get(pos..pos + len)
        .ok_or(DerError::Truncated { offset: pos })?;
    Ok((value, pos + len))
}
