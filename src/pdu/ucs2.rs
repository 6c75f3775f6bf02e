//! UCS-2 ↔ UTF-8 conversion.
//!
//! SMS user data and USSD bodies use big-endian UCS-2 code units. Only the
//! BMP is addressable; surrogate halves are passed through unpaired-checked
//! so malformed network data is reported instead of replaced.

use crate::error::{Error, Result};

/// Decode big-endian UCS-2 code units to a UTF-8 string.
pub fn ucs2_to_utf8(units: &[u16]) -> Result<String> {
    let mut out = String::with_capacity(units.len());
    let mut iter = units.iter().copied();
    while let Some(u) = iter.next() {
        match u {
            0xd800..=0xdbff => {
                let low = iter.next().ok_or(Error::ParseUcs2)?;
                if !(0xdc00..=0xdfff).contains(&low) {
                    return Err(Error::ParseUcs2);
                }
                let c = 0x10000 + (((u as u32 - 0xd800) << 10) | (low as u32 - 0xdc00));
                out.push(char::from_u32(c).ok_or(Error::ParseUcs2)?);
            }
            0xdc00..=0xdfff => return Err(Error::ParseUcs2),
            _ => out.push(char::from_u32(u as u32).ok_or(Error::ParseUcs2)?),
        }
    }
    Ok(out)
}

/// Decode a big-endian byte stream (pairs) to UTF-8.
pub fn ucs2_bytes_to_utf8(bytes: &[u8]) -> Result<String> {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|p| u16::from_be_bytes([p[0], p[1]]))
        .collect();
    ucs2_to_utf8(&units)
}

/// Encode a UTF-8 string as UCS-2 code units (surrogate pairs for
/// astral-plane codepoints, which callers sending BMP-only text never hit).
pub fn utf8_to_ucs2(text: &str) -> Vec<u16> {
    text.encode_utf16().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_and_cyrillic() {
        let units = utf8_to_ucs2("Привет hi");
        assert_eq!(ucs2_to_utf8(&units).unwrap(), "Привет hi");
    }

    #[test]
    fn byte_stream() {
        // "Пр" big-endian
        assert_eq!(ucs2_bytes_to_utf8(&[0x04, 0x1f, 0x04, 0x40]).unwrap(), "Пр");
    }

    #[test]
    fn surrogate_pair_roundtrip() {
        let units = utf8_to_ucs2("🙂");
        assert_eq!(units.len(), 2);
        assert_eq!(ucs2_to_utf8(&units).unwrap(), "🙂");
    }

    #[test]
    fn lone_surrogate_rejected() {
        assert_eq!(ucs2_to_utf8(&[0xd83d]), Err(Error::ParseUcs2));
        assert_eq!(ucs2_to_utf8(&[0xdc00, 0x0041]), Err(Error::ParseUcs2));
    }
}
