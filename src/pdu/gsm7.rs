//! GSM 7-bit default alphabet (3GPP TS 23.038 §6.2).
//!
//! Encoding maps UCS-2 code units onto septet values, going through the
//! escape mechanism (0x1B) for the extension table. Packing folds septets
//! into octets LSB-first, optionally preceded by fill bits so that user
//! data following a UDH starts on a septet boundary.

use crate::error::{Error, Result};

pub const ESCAPE: u8 = 0x1b;

/// Septet value → code unit, base table.
static ALPHABET: [u16; 128] = [
    0x0040, 0x00a3, 0x0024, 0x00a5, 0x00e8, 0x00e9, 0x00f9, 0x00ec, //
    0x00f2, 0x00c7, 0x000a, 0x00d8, 0x00f8, 0x000d, 0x00c5, 0x00e5, //
    0x0394, 0x005f, 0x03a6, 0x0393, 0x039b, 0x03a9, 0x03a0, 0x03a8, //
    0x03a3, 0x0398, 0x039e, 0x001b, 0x00c6, 0x00e6, 0x00df, 0x00c9, //
    0x0020, 0x0021, 0x0022, 0x0023, 0x00a4, 0x0025, 0x0026, 0x0027, //
    0x0028, 0x0029, 0x002a, 0x002b, 0x002c, 0x002d, 0x002e, 0x002f, //
    0x0030, 0x0031, 0x0032, 0x0033, 0x0034, 0x0035, 0x0036, 0x0037, //
    0x0038, 0x0039, 0x003a, 0x003b, 0x003c, 0x003d, 0x003e, 0x003f, //
    0x00a1, 0x0041, 0x0042, 0x0043, 0x0044, 0x0045, 0x0046, 0x0047, //
    0x0048, 0x0049, 0x004a, 0x004b, 0x004c, 0x004d, 0x004e, 0x004f, //
    0x0050, 0x0051, 0x0052, 0x0053, 0x0054, 0x0055, 0x0056, 0x0057, //
    0x0058, 0x0059, 0x005a, 0x00c4, 0x00d6, 0x00d1, 0x00dc, 0x00a7, //
    0x00bf, 0x0061, 0x0062, 0x0063, 0x0064, 0x0065, 0x0066, 0x0067, //
    0x0068, 0x0069, 0x006a, 0x006b, 0x006c, 0x006d, 0x006e, 0x006f, //
    0x0070, 0x0071, 0x0072, 0x0073, 0x0074, 0x0075, 0x0076, 0x0077, //
    0x0078, 0x0079, 0x007a, 0x00e4, 0x00f6, 0x00f1, 0x00fc, 0x00e0, //
];

/// Escaped septet value → code unit, extension table.
static EXTENSION: [(u8, u16); 10] = [
    (0x0a, 0x000c), // form feed
    (0x14, 0x005e), // ^
    (0x28, 0x007b), // {
    (0x29, 0x007d), // }
    (0x2f, 0x005c), // backslash
    (0x3c, 0x005b), // [
    (0x3d, 0x007e), // ~
    (0x3e, 0x005d), // ]
    (0x40, 0x007c), // |
    (0x65, 0x20ac), // euro sign
];

fn base_septet(unit: u16) -> Option<u8> {
    // 0x1b is the escape itself, never a direct encoding target.
    ALPHABET
        .iter()
        .position(|&c| c == unit)
        .filter(|&i| i != ESCAPE as usize)
        .map(|i| i as u8)
}

fn ext_septet(unit: u16) -> Option<u8> {
    EXTENSION.iter().find(|(_, c)| *c == unit).map(|(s, _)| *s)
}

/// True when every code unit of `units` is representable in GSM-7. Decides
/// the DCS for outbound messages.
pub fn representable(units: &[u16]) -> bool {
    units
        .iter()
        .all(|&u| base_septet(u).is_some() || ext_septet(u).is_some())
}

/// Map code units to septet values, expanding escapes.
pub fn encode(units: &[u16]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(units.len());
    for &u in units {
        if let Some(s) = base_septet(u) {
            out.push(s);
        } else if let Some(s) = ext_septet(u) {
            out.push(ESCAPE);
            out.push(s);
        } else {
            return Err(Error::EncodeGsm7);
        }
    }
    Ok(out)
}

/// Map septet values back to code units, honoring escapes. Unknown escape
/// combinations decode to a space per 23.038.
pub fn decode(septets: &[u8]) -> Result<Vec<u16>> {
    let mut out = Vec::with_capacity(septets.len());
    let mut iter = septets.iter().copied();
    while let Some(s) = iter.next() {
        if s > 0x7f {
            return Err(Error::DecodeGsm7);
        }
        if s == ESCAPE {
            match iter.next() {
                Some(e) => out.push(
                    EXTENSION
                        .iter()
                        .find(|(v, _)| *v == e)
                        .map(|(_, c)| *c)
                        .unwrap_or(0x0020),
                ),
                None => return Err(Error::DecodeGsm7),
            }
        } else {
            out.push(ALPHABET[s as usize]);
        }
    }
    Ok(out)
}

/// Fold septets into octets, LSB first, with `padding` zero fill bits
/// before the first septet.
pub fn pack(septets: &[u8], padding: u8) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity((septets.len() * 7 + padding as usize + 7) / 8);
    let mut acc: u32 = 0;
    let mut bits: u32 = padding as u32;
    for &s in septets {
        if s > 0x7f {
            return Err(Error::PackGsm7);
        }
        acc |= (s as u32) << bits;
        bits += 7;
        while bits >= 8 {
            out.push((acc & 0xff) as u8);
            acc >>= 8;
            bits -= 8;
        }
    }
    if bits > 0 {
        out.push(acc as u8);
    }
    Ok(out)
}

/// Unfold `count` septets from packed octets, skipping `padding` fill bits.
pub fn unpack(data: &[u8], count: usize, padding: u8) -> Result<Vec<u8>> {
    if data.len() * 8 < count * 7 + padding as usize {
        return Err(Error::DecodeGsm7);
    }
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let bitpos = padding as usize + i * 7;
        let byte = bitpos / 8;
        let shift = (bitpos % 8) as u32;
        let mut v = (data[byte] as u16) >> shift;
        if 8 - shift < 7 {
            if let Some(&next) = data.get(byte + 1) {
                v |= (next as u16) << (8 - shift);
            }
        }
        out.push((v & 0x7f) as u8);
    }
    Ok(out)
}

/// Unpack a full packed buffer whose septet count is implied by its octet
/// length, decode it, and strip the CR the sender appended when exactly
/// seven fill bits would otherwise decode as `@`. This is the USSD body
/// shape, where no explicit septet count is carried.
pub fn unpack_decode(data: &[u8], padding: u8) -> Result<String> {
    let count = (data.len() * 8).saturating_sub(padding as usize) / 7;
    let septets = unpack(data, count, padding)?;
    let mut units = decode(&septets)?;
    if (data.len() * 8) % 7 == 0 && units.last() == Some(&0x000d) {
        units.pop();
    }
    crate::pdu::ucs2::ucs2_to_utf8(&units)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_basic_latin() {
        let units: Vec<u16> = "Hello".encode_utf16().collect();
        let septets = encode(&units).unwrap();
        assert_eq!(septets, [0x48, 0x65, 0x6c, 0x6c, 0x6f]);
    }

    #[test]
    fn encode_escape_sequences() {
        let units: Vec<u16> = "{€}".encode_utf16().collect();
        let septets = encode(&units).unwrap();
        assert_eq!(septets, [0x1b, 0x28, 0x1b, 0x65, 0x1b, 0x29]);
        assert_eq!(decode(&septets).unwrap(), units);
    }

    #[test]
    fn unrepresentable_fails() {
        let units: Vec<u16> = "Привет".encode_utf16().collect();
        assert!(!representable(&units));
        assert_eq!(encode(&units), Err(Error::EncodeGsm7));
    }

    #[test]
    fn pack_known_vector() {
        // "hellohello" packs to E8329BFD4697D9EC37 (classic 23.038 example).
        let units: Vec<u16> = "hellohello".encode_utf16().collect();
        let packed = pack(&encode(&units).unwrap(), 0).unwrap();
        assert_eq!(
            packed,
            [0xe8, 0x32, 0x9b, 0xfd, 0x46, 0x97, 0xd9, 0xec, 0x37]
        );
    }

    #[test]
    fn pack_unpack_idempotent() {
        let units: Vec<u16> = "The quick brown fox {jumps} over @ lazy dog"
            .encode_utf16()
            .collect();
        let septets = encode(&units).unwrap();
        for padding in [0u8, 1] {
            let packed = pack(&septets, padding).unwrap();
            let unpacked = unpack(&packed, septets.len(), padding).unwrap();
            assert_eq!(unpacked, septets);
        }
    }

    #[test]
    fn unpack_decode_ussd_body() {
        let units: Vec<u16> = "Balance: 10.00".encode_utf16().collect();
        let packed = pack(&encode(&units).unwrap(), 0).unwrap();
        assert_eq!(unpack_decode(&packed, 0).unwrap(), "Balance: 10.00");
    }

    #[test]
    fn unpack_decode_strips_cr_fill() {
        // 7 septets fill 7 octets exactly plus a CR in the eighth; the
        // trailing CR is padding, not payload.
        let units: Vec<u16> = "1234567".encode_utf16().collect();
        let mut septets = encode(&units).unwrap();
        septets.push(0x0d);
        let packed = pack(&septets, 0).unwrap();
        assert_eq!(packed.len(), 7);
        assert_eq!(unpack_decode(&packed, 0).unwrap(), "1234567");
    }
}
