//! 3GPP TS 23.040 TPDU build and parse.
//!
//! Inbound SMS-DELIVER and SMS-STATUS-REPORT TPDUs arrive hex-encoded in
//! CMGR/CMGL/CMT/CDS replies; outbound SMS-SUBMIT TPDUs are built here,
//! split over as many concatenated parts as the body needs. Addresses and
//! timestamps use BCD semi-octets with swapped nibbles.

pub mod gsm7;
pub mod hexstr;
pub mod ucs2;

use heapless::Vec as HVec;

use crate::error::{Error, Result};

pub const TPDU_LENGTH: usize = 176;
pub const PDU_LENGTH: usize = 256;

/// Maximum SCA digit pairs.
const SCA_DIGITS_MAX: usize = 20;

// Message Type Indicator, bits 0-1 of the first TPDU byte.
pub const MTI_DELIVER: u8 = 0x00;
pub const MTI_SUBMIT: u8 = 0x01;
pub const MTI_STATUS_REPORT: u8 = 0x02;

const TP_VPF_RELATIVE: u8 = 0x10;
const TP_SRR: u8 = 0x20;
const TP_UDHI: u8 = 0x40;

pub fn mti(tpdu_type: u8) -> u8 {
    tpdu_type & 0x03
}

/// Concatenation info from the user-data header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Udh {
    pub ref_id: u16,
    pub parts: u8,
    pub order: u8,
}

/// One built SUBMIT part. `buffer` is SCA + TPDU; `tpdu_len` counts the
/// bytes after the SCA, which is what `AT+CMGS=<n>` wants.
#[derive(Debug, Clone)]
pub struct PduPart {
    pub buffer: HVec<u8, PDU_LENGTH>,
    pub tpdu_len: usize,
}

/// Swapped-nibble BCD timestamp with signed quarter-hour zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Scts {
    pub year: u8,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub tz_quarter_hours: i8,
}

impl core::fmt::Display for Scts {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let tz = self.tz_quarter_hours as i32 * 15;
        write!(
            f,
            "20{:02}-{:02}-{:02} {:02}:{:02}:{:02} {}{:02}{:02}",
            self.year,
            self.month,
            self.day,
            self.hour,
            self.minute,
            self.second,
            if tz < 0 { '-' } else { '+' },
            tz.abs() / 60,
            tz.abs() % 60
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmsDeliver {
    pub sca: String,
    pub sender: String,
    pub scts: Scts,
    pub body: String,
    pub udh: Option<Udh>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmsStatusReport {
    pub sca: String,
    pub recipient: String,
    pub mr: u8,
    pub scts: Scts,
    pub discharge: Scts,
    pub status: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tpdu {
    Deliver(SmsDeliver),
    StatusReport(SmsStatusReport),
}

fn bcd(b: u8) -> Result<u8> {
    let lo = b & 0x0f;
    let hi = b >> 4;
    if lo > 9 || hi > 9 {
        return Err(Error::InvalidTimestamp);
    }
    Ok(hi * 10 + lo)
}

/// One swapped-nibble BCD byte: low nibble is the first digit.
fn bcd_swapped(b: u8) -> Result<u8> {
    bcd(b.rotate_left(4))
}

fn parse_scts(data: &[u8]) -> Result<Scts> {
    if data.len() < 7 {
        return Err(Error::InvalidTimestamp);
    }
    let tz_raw = data[6].rotate_left(4);
    // Bit 3 of the zone's first digit carries the sign.
    let negative = tz_raw & 0x80 != 0;
    let tz = bcd(tz_raw & 0x7f)? as i8;
    Ok(Scts {
        year: bcd_swapped(data[0])?,
        month: bcd_swapped(data[1])?,
        day: bcd_swapped(data[2])?,
        hour: bcd_swapped(data[3])?,
        minute: bcd_swapped(data[4])?,
        second: bcd_swapped(data[5])?,
        tz_quarter_hours: if negative { -tz } else { tz },
    })
}

fn digit(nibble: u8) -> char {
    match nibble {
        0..=9 => (b'0' + nibble) as char,
        0x0a => '*',
        0x0b => '#',
        0x0c => 'a',
        0x0d => 'b',
        0x0e => 'c',
        _ => 'F',
    }
}

fn decode_digits(data: &[u8], ndigits: usize, out: &mut String) {
    let mut count = 0;
    for b in data {
        for nibble in [b & 0x0f, b >> 4] {
            if count == ndigits {
                return;
            }
            out.push(digit(nibble));
            count += 1;
        }
    }
}

/// Service centre address: length byte counting TOA + digit bytes.
/// Returns the printable SCA and the number of bytes consumed.
pub fn parse_sca(pdu: &[u8]) -> Result<(String, usize)> {
    let len = *pdu.first().ok_or(Error::InvalidSca)? as usize;
    if len == 0 {
        return Ok((String::new(), 1));
    }
    if len < 2 || len > SCA_DIGITS_MAX / 2 + 1 || pdu.len() < 1 + len {
        return Err(Error::InvalidSca);
    }
    let toa = pdu[1];
    let mut sca = String::new();
    if toa & 0x70 == 0x10 {
        sca.push('+');
    }
    decode_digits(&pdu[2..1 + len], (len - 1) * 2, &mut sca);
    // Odd-length numbers carry an F filler in the last high nibble.
    if sca.ends_with('F') {
        sca.pop();
    }
    Ok((sca, 1 + len))
}

/// Originator/recipient address: length counts digits, not bytes.
fn parse_addr(pdu: &[u8]) -> Result<(String, usize)> {
    let ndigits = *pdu.first().ok_or(Error::ParseTpdu)? as usize;
    let toa = *pdu.get(1).ok_or(Error::ParseTpdu)?;
    let nbytes = (ndigits + 1) / 2;
    if pdu.len() < 2 + nbytes {
        return Err(Error::ParseTpdu);
    }
    let mut addr = String::new();
    if toa & 0x70 == 0x50 {
        // Alphanumeric sender id, GSM-7 packed into the digit field.
        let septets = nbytes * 8 / 7;
        let units = gsm7::decode(&gsm7::unpack(&pdu[2..2 + nbytes], septets, 0)?)?;
        addr = ucs2::ucs2_to_utf8(&units)?;
    } else {
        if toa & 0x70 == 0x10 {
            addr.push('+');
        }
        decode_digits(&pdu[2..2 + nbytes], ndigits, &mut addr);
    }
    Ok((addr, 2 + nbytes))
}

/// Build a destination address field (length, TOA, swapped BCD digits).
pub fn build_addr(number: &str) -> Result<HVec<u8, 24>> {
    let (toa, digits) = match number.strip_prefix('+') {
        Some(rest) => (0x91u8, rest),
        None => (0x81u8, number),
    };
    if digits.is_empty() || digits.len() > SCA_DIGITS_MAX || !digits.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(Error::BuildPhoneNumber);
    }
    let mut out = HVec::new();
    out.push(digits.len() as u8).ok();
    out.push(toa).ok();
    let bytes = digits.as_bytes();
    for pair in bytes.chunks(2) {
        let lo = pair[0] - b'0';
        let hi = if pair.len() > 1 { pair[1] - b'0' } else { 0x0f };
        out.push(hi << 4 | lo).map_err(|_| Error::BuildPhoneNumber)?;
    }
    Ok(out)
}

/// Parse the user-data header, returning concat info and the header's byte
/// length including the UDHL byte itself.
fn parse_udh(ud: &[u8]) -> Result<(Option<Udh>, usize)> {
    let udhl = *ud.first().ok_or(Error::ParseTpdu)? as usize;
    if ud.len() < 1 + udhl {
        return Err(Error::ParseTpdu);
    }
    let mut udh = None;
    let mut rest = &ud[1..1 + udhl];
    while rest.len() >= 2 {
        let iei = rest[0];
        let ielen = rest[1] as usize;
        if rest.len() < 2 + ielen {
            return Err(Error::ParseTpdu);
        }
        let body = &rest[2..2 + ielen];
        match (iei, ielen) {
            (0x00, 3) => {
                udh = Some(Udh {
                    ref_id: body[0] as u16,
                    parts: body[1],
                    order: body[2],
                });
            }
            (0x08, 4) => {
                udh = Some(Udh {
                    ref_id: u16::from_be_bytes([body[0], body[1]]),
                    parts: body[2],
                    order: body[3],
                });
            }
            _ => {}
        }
        rest = &rest[2 + ielen..];
    }
    Ok((udh, 1 + udhl))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Charset {
    Gsm7,
    EightBit,
    Ucs2,
}

fn charset_of(dcs: u8) -> Result<Charset> {
    match dcs {
        0x00..=0x03 => Ok(Charset::Gsm7),
        0x04..=0x07 => Ok(Charset::EightBit),
        0x08..=0x0b => Ok(Charset::Ucs2),
        // Data-coding/message-class group: bit 2 selects 8-bit data.
        0xf0..=0xff => Ok(if dcs & 0x04 != 0 {
            Charset::EightBit
        } else {
            Charset::Gsm7
        }),
        _ => Err(Error::InvalidCharset),
    }
}

fn decode_user_data(ud: &[u8], udl: usize, dcs: u8, has_udh: bool) -> Result<(String, Option<Udh>)> {
    let charset = charset_of(dcs)?;
    let (udh, udh_bytes) = if has_udh {
        parse_udh(ud)?
    } else {
        (None, 0)
    };

    let body = match charset {
        Charset::Gsm7 => {
            // UDL counts septets including the header; fill bits realign
            // the text to a septet boundary.
            let fill = (7 - (udh_bytes * 8) % 7) % 7;
            let skip_septets = (udh_bytes * 8 + fill) / 7;
            let count = udl.checked_sub(skip_septets).ok_or(Error::ParseTpdu)?;
            let septets = gsm7::unpack(&ud[udh_bytes..], count, fill as u8)?;
            ucs2::ucs2_to_utf8(&gsm7::decode(&septets)?)?
        }
        Charset::Ucs2 => {
            let data = ud.get(udh_bytes..udl).ok_or(Error::ParseTpdu)?;
            ucs2::ucs2_bytes_to_utf8(data)?
        }
        Charset::EightBit => {
            let data = ud.get(udh_bytes..udl).ok_or(Error::ParseTpdu)?;
            data.iter().map(|&b| b as char).collect()
        }
    };
    Ok((body, udh))
}

fn parse_deliver(tpdu: &[u8], tpdu_type: u8, sca: String) -> Result<SmsDeliver> {
    let (sender, mut at) = parse_addr(&tpdu[1..]).map(|(a, n)| (a, n + 1))?;
    let _pid = *tpdu.get(at).ok_or(Error::ParseTpdu)?;
    let dcs = *tpdu.get(at + 1).ok_or(Error::ParseTpdu)?;
    at += 2;
    let scts = parse_scts(tpdu.get(at..at + 7).ok_or(Error::ParseTpdu)?)?;
    at += 7;
    let udl = *tpdu.get(at).ok_or(Error::ParseTpdu)? as usize;
    at += 1;
    let ud = tpdu.get(at..).ok_or(Error::ParseTpdu)?;
    let (body, udh) = decode_user_data(ud, udl, dcs, tpdu_type & TP_UDHI != 0)?;
    Ok(SmsDeliver {
        sca,
        sender,
        scts,
        body,
        udh,
    })
}

fn parse_status_report(tpdu: &[u8], sca: String) -> Result<SmsStatusReport> {
    let mr = *tpdu.get(1).ok_or(Error::ParseTpdu)?;
    let (recipient, at) = parse_addr(&tpdu[2..]).map(|(a, n)| (a, n + 2))?;
    let scts = parse_scts(tpdu.get(at..at + 7).ok_or(Error::ParseTpdu)?)?;
    let discharge = parse_scts(tpdu.get(at + 7..at + 14).ok_or(Error::ParseTpdu)?)?;
    let status = *tpdu.get(at + 14).ok_or(Error::ParseTpdu)?;
    Ok(SmsStatusReport {
        sca,
        recipient,
        mr,
        scts,
        discharge,
        status,
    })
}

/// Parse a full hex PDU as received in CMGR/CMGL/CMT/CDS replies.
/// `tpdu_len` is the length announced in the reply header and must not
/// exceed the bytes following the SCA.
pub fn parse_pdu(hex: &[u8], tpdu_len: usize) -> Result<Tpdu> {
    let bytes = hexstr::decode(hex)?;
    let (sca, sca_bytes) = parse_sca(&bytes)?;
    let tpdu = &bytes[sca_bytes..];
    if tpdu_len > tpdu.len() {
        return Err(Error::InvalidTpduLength);
    }
    let tpdu_type = *tpdu.first().ok_or(Error::ParseTpdu)?;
    match mti(tpdu_type) {
        MTI_DELIVER => Ok(Tpdu::Deliver(parse_deliver(tpdu, tpdu_type, sca)?)),
        MTI_STATUS_REPORT => Ok(Tpdu::StatusReport(parse_status_report(tpdu, sca)?)),
        _ => Err(Error::InvalidTpduType),
    }
}

/// Relative validity period per 23.040 §9.2.3.12.
fn validity_code(minutes: u32) -> u8 {
    if minutes <= 720 {
        (minutes / 5).saturating_sub(1) as u8
    } else if minutes <= 24 * 60 {
        (143 + (minutes - 720) / 30) as u8
    } else if minutes <= 30 * 24 * 60 {
        (166 + minutes / (24 * 60)) as u8
    } else {
        (192 + minutes / (7 * 24 * 60)).min(255) as u8
    }
}

/// GSM-7 septet capacity per part.
const GSM7_SINGLE: usize = 160;
const GSM7_MULTI: usize = 153;
/// UCS-2 code-unit capacity per part.
const UCS2_SINGLE: usize = 70;
const UCS2_MULTI: usize = 67;

/// Split `units` into chunks whose GSM-7 encoding fits `limit` septets,
/// never splitting an escape pair.
fn split_gsm7(units: &[u16], limit: usize) -> Result<Vec<Vec<u8>>> {
    let mut parts = Vec::new();
    let mut septets: Vec<u8> = Vec::new();
    for &u in units {
        let enc = gsm7::encode(core::slice::from_ref(&u))?;
        if septets.len() + enc.len() > limit {
            parts.push(core::mem::take(&mut septets));
        }
        septets.extend_from_slice(&enc);
    }
    parts.push(septets);
    Ok(parts)
}

/// Split `units` into UCS-2 chunks of at most `limit` units, keeping
/// surrogate pairs whole.
fn split_ucs2(units: &[u16], limit: usize) -> Vec<Vec<u16>> {
    let mut parts = Vec::new();
    let mut at = 0;
    while at < units.len() {
        let mut end = (at + limit).min(units.len());
        if end < units.len() && (0xd800..=0xdbff).contains(&units[end - 1]) {
            end -= 1;
        }
        parts.push(units[at..end].to_vec());
        at = end;
    }
    if parts.is_empty() {
        parts.push(Vec::new());
    }
    parts
}

struct PartPayload {
    /// Raw user data bytes following the UDH.
    data: Vec<u8>,
    /// UDL value: septets (GSM-7) or octets (UCS-2), including the UDH.
    udl: u8,
    dcs: u8,
}

/// Build the SUBMIT TPDUs for one outbound message. The SCA is left empty
/// so the modem substitutes its configured service centre. Returns one
/// part per concatenated fragment, in send order.
pub fn build_submit_parts(
    dst: &str,
    units: &[u16],
    validity_minutes: u32,
    request_report: bool,
    csms_ref: u8,
) -> Result<Vec<PduPart>> {
    let da = build_addr(dst)?;
    let use_gsm7 = gsm7::representable(units);

    let payloads: Vec<PartPayload> = if use_gsm7 {
        let single = gsm7::encode(units)?.len() <= GSM7_SINGLE;
        let limit = if single { GSM7_SINGLE } else { GSM7_MULTI };
        let multi = !single;
        split_gsm7(units, limit)?
            .into_iter()
            .map(|septets| {
                let fill = if multi { 1 } else { 0 };
                let udh_septets = if multi { 7 } else { 0 };
                let count = septets.len();
                let data = gsm7::pack(&septets, fill)?;
                Ok(PartPayload {
                    data,
                    udl: (udh_septets + count) as u8,
                    dcs: 0x00,
                })
            })
            .collect::<Result<_>>()?
    } else {
        let single = units.len() <= UCS2_SINGLE;
        let limit = if single { UCS2_SINGLE } else { UCS2_MULTI };
        let udh_bytes = if single { 0 } else { 6 };
        split_ucs2(units, limit)
            .into_iter()
            .map(|chunk| {
                let mut data = Vec::with_capacity(chunk.len() * 2);
                for u in &chunk {
                    data.extend_from_slice(&u.to_be_bytes());
                }
                Ok(PartPayload {
                    udl: (udh_bytes + data.len()) as u8,
                    data,
                    dcs: 0x08,
                })
            })
            .collect::<Result<_>>()?
    };

    let nparts = payloads.len();
    if nparts > 255 {
        return Err(Error::TooBig);
    }

    let mut out = Vec::with_capacity(nparts);
    for (i, payload) in payloads.into_iter().enumerate() {
        let mut buffer: HVec<u8, PDU_LENGTH> = HVec::new();
        // Empty SCA.
        buffer.push(0).ok();

        let mut tpdu_type = MTI_SUBMIT | TP_VPF_RELATIVE;
        if request_report {
            tpdu_type |= TP_SRR;
        }
        if nparts > 1 {
            tpdu_type |= TP_UDHI;
        }
        buffer.push(tpdu_type).map_err(|_| Error::BuildPdu)?;
        // Message reference, assigned by the modem.
        buffer.push(0).map_err(|_| Error::BuildPdu)?;
        buffer
            .extend_from_slice(&da)
            .map_err(|_| Error::BuildPdu)?;
        // PID, DCS, VP.
        buffer.push(0).map_err(|_| Error::BuildPdu)?;
        buffer.push(payload.dcs).map_err(|_| Error::BuildPdu)?;
        buffer
            .push(validity_code(validity_minutes))
            .map_err(|_| Error::BuildPdu)?;
        buffer.push(payload.udl).map_err(|_| Error::BuildPdu)?;
        if nparts > 1 {
            buffer
                .extend_from_slice(&[0x05, 0x00, 0x03, csms_ref, nparts as u8, (i + 1) as u8])
                .map_err(|_| Error::BuildPdu)?;
        }
        buffer
            .extend_from_slice(&payload.data)
            .map_err(|_| Error::BuildPdu)?;

        let tpdu_len = buffer.len() - 1;
        if tpdu_len > TPDU_LENGTH {
            return Err(Error::TooBig);
        }
        out.push(PduPart { buffer, tpdu_len });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_sca_international() {
        let bytes = hexstr::decode(b"07911234567890F3").unwrap();
        let (sca, used) = parse_sca(&bytes).unwrap();
        assert_eq!(used, 8);
        assert_eq!(sca, "+21436587093");
    }

    #[test]
    fn parse_empty_sca() {
        assert_eq!(parse_sca(&[0x00, 0x11]).unwrap(), (String::new(), 1));
    }

    #[test]
    fn parse_deliver_ucs2() {
        // +CMGR sample from the wild: UCS-2 "Привет" from +21435576082.
        let hex = b"07911234567890F3040B911234556780F20008012150220040210C041F04400438043204350442";
        let parsed = parse_pdu(hex, 31).unwrap();
        let Tpdu::Deliver(deliver) = parsed else {
            panic!("expected DELIVER");
        };
        assert_eq!(deliver.sender, "+21435576082");
        assert_eq!(deliver.body, "Привет");
        assert_eq!(deliver.udh, None);
        assert_eq!(deliver.scts.year, 10);
        assert_eq!(deliver.scts.month, 12);
        assert_eq!(deliver.scts.day, 5);
        assert_eq!(deliver.scts.hour, 22);
        assert_eq!(deliver.scts.tz_quarter_hours, 12);
    }

    #[test]
    fn announced_length_must_fit() {
        let hex = b"0001000B910000000000F0000000";
        assert_eq!(parse_pdu(hex, 200), Err(Error::InvalidTpduLength));
    }

    #[test]
    fn build_single_part_gsm7() {
        let units: Vec<u16> = "hi".encode_utf16().collect();
        let parts = build_submit_parts("+12025550100", &units, 15, false, 0).unwrap();
        assert_eq!(parts.len(), 1);
        let p = &parts[0];
        // SCA empty, SUBMIT with relative VP, no SRR, no UDH.
        assert_eq!(p.buffer[0], 0x00);
        assert_eq!(p.buffer[1], MTI_SUBMIT | TP_VPF_RELATIVE);
        assert_eq!(p.tpdu_len, p.buffer.len() - 1);
        // DA: 11 digits international.
        assert_eq!(p.buffer[3], 11);
        assert_eq!(p.buffer[4], 0x91);
    }

    #[test]
    fn build_sets_srr_and_udh() {
        let body = "x".repeat(200);
        let units: Vec<u16> = body.encode_utf16().collect();
        let parts = build_submit_parts("+12025550100", &units, 15, true, 42).unwrap();
        assert_eq!(parts.len(), 2);
        for (i, p) in parts.iter().enumerate() {
            let t = p.buffer[1];
            assert_ne!(t & TP_SRR, 0);
            assert_ne!(t & TP_UDHI, 0);
            // SCA(1) type(1) mr(1) da(8) pid(1) dcs(1) vp(1) udl(1), then
            // the concat IE: ref 42, 2 parts, 1-based order.
            assert_eq!(&p.buffer[15..21], &[0x05, 0x00, 0x03, 42, 2, (i + 1) as u8]);
        }
    }

    #[test]
    fn validity_codes() {
        assert_eq!(validity_code(5), 0);
        assert_eq!(validity_code(15), 2);
        assert_eq!(validity_code(720), 143);
        assert_eq!(validity_code(24 * 60), 167);
        assert_eq!(validity_code(3 * 24 * 60), 169);
        assert_eq!(validity_code(5 * 7 * 24 * 60), 197);
    }

    #[test]
    fn addr_validation() {
        assert!(build_addr("+12025550100").is_ok());
        assert!(build_addr("2025550100").is_ok());
        assert!(build_addr("").is_err());
        assert!(build_addr("+1202A550100").is_err());
        assert!(build_addr("+1 202").is_err());
    }

    /// SUBMIT layout reader used to close the build→parse loop in tests.
    fn parse_submit(bytes: &[u8]) -> (String, String, Option<Udh>) {
        let (_, sca_bytes) = parse_sca(bytes).unwrap();
        let tpdu = &bytes[sca_bytes..];
        let tpdu_type = tpdu[0];
        assert_eq!(mti(tpdu_type), MTI_SUBMIT);
        let (dst, at) = parse_addr(&tpdu[2..]).map(|(a, n)| (a, n + 2)).unwrap();
        let dcs = tpdu[at + 1];
        // PID, DCS, VP (relative, one byte).
        let udl = tpdu[at + 3] as usize;
        let ud = &tpdu[at + 4..];
        let (body, udh) = super::decode_user_data(ud, udl, dcs, tpdu_type & TP_UDHI != 0).unwrap();
        (dst, body, udh)
    }

    #[test]
    fn submit_roundtrip_all_part_counts() {
        // One fragment is 153 GSM-7 septets; scale the body to cover 1..=6.
        for parts_wanted in 1..=6usize {
            let body: String = "abcdefghij".repeat(15 * parts_wanted);
            let units: Vec<u16> = body.encode_utf16().collect();
            let parts = build_submit_parts("+4917212345678", &units, 60, false, 7).unwrap();
            assert_eq!(parts.len(), parts_wanted, "body len {}", body.len());

            let mut reassembled = String::new();
            for (i, p) in parts.iter().enumerate() {
                let hex = hexstr::encode(&p.buffer);
                let bytes = hexstr::decode(hex.as_bytes()).unwrap();
                let (dst, text, udh) = parse_submit(&bytes);
                assert_eq!(dst, "+4917212345678");
                if parts_wanted > 1 {
                    let udh = udh.unwrap();
                    assert_eq!(udh.ref_id, 7);
                    assert_eq!(udh.parts as usize, parts_wanted);
                    assert_eq!(udh.order as usize, i + 1);
                } else {
                    assert_eq!(udh, None);
                }
                reassembled.push_str(&text);
            }
            assert_eq!(reassembled, body);
        }
    }

    #[test]
    fn submit_roundtrip_ucs2() {
        let body = "Привет, мир! ".repeat(12);
        let units: Vec<u16> = body.encode_utf16().collect();
        let parts = build_submit_parts("+79139131234", &units, 15, false, 3).unwrap();
        assert!(parts.len() > 1);

        let mut reassembled = String::new();
        for p in &parts {
            let (_, text, udh) = parse_submit(&p.buffer);
            assert!(udh.is_some());
            reassembled.push_str(&text);
        }
        assert_eq!(reassembled, body);
    }

    #[test]
    fn status_report_parse() {
        // SCA +21436587093, SR for mr 7 to +21435576082, status 0.
        let mut pdu = vec![0x07, 0x91, 0x12, 0x34, 0x56, 0x78, 0x90, 0xf3];
        pdu.push(0x06); // STATUS-REPORT
        pdu.push(7); // mr
        pdu.extend_from_slice(&[0x0b, 0x91, 0x12, 0x34, 0x55, 0x67, 0x80, 0xf2]);
        pdu.extend_from_slice(&[0x01, 0x21, 0x50, 0x22, 0x00, 0x40, 0x21]); // scts
        pdu.extend_from_slice(&[0x01, 0x21, 0x50, 0x22, 0x10, 0x40, 0x21]); // discharge
        pdu.push(0x00); // delivered
        let hex = hexstr::encode(&pdu);
        let parsed = parse_pdu(hex.as_bytes(), pdu.len() - 8).unwrap();
        let Tpdu::StatusReport(sr) = parsed else {
            panic!("expected STATUS-REPORT");
        };
        assert_eq!(sr.mr, 7);
        assert_eq!(sr.recipient, "+21435576082");
        assert_eq!(sr.status, 0);
        assert_eq!(sr.discharge.minute, 1);
    }
}
