//! Field parsers for individual reply lines.
//!
//! URC parsers return `Option` — a malformed notification is logged by the
//! dispatcher and dropped, never fatal. PDU-bearing replies return
//! `Result` with the concrete parse error so the failure reason reaches
//! the caller.

use crate::call::CallState;
use crate::error::{Error, Result};

/// Split on commas outside of double quotes.
fn split_fields(s: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    for (i, c) in s.char_indices() {
        match c {
            '"' => quoted = !quoted,
            ',' if !quoted => {
                out.push(s[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(s[start..].trim());
    out
}

fn strip_quotes(s: &str) -> &str {
    s.trim().trim_start_matches('"').trim_end_matches('"')
}

/// Parameters after the `<PREFIX>:` marker.
fn params_of<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    line.strip_prefix(prefix).map(str::trim_start)
}

fn int_field<T: core::str::FromStr>(s: &str) -> Option<T> {
    strip_quotes(s).parse().ok()
}

/// One `+CLCC:` / `+QIND: "ccinfo"` / `^DSCI:` call entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallInfo {
    pub call_idx: u16,
    pub incoming: bool,
    pub state: CallState,
    /// 0 voice, 1 data, 2 fax.
    pub mode: u32,
    pub multiparty: bool,
    pub number: String,
    pub toa: u32,
}

fn call_state_of(raw: i32) -> Option<CallState> {
    if raw < 0 {
        // Vendors report a released leg as a negative state number.
        return Some(CallState::Released);
    }
    CallState::from_clcc(raw as u8)
}

/// `+CLCC:<id>,<dir>,<stat>,<mode>,<mpty>[,<number>,<type>[,...]]`
pub fn parse_clcc(line: &str) -> Option<CallInfo> {
    let p = params_of(line, "+CLCC:")?;
    let f = split_fields(p);
    if f.len() < 7 {
        return None;
    }
    Some(CallInfo {
        call_idx: int_field(f[0])?,
        incoming: int_field::<u8>(f[1])? == 1,
        state: call_state_of(int_field(f[2])?)?,
        mode: int_field(f[3])?,
        multiparty: int_field::<u8>(f[4])? == 1,
        number: strip_quotes(f[5]).to_string(),
        toa: int_field(f[6])?,
    })
}

/// `^DSCI: <id>,<dir>,<stat>,<type>,<number>,<num_type>[,<tone_info>]`
pub fn parse_dsci(line: &str) -> Option<CallInfo> {
    let p = params_of(line, "^DSCI:")?;
    let f = split_fields(p);
    if f.len() < 6 {
        return None;
    }
    Some(CallInfo {
        call_idx: int_field(f[0])?,
        incoming: int_field::<u8>(f[1])? == 1,
        state: call_state_of(int_field(f[2])?)?,
        mode: int_field(f[3])?,
        multiparty: false,
        number: strip_quotes(f[4]).to_string(),
        toa: int_field(f[5])?,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QindKind {
    None,
    Csq,
    Act,
    CcInfo,
}

/// Split a `+QIND:` notification into its kind and parameter tail.
pub fn parse_qind(line: &str) -> Option<(QindKind, &str)> {
    let p = params_of(line, "+QIND:")?;
    let f = split_fields(p);
    let kind = match strip_quotes(f.first()?) {
        "csq" => QindKind::Csq,
        "act" => QindKind::Act,
        "ccinfo" => QindKind::CcInfo,
        _ => QindKind::None,
    };
    let tail = p.split_once(',').map(|(_, t)| t.trim()).unwrap_or("");
    Some((kind, tail))
}

/// `+QIND: "csq",<RSSI>,<BER>`
pub fn parse_qind_csq(params: &str) -> Option<i32> {
    int_field(split_fields(params).first()?)
}

/// `+QIND: "act","<name>"`
pub fn parse_qind_act(params: &str) -> Option<&str> {
    Some(strip_quotes(split_fields(params).first()?))
}

/// `+QIND: "ccinfo",<idx>,<dir>,<state>,<mode>,<mpty>,<number>,<type>`
pub fn parse_qind_cc(params: &str) -> Option<CallInfo> {
    let f = split_fields(params);
    if f.len() < 7 {
        return None;
    }
    Some(CallInfo {
        call_idx: int_field(f[0])?,
        incoming: int_field::<u8>(f[1])? == 1,
        state: call_state_of(int_field(f[2])?)?,
        mode: int_field(f[3])?,
        multiparty: int_field::<u8>(f[4])? == 1,
        number: strip_quotes(f[5]).to_string(),
        toa: int_field(f[6])?,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RegInfo {
    pub status: i32,
    pub registered: bool,
    pub lac: Option<String>,
    pub ci: Option<String>,
    pub act: Option<i32>,
}

/// `+CREG`/`+CEREG`, both the `<n>,<stat>…` query reply and the
/// `<stat>[,<lac>,<ci>[,<act>]]` URC layouts.
pub fn parse_creg(line: &str) -> Option<RegInfo> {
    let p = line.split_once(':').map(|(_, t)| t.trim_start())?;
    let f = split_fields(p);

    let (stat_at, with_loc) = match f.len() {
        1 => (0, false),
        2 => (1, false),
        3 => (0, true),
        // `<stat>,<lac>,<ci>,<act>` when the second field is quoted,
        // `<n>,<stat>,<lac>,<ci>` otherwise.
        4 if f[1].starts_with('"') => (0, true),
        4 => (1, true),
        _ => (1, true),
    };

    let status: i32 = int_field(f[stat_at])?;
    let mut info = RegInfo {
        status,
        registered: status == 1 || status == 5,
        ..Default::default()
    };
    if with_loc {
        let lac_at = stat_at + 1;
        info.lac = f.get(lac_at).map(|s| strip_quotes(s).to_string());
        info.ci = f.get(lac_at + 1).map(|s| strip_quotes(s).to_string());
        info.act = f.get(lac_at + 2).and_then(|s| int_field(s));
    }
    Some(info)
}

/// `+CSQ: <RSSI>,<BER>`
pub fn parse_csq(line: &str) -> Option<i32> {
    int_field(split_fields(params_of(line, "+CSQ:")?).first()?)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ussd {
    pub kind: u8,
    pub body: String,
    pub dcs: i32,
}

/// `+CUSD: <m>[,<str>,<dcs>]`. The body may contain commas and quotes, so
/// it is bounded by the first and last double quote of the line.
pub fn parse_cusd(line: &str) -> Option<Ussd> {
    let p = params_of(line, "+CUSD:")?;
    let kind: u8 = p
        .split([',', ' '])
        .find(|s| !s.is_empty())?
        .trim_end_matches('\r')
        .parse()
        .ok()?;

    let (body, dcs) = match (p.find('"'), p.rfind('"')) {
        (Some(open), Some(close)) if close > open => {
            let dcs = p[close + 1..]
                .trim_start_matches([',', ' '])
                .trim_end_matches('\r')
                .parse()
                .unwrap_or(-1);
            (p[open + 1..close].to_string(), dcs)
        }
        _ => (String::new(), -1),
    };
    Some(Ussd { kind, body, dcs })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpinState {
    Ready,
    PinRequired,
    PukRequired,
}

/// `+CPIN: <state>`
pub fn parse_cpin(line: &str) -> Option<CpinState> {
    if line.contains("READY") {
        Some(CpinState::Ready)
    } else if line.contains("SIM PIN") {
        Some(CpinState::PinRequired)
    } else if line.contains("SIM PUK") {
        Some(CpinState::PukRequired)
    } else {
        None
    }
}

/// `+CMTI: <mem>,<index>` / `+CDSI: <mem>,<index>`
pub fn parse_msg_index(line: &str) -> Option<u32> {
    let p = line.split_once(':')?.1;
    int_field(split_fields(p).last()?)
}

/// `+CMGS: <mr>[,<scts>]`
pub fn parse_cmgs(line: &str) -> Option<u8> {
    int_field(split_fields(params_of(line, "+CMGS:")?).first()?)
}

/// `+CNUM: <name>,<number>,<type>` (also the `ERROR+CNUM:` firmware form).
pub fn parse_cnum(line: &str) -> Option<String> {
    let p = line.split_once(':')?.1;
    let f = split_fields(p);
    let number = strip_quotes(f.get(1)?);
    if number.is_empty() {
        return None;
    }
    Some(number.to_string())
}

/// Strip the trailing garbage some firmwares append to operator names.
fn trim_tail(s: &str) -> &str {
    s.trim_end_matches(|c: char| (c as u32) < 33 || c == '@' || (c as u32) >= 128)
}

/// `+COPS: <mode>[,<format>,<oper>[,<act>]]`
pub fn parse_cops(line: &str) -> Option<String> {
    let p = params_of(line, "+COPS:")?;
    let f = split_fields(p);
    let name = trim_tail(strip_quotes(f.get(2)?));
    if name.is_empty() {
        return None;
    }
    Some(name.to_string())
}

/// `+CSPN: <spn>,<display mode>`
pub fn parse_cspn(line: &str) -> Option<String> {
    let p = params_of(line, "+CSPN:")?;
    Some(strip_quotes(split_fields(p).first()?).to_string())
}

/// `+QSPN: <FNN>,<SNN>,<SPN>,<alphabet>,<RPLMN>` → SPN.
pub fn parse_qspn(line: &str) -> Option<String> {
    let p = params_of(line, "+QSPN:")?;
    let f = split_fields(p);
    if f.len() < 3 {
        return None;
    }
    Some(strip_quotes(f[2]).to_string())
}

/// Access technology names used by QNWINFO / QIND "act".
pub fn act_to_code(name: &str) -> i32 {
    match name {
        "NONE" | "UNKNOWN" => 0,
        "GSM" => 1,
        "GPRS" => 2,
        "EDGE" | "EGPRS" => 3,
        "WCDMA" => 4,
        "HSDPA" => 5,
        "HSUPA" => 6,
        "HSPA+" | "HSDPA&HSUPA" => 7,
        "TDD LTE" | "FDD LTE" | "LTE" => 8,
        "TDSCDMA" | "TD-SCDMA" => 9,
        "CDMA1X" | "CDMA" => 13,
        "EVDO" => 14,
        "CDMA1X AND HDR" => 15,
        "HDR" => 16,
        "CDMA1X AND EHRPD" | "HDR-EHRPD" => 24,
        _ => -1,
    }
}

/// `+QNWINFO: <Act>,<oper>,<band>,<channel>` or `+QNWINFO: No Service`.
pub fn parse_qnwinfo(line: &str) -> Option<(i32, Option<String>)> {
    let p = params_of(line, "+QNWINFO:")?;
    if p.trim().starts_with("No Service") {
        return Some((-1, None));
    }
    let f = split_fields(p);
    if f.len() < 4 {
        return None;
    }
    let act = act_to_code(strip_quotes(f[0]));
    Some((act, Some(strip_quotes(f[2]).to_string())))
}

/// `+CSCA: "<SCA>",<TOSCA>`
pub fn parse_csca(line: &str) -> Option<String> {
    let p = params_of(line, "+CSCA:")?;
    Some(strip_quotes(split_fields(p).first()?).to_string())
}

/// Unsolicited `+CCWA: <number>,<type>,<class>,…` → class.
pub fn parse_ccwa_urc(line: &str) -> Option<u32> {
    let p = params_of(line, "+CCWA:")?;
    let f = split_fields(p);
    if f.len() < 3 {
        return None;
    }
    int_field(f[2])
}

/// `+CCWA: <status>,<class>` query reply.
pub fn parse_ccwa_status(line: &str) -> Option<(u32, u32)> {
    let p = params_of(line, "+CCWA:")?;
    let f = split_fields(p);
    if f.len() != 2 {
        return None;
    }
    Some((int_field(f[0])?, int_field(f[1])?))
}

/// `VOICE CALL: END: <duration>` — seconds of the ended call.
pub fn parse_cend_duration(line: &str) -> Option<u32> {
    line.rsplit(':').next()?.trim().trim_end_matches('\r').parse().ok()
}

/// A PDU-bearing reply: header line, `\r\n`, hex TPDU.
pub struct PduReply<'a> {
    pub index: Option<u32>,
    pub tpdu_len: usize,
    pub hex: &'a str,
}

fn parse_pdu_reply<'a>(line: &'a str, prefix: &str, with_index: bool) -> Result<PduReply<'a>> {
    let p = line
        .strip_prefix(prefix)
        .ok_or(Error::ParseCmgrLine)?
        .trim_start_matches(' ');
    if p.starts_with('"') {
        // Text-mode replies are not supported; the device is always put in
        // PDU mode during initialization.
        return Err(Error::ParseCmgrLine);
    }
    let (header, pdu) = p.split_once('\n').ok_or(Error::ParseCmgrLine)?;
    let header = header.trim_end_matches('\r');
    let f = split_fields(header);

    let index = if with_index {
        Some(
            f.first()
                .and_then(|s| int_field(s))
                .ok_or(Error::ParseCmgrLine)?,
        )
    } else {
        None
    };

    let tpdu_len: usize = f
        .last()
        .and_then(|s| int_field(s))
        .ok_or(Error::InvalidTpduLength)?;
    if tpdu_len == 0 {
        return Err(Error::InvalidTpduLength);
    }

    Ok(PduReply {
        index,
        tpdu_len,
        hex: pdu.trim_end_matches(['\r', '\n']),
    })
}

/// `+CMGR: <stat>,[<alpha>],<length>\r\n<pdu>`
pub fn parse_cmgr(line: &str) -> Result<PduReply<'_>> {
    parse_pdu_reply(line, "+CMGR:", false)
}

/// `+CMT: [<alpha>],<length>\r\n<pdu>`
pub fn parse_cmt(line: &str) -> Result<PduReply<'_>> {
    parse_pdu_reply(line, "+CMT:", false)
}

/// `+CDS: <length>\r\n<pdu>`
pub fn parse_cds(line: &str) -> Result<PduReply<'_>> {
    parse_pdu_reply(line, "+CDS:", false)
}

/// `+CMGL: <index>,<stat>,[<alpha>],<length>\r\n<pdu>`
pub fn parse_cmgl(line: &str) -> Result<PduReply<'_>> {
    parse_pdu_reply(line, "+CMGL:", true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clcc_quoted_number() {
        let info = parse_clcc("+CLCC: 1,1,4,0,0,\"+79139131234\",145\r").unwrap();
        assert_eq!(info.call_idx, 1);
        assert!(info.incoming);
        assert_eq!(info.state, CallState::Incoming);
        assert_eq!(info.mode, 0);
        assert!(!info.multiparty);
        assert_eq!(info.number, "+79139131234");
        assert_eq!(info.toa, 145);
    }

    #[test]
    fn clcc_empty_number() {
        let info = parse_clcc("+CLCC: 1,1,4,0,0,\"\",145\r").unwrap();
        assert_eq!(info.number, "");
    }

    #[test]
    fn dsci_plain_number() {
        let info = parse_dsci("^DSCI: 2,1,4,0,+48123456789,145\r").unwrap();
        assert_eq!(info.call_idx, 2);
        assert_eq!(info.state, CallState::Incoming);
        assert_eq!(info.number, "+48123456789");
    }

    #[test]
    fn qind_ccinfo_negative_state_is_released() {
        let (kind, params) = parse_qind("+QIND: \"ccinfo\",2,0,-1,0,0,\"123\",129\r").unwrap();
        assert_eq!(kind, QindKind::CcInfo);
        let info = parse_qind_cc(params).unwrap();
        assert_eq!(info.state, CallState::Released);
        assert!(!info.incoming);
    }

    #[test]
    fn qind_csq() {
        let (kind, params) = parse_qind("+QIND: \"csq\",21,99\r").unwrap();
        assert_eq!(kind, QindKind::Csq);
        assert_eq!(parse_qind_csq(params), Some(21));
    }

    #[test]
    fn creg_layouts() {
        let r = parse_creg("+CREG: 2,1,\"D509\",\"80D413D\",7\r").unwrap();
        assert!(r.registered);
        assert_eq!(r.lac.as_deref(), Some("D509"));
        assert_eq!(r.ci.as_deref(), Some("80D413D"));
        assert_eq!(r.act, Some(7));

        let r = parse_creg("+CREG: 0,2\r").unwrap();
        assert!(!r.registered);
        assert_eq!(r.status, 2);
        assert_eq!(r.lac, None);

        let r = parse_creg("+CREG: 5\r").unwrap();
        assert!(r.registered);

        let r = parse_creg("+CEREG: 1,\"D509\",\"80D413D\",7\r").unwrap();
        assert!(r.registered);
        assert_eq!(r.lac.as_deref(), Some("D509"));
    }

    #[test]
    fn csq() {
        assert_eq!(parse_csq("+CSQ: 18,99\r"), Some(18));
        assert_eq!(parse_csq("+CSQ: x\r"), None);
    }

    #[test]
    fn cusd_with_commas_in_body() {
        let u = parse_cusd("+CUSD: 0,\"100,00 EURO, valid till 01.01.2010\",15\r").unwrap();
        assert_eq!(u.kind, 0);
        assert_eq!(u.body, "100,00 EURO, valid till 01.01.2010");
        assert_eq!(u.dcs, 15);
    }

    #[test]
    fn cusd_bare_type() {
        let u = parse_cusd("+CUSD: 5\r").unwrap();
        assert_eq!(u.kind, 5);
        assert_eq!(u.body, "");
        assert_eq!(u.dcs, -1);
    }

    #[test]
    fn cpin_states() {
        assert_eq!(parse_cpin("+CPIN: READY\r"), Some(CpinState::Ready));
        assert_eq!(parse_cpin("+CPIN: SIM PIN\r"), Some(CpinState::PinRequired));
        assert_eq!(parse_cpin("+CPIN: SIM PUK\r"), Some(CpinState::PukRequired));
        assert_eq!(parse_cpin("+CPIN: PH-NET PIN\r"), None);
    }

    #[test]
    fn msg_index() {
        assert_eq!(parse_msg_index("+CMTI: \"SM\",2\r"), Some(2));
        assert_eq!(parse_msg_index("+CMTI: ,2\r"), Some(2));
        assert_eq!(parse_msg_index("+CDSI: \"SM\",14\r"), Some(14));
        assert_eq!(parse_msg_index("+CMTI: \"SM\",-1\r"), None);
    }

    #[test]
    fn cmgs() {
        assert_eq!(parse_cmgs("+CMGS: 7\r"), Some(7));
        assert_eq!(parse_cmgs("+CMGS:7\r"), Some(7));
    }

    #[test]
    fn cnum_variants() {
        assert_eq!(
            parse_cnum("+CNUM: \"Subscriber Number\",\"+79139131234\",145\r").as_deref(),
            Some("+79139131234")
        );
        assert_eq!(parse_cnum("+CNUM: \"Subscriber Number\",\"\",145\r"), None);
        assert_eq!(
            parse_cnum("ERROR+CNUM: \"\",\"123\",129\r").as_deref(),
            Some("123")
        );
    }

    #[test]
    fn cops_trims_garbage() {
        assert_eq!(parse_cops("+COPS: 0,0,\"TELE2\",0\r").as_deref(), Some("TELE2"));
        assert_eq!(parse_cops("+COPS: 0,0,\"Tele2@\"\r").as_deref(), Some("Tele2"));
        assert_eq!(parse_cops("+COPS: 0\r"), None);
    }

    #[test]
    fn qspn() {
        assert_eq!(
            parse_qspn("+QSPN: \"full\",\"short\",\"spn\",0,\"000000\"\r").as_deref(),
            Some("spn")
        );
    }

    #[test]
    fn qnwinfo() {
        let (act, band) = parse_qnwinfo("+QNWINFO: \"FDD LTE\",\"26003\",\"LTE BAND 3\",1300\r").unwrap();
        assert_eq!(act, 8);
        assert_eq!(band.as_deref(), Some("LTE BAND 3"));

        let (act, band) = parse_qnwinfo("+QNWINFO: No Service\r").unwrap();
        assert_eq!(act, -1);
        assert_eq!(band, None);
    }

    #[test]
    fn ccwa_forms() {
        assert_eq!(parse_ccwa_status("+CCWA: 1,1\r"), Some((1, 1)));
        assert_eq!(parse_ccwa_urc("+CCWA: \"+79139131234\",145,1\r"), Some(1));
        assert_eq!(parse_ccwa_urc("+CCWA: 1\r"), None);
    }

    #[test]
    fn cend_duration() {
        assert_eq!(parse_cend_duration("VOICE CALL: END: 35\r"), Some(35));
    }

    #[test]
    fn cmgr_pdu_reply() {
        let r = parse_cmgr("+CMGR: 1,,31\r\n07911234567890F3040B91\r\n").unwrap();
        assert_eq!(r.index, None);
        assert_eq!(r.tpdu_len, 31);
        assert_eq!(r.hex, "07911234567890F3040B91");
    }

    #[test]
    fn cmgr_rejects_text_mode() {
        assert_eq!(
            parse_cmgr("+CMGR: \"REC READ\",\"+123\",,\"21/07/01\"\r\nhello").err(),
            Some(Error::ParseCmgrLine)
        );
    }

    #[test]
    fn cmgl_pdu_reply() {
        let r = parse_cmgl("+CMGL: 4,1,,31\r\n07911234567890F3040B91").unwrap();
        assert_eq!(r.index, Some(4));
        assert_eq!(r.tpdu_len, 31);
    }

    #[test]
    fn cmt_pdu_reply() {
        let r = parse_cmt("+CMT: ,29\r\n0791DEADBEEF").unwrap();
        assert_eq!(r.tpdu_len, 29);
        assert_eq!(r.hex, "0791DEADBEEF");
    }
}
