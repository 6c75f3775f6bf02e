//! Command encoding.
//!
//! Builders here produce the exact payload bytes plus the response token
//! each command waits for. Device methods wrap them with queue insertion;
//! nothing in this module touches device state.

use crate::at::queue::{Cmd, TIMEOUT_LONG, TIMEOUT_SHORT};
use crate::at::response::ResponseKind;
use crate::call::{CallState, HangupCause};
use crate::config::{CallWaiting, MessageStorage, SharedConfig, Tristate};
use crate::error::{Error, Result};
use crate::pdu::{self, hexstr};

pub const CCWA_CLASS_VOICE: u32 = 1;
/// Exclusive upper bound of SMS storage indexes polled at startup.
pub const SMS_INDEX_MAX: u32 = 256;

/// Command codes, used by the dispatcher to give results their meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdKind {
    User,
    At,
    /// Final `AT` closing an initialization burst.
    AtFinal,
    AtA,
    AtD,
    AtE,
    AtZ,
    Cmee,
    CcwaSet,
    CcwaStatus,
    Cfun,
    Cgmi,
    Cgmm,
    Cgmr,
    Cgsn,
    Cimi,
    Chup,
    Qhup,
    Chld1x,
    Chld2x,
    Chld2,
    Chld3,
    Clcc,
    Clir,
    Cmgd,
    Cmgf,
    Cmgr,
    Cmgl,
    Cmgs,
    /// Hex TPDU payload terminated by `0x1A` after the `> ` prompt.
    SmsText,
    Cnma,
    Cnmi,
    Cnum,
    Cops,
    CopsInit,
    Cspn,
    Qspn,
    Cpin,
    Cpms,
    Csms,
    Creg,
    CregInit,
    CeregInit,
    Cscs,
    Csq,
    Cssn,
    Csca,
    Cusd,
    /// `AT+QPCMV?` — answered by Quectel firmware only.
    CvoiceQuectel,
    /// `AT+CPCMREG?` — answered by SIMCom firmware only.
    CvoiceSimcom,
    Dtmf,
    QindcfgCsq,
    QindcfgAct,
    QindcfgRing,
    QindcfgCc,
    QindcfgCcOff,
    Dsci,
    DsciOff,
    Qtonedet,
    Ddet,
    Qlts,
    Cclk,
    Ccid,
    Ciccid,
    Qccid,
    AutocsqInit,
    ExunsolInit,
    CltsInit,
    CnsmodInit,
}

impl CmdKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CmdKind::User => "USER",
            CmdKind::At => "AT",
            CmdKind::AtFinal => "AT",
            CmdKind::AtA => "ATA",
            CmdKind::AtD => "ATD",
            CmdKind::AtE => "ATE",
            CmdKind::AtZ => "ATZ",
            CmdKind::Cmee => "AT+CMEE",
            CmdKind::CcwaSet => "AT+CCWA=",
            CmdKind::CcwaStatus => "AT+CCWA?",
            CmdKind::Cfun => "AT+CFUN",
            CmdKind::Cgmi => "AT+CGMI",
            CmdKind::Cgmm => "AT+CGMM",
            CmdKind::Cgmr => "AT+CGMR",
            CmdKind::Cgsn => "AT+CGSN",
            CmdKind::Cimi => "AT+CIMI",
            CmdKind::Chup => "AT+CHUP",
            CmdKind::Qhup => "AT+QHUP",
            CmdKind::Chld1x => "AT+CHLD=1x",
            CmdKind::Chld2x => "AT+CHLD=2x",
            CmdKind::Chld2 => "AT+CHLD=2",
            CmdKind::Chld3 => "AT+CHLD=3",
            CmdKind::Clcc => "AT+CLCC",
            CmdKind::Clir => "AT+CLIR",
            CmdKind::Cmgd => "AT+CMGD",
            CmdKind::Cmgf => "AT+CMGF",
            CmdKind::Cmgr => "AT+CMGR",
            CmdKind::Cmgl => "AT+CMGL",
            CmdKind::Cmgs => "AT+CMGS",
            CmdKind::SmsText => "SMSTEXT",
            CmdKind::Cnma => "AT+CNMA",
            CmdKind::Cnmi => "AT+CNMI",
            CmdKind::Cnum => "AT+CNUM",
            CmdKind::Cops => "AT+COPS?",
            CmdKind::CopsInit => "AT+COPS=",
            CmdKind::Cspn => "AT+CSPN",
            CmdKind::Qspn => "AT+QSPN",
            CmdKind::Cpin => "AT+CPIN?",
            CmdKind::Cpms => "AT+CPMS",
            CmdKind::Csms => "AT+CSMS",
            CmdKind::Creg => "AT+CREG?",
            CmdKind::CregInit => "AT+CREG=",
            CmdKind::CeregInit => "AT+CEREG=",
            CmdKind::Cscs => "AT+CSCS",
            CmdKind::Csq => "AT+CSQ",
            CmdKind::Cssn => "AT+CSSN",
            CmdKind::Csca => "AT+CSCA",
            CmdKind::Cusd => "AT+CUSD",
            CmdKind::CvoiceQuectel => "AT+QPCMV?",
            CmdKind::CvoiceSimcom => "AT+CPCMREG?",
            CmdKind::Dtmf => "AT+VTS",
            CmdKind::QindcfgCsq => "AT+QINDCFG=\"csq\"",
            CmdKind::QindcfgAct => "AT+QINDCFG=\"act\"",
            CmdKind::QindcfgRing => "AT+QINDCFG=\"ring\"",
            CmdKind::QindcfgCc => "AT+QINDCFG=\"ccinfo\"",
            CmdKind::QindcfgCcOff => "AT+QINDCFG=\"ccinfo\",0",
            CmdKind::Dsci => "AT^DSCI=1",
            CmdKind::DsciOff => "AT^DSCI=0",
            CmdKind::Qtonedet => "AT+QTONEDET",
            CmdKind::Ddet => "AT+DDET",
            CmdKind::Qlts => "AT+QLTS",
            CmdKind::Cclk => "AT+CCLK",
            CmdKind::Ccid => "AT+CCID",
            CmdKind::Ciccid => "AT+CICCID",
            CmdKind::Qccid => "AT+QCCID",
            CmdKind::AutocsqInit => "AT+AUTOCSQ=",
            CmdKind::ExunsolInit => "AT+EXUNSOL=",
            CmdKind::CltsInit => "AT+CLTS=",
            CmdKind::CnsmodInit => "AT+CNSMOD=",
        }
    }
}

impl core::fmt::Display for CmdKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Leading `+` optional, digits only thereafter.
pub fn valid_phone_number(number: &str) -> bool {
    let digits = number.strip_prefix('+').unwrap_or(number);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Digits plus `*` and `#`.
pub fn valid_ussd(code: &str) -> bool {
    !code.is_empty()
        && code
            .bytes()
            .all(|b| b.is_ascii_digit() || b == b'*' || b == b'#')
}

pub fn ping() -> Cmd {
    Cmd::new(CmdKind::At, &b"AT\r"[..]).timeout(TIMEOUT_SHORT)
}

/// Common initialization burst, identical for both vendor families. The
/// vendor-specific tail is enqueued after family detection.
pub fn init_burst(cfg: &SharedConfig) -> Vec<Cmd> {
    let mut cmds = vec![Cmd::new(CmdKind::At, &b"AT\r"[..])];
    if cfg.reset_modem {
        cmds.push(Cmd::new(CmdKind::AtZ, &b"ATZ\r"[..]));
    }
    cmds.push(Cmd::new(CmdKind::AtE, &b"ATE0\r"[..]));
    cmds.push(Cmd::new(CmdKind::Cscs, &b"AT+CSCS=\"UCS2\"\r"[..]));

    cmds.push(Cmd::new(CmdKind::Cgmi, &b"AT+CGMI\r"[..]));
    cmds.push(Cmd::new(CmdKind::Cgmm, &b"AT+CGMM\r"[..]));
    cmds.push(Cmd::new(CmdKind::Cgmr, &b"AT+CGMR\r"[..]));
    cmds.push(Cmd::new(CmdKind::Cmee, &b"AT+CMEE=0\r"[..]));
    cmds.push(Cmd::new(CmdKind::Cgsn, &b"AT+CGSN\r"[..]));
    cmds.push(Cmd::new(CmdKind::Cimi, &b"AT+CIMI\r"[..]));
    cmds.push(Cmd::new(CmdKind::Cpin, &b"AT+CPIN?\r"[..]));
    cmds.push(Cmd::new(CmdKind::CopsInit, &b"AT+COPS=3,0\r"[..]));

    cmds.push(Cmd::new(CmdKind::CregInit, &b"AT+CREG=2\r"[..]).ignore());
    cmds.push(Cmd::new(CmdKind::Creg, &b"AT+CREG?\r"[..]));

    cmds.push(Cmd::new(CmdKind::Cnum, &b"AT+CNUM\r"[..]).ignore());
    cmds.push(Cmd::new(CmdKind::Csca, &b"AT+CSCA?\r"[..]));
    cmds.push(Cmd::new(CmdKind::Cssn, &b"AT+CSSN=1,1\r"[..]));
    cmds.push(Cmd::new(CmdKind::Cmgf, &b"AT+CMGF=0\r"[..]));

    match cfg.msg_direct {
        Tristate::On => cmds.push(Cmd::new(
            CmdKind::Cnmi,
            format!("AT+CNMI=2,2,2,0,{}\r", cfg.reset_modem as u8),
        )),
        Tristate::Off => cmds.push(Cmd::new(
            CmdKind::Cnmi,
            format!("AT+CNMI=2,1,0,2,{}\r", cfg.reset_modem as u8),
        )),
        Tristate::None => {}
    }

    if cfg.msg_storage != MessageStorage::Auto {
        let stor = cfg.msg_storage.as_str();
        cmds.push(Cmd::new(
            CmdKind::Cpms,
            format!("AT+CPMS=\"{stor}\",\"{stor}\",\"{stor}\"\r"),
        ));
    }

    if cfg.msg_service >= 0 {
        cmds.push(Cmd::new(
            CmdKind::Csms,
            format!("AT+CSMS={}\r", cfg.msg_service),
        ));
    }

    // Family detection: only the matching firmware answers its probe.
    cmds.push(Cmd::new(CmdKind::CvoiceQuectel, &b"AT+QPCMV?\r"[..]).ignore().suppress_error());
    cmds.push(Cmd::new(CmdKind::CvoiceSimcom, &b"AT+CPCMREG?\r"[..]).ignore().suppress_error());
    cmds
}

/// `ATD<number>;` with optional CLIR preamble; the caller prepends
/// `AT+CHLD=2` when other calls must be put on hold first.
pub fn dial(number: &str, clir: Option<i32>, hold_other: bool) -> Result<Vec<Cmd>> {
    if !valid_phone_number(number) {
        return Err(Error::InvalidPhoneNumber);
    }
    let mut cmds = Vec::with_capacity(3);
    if hold_other {
        cmds.push(Cmd::new(CmdKind::Chld2, &b"AT+CHLD=2\r"[..]));
    }
    if let Some(clir) = clir {
        cmds.push(Cmd::new(CmdKind::Clir, format!("AT+CLIR={clir}\r")).ignore());
    }
    cmds.push(Cmd::new(CmdKind::AtD, format!("ATD{number};\r")).ignore());
    Ok(cmds)
}

/// `ATA` for an incoming call, `AT+CHLD=2<idx>` for a waiting one.
pub fn answer(state: CallState, call_idx: u16) -> Result<Cmd> {
    match state {
        CallState::Incoming => Ok(Cmd::new(CmdKind::AtA, &b"ATA\r"[..])),
        CallState::Waiting => Ok(Cmd::new(
            CmdKind::Chld2x,
            format!("AT+CHLD=2{call_idx}\r"),
        )),
        _ => Err(Error::Unknown),
    }
}

/// Put active calls on hold and activate call `idx`.
pub fn activate(call_idx: u16) -> Cmd {
    Cmd::new(CmdKind::Chld2x, format!("AT+CHLD=2{call_idx}\r"))
}

pub fn flip_hold() -> Cmd {
    Cmd::new(CmdKind::Chld2, &b"AT+CHLD=2\r"[..])
}

pub fn conference() -> Cmd {
    Cmd::new(CmdKind::Chld3, &b"AT+CHLD=3\r"[..])
}

pub fn chup() -> Cmd {
    Cmd::new(CmdKind::Chup, &b"AT+CHUP\r"[..]).timeout(TIMEOUT_LONG)
}

pub fn qhup(cause: HangupCause, call_idx: u16) -> Cmd {
    Cmd::new(
        CmdKind::Qhup,
        format!("AT+QHUP={},{}\r", cause as i32, call_idx),
    )
    .timeout(TIMEOUT_LONG)
}

/// Release one call of several without touching the others.
pub fn chld_release(call_idx: u16) -> Cmd {
    Cmd::new(CmdKind::Chld1x, format!("AT+CHLD=1{call_idx}\r")).timeout(TIMEOUT_LONG)
}

/// The `AT+CMGS=<len>` / hex-payload pair for one SUBMIT part.
pub fn sms_part(part: &pdu::PduPart) -> Vec<Cmd> {
    let mut payload = hexstr::encode(&part.buffer).into_bytes();
    payload.push(0x1a);
    vec![
        Cmd::new(CmdKind::Cmgs, format!("AT+CMGS={}\r", part.tpdu_len))
            .expect(ResponseKind::SmsPrompt),
        Cmd::new(CmdKind::SmsText, payload).timeout(TIMEOUT_LONG),
    ]
}

/// `AT+CUSD=1,"<gsm7-packed-hex>",15`. 15 selects the GSM 7-bit default
/// alphabet with unspecified language (23.038).
pub fn ussd(code: &str) -> Result<Cmd> {
    if !valid_ussd(code) {
        return Err(Error::InvalidUssd);
    }
    let units: Vec<u16> = code.encode_utf16().collect();
    let septets = crate::pdu::gsm7::encode(&units).map_err(|_| Error::EncodeGsm7)?;
    let packed = crate::pdu::gsm7::pack(&septets, 0).map_err(|_| Error::PackGsm7)?;
    Ok(Cmd::new(
        CmdKind::Cusd,
        format!("AT+CUSD=1,\"{}\",15\r", hexstr::encode(&packed)),
    ))
}

pub fn retrieve_sms(index: u32) -> Cmd {
    Cmd::new(CmdKind::Cmgr, format!("AT+CMGR={index}\r")).expect(ResponseKind::Cmgr)
}

pub fn retrieve_sms_quiet(index: u32) -> Cmd {
    retrieve_sms(index).suppress_error()
}

pub fn delete_sms(index: u32, delflag: Option<u32>) -> Cmd {
    match delflag {
        Some(flag) => Cmd::new(CmdKind::Cmgd, format!("AT+CMGD={index},{flag}\r")).ignore(),
        None => Cmd::new(CmdKind::Cmgd, format!("AT+CMGD={index}\r")).ignore(),
    }
}

/// `AT+CNMA` / `AT+CNMA=<n>` new-message acknowledgement.
pub fn msg_ack(n: Option<u32>) -> Cmd {
    match n {
        Some(n) => Cmd::new(CmdKind::Cnma, format!("AT+CNMA={n}\r")).ignore(),
        None => Cmd::new(CmdKind::Cnma, &b"AT+CNMA\r"[..]).ignore(),
    }
}

/// Message status filter of `AT+CMGL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgStatus {
    RecUnread = 0,
    RecRead = 1,
    StoUnsent = 2,
    StoSent = 3,
    All = 4,
}

pub fn list_messages(stat: MsgStatus) -> Cmd {
    Cmd::new(CmdKind::Cmgl, format!("AT+CMGL={}\r", stat as i32)).timeout(TIMEOUT_LONG)
}

/// `AT+CCWA=…` setting plus the voice-class status query. With `Auto` only
/// the query is issued.
pub fn ccwa(call_waiting: CallWaiting) -> Vec<Cmd> {
    let mut cmds = Vec::with_capacity(2);
    match call_waiting {
        CallWaiting::Disallowed | CallWaiting::Allowed => {
            let en = (call_waiting == CallWaiting::Allowed) as u8;
            cmds.push(
                Cmd::new(
                    CmdKind::CcwaSet,
                    format!("AT+CCWA={en},{en},{CCWA_CLASS_VOICE}\r"),
                )
                .ignore(),
            );
        }
        CallWaiting::Auto => {}
    }
    cmds.push(Cmd::new(CmdKind::CcwaStatus, &b"AT+CCWA=1,2,1\r"[..]).ignore());
    cmds
}

pub fn reset() -> Cmd {
    Cmd::new(CmdKind::Cfun, &b"AT+CFUN=1,1\r"[..])
}

pub fn clcc() -> Cmd {
    Cmd::new(CmdKind::Clcc, &b"AT+CLCC\r"[..])
}

pub fn dtmf(digit: char) -> Result<Cmd> {
    let digit = match digit {
        'a'..='d' => digit.to_ascii_uppercase(),
        '0'..='9' | 'A'..='D' | '*' | '#' => digit,
        _ => return Err(Error::CmdFormat),
    };
    Ok(Cmd::new(CmdKind::Dtmf, format!("AT+VTS=\"{digit}\"\r")))
}

/// Arbitrary user command; any reply is accepted.
pub fn user_cmd(input: &str) -> Cmd {
    Cmd::new(CmdKind::User, format!("{input}\r")).ignore()
}

/// Vendor time query used as the keep-alive when `query_time` is set.
pub fn qlts() -> Cmd {
    Cmd::new(CmdKind::Qlts, &b"AT+QLTS=1\r"[..]).timeout(TIMEOUT_SHORT)
}

pub fn cclk() -> Cmd {
    Cmd::new(CmdKind::Cclk, &b"AT+CCLK?\r"[..]).timeout(TIMEOUT_SHORT)
}

/// Naked sub-commands for the Quectel at-once operator query.
pub fn qspn_qnwinfo() -> Vec<Cmd> {
    vec![
        Cmd::new(CmdKind::Qspn, &b"+QSPN"[..]).ignore(),
        Cmd::new(CmdKind::At, &b"+QNWINFO"[..]).ignore(),
    ]
}

/// SIMCom operator queries, plain commands.
pub fn cspn_cops() -> Vec<Cmd> {
    vec![
        Cmd::new(CmdKind::Cspn, &b"AT+CSPN?\r"[..]).ignore(),
        Cmd::new(CmdKind::Cops, &b"AT+COPS?\r"[..]).ignore(),
    ]
}

/// Naked immediate hangup sub-command used during teardown.
pub fn hangup_immediate(simcom: bool, cause: HangupCause, call_idx: u16) -> Cmd {
    if simcom {
        Cmd::new(CmdKind::Chup, &b"+CHUP"[..])
    } else {
        Cmd::new(CmdKind::Qhup, format!("+QHUP={},{}", cause as i32, call_idx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_validation() {
        assert!(valid_phone_number("+12025550100"));
        assert!(valid_phone_number("100"));
        assert!(!valid_phone_number("+"));
        assert!(!valid_phone_number(""));
        assert!(!valid_phone_number("+1-202"));
        assert!(!valid_phone_number("12a3"));
    }

    #[test]
    fn ussd_validation() {
        assert!(valid_ussd("*100#"));
        assert!(valid_ussd("#31#"));
        assert!(!valid_ussd("*10 0#"));
        assert!(!valid_ussd(""));
    }

    #[test]
    fn dial_encoding() {
        let cmds = dial("+12025550100", None, false).unwrap();
        assert_eq!(cmds.len(), 1);
        assert_eq!(cmds[0].payload.as_deref(), Some(&b"ATD+12025550100;\r"[..]));

        let cmds = dial("100", Some(1), true).unwrap();
        assert_eq!(cmds.len(), 3);
        assert_eq!(cmds[0].payload.as_deref(), Some(&b"AT+CHLD=2\r"[..]));
        assert_eq!(cmds[1].payload.as_deref(), Some(&b"AT+CLIR=1\r"[..]));
        assert_eq!(cmds[2].payload.as_deref(), Some(&b"ATD100;\r"[..]));

        assert_eq!(dial("12a", None, false).err(), Some(Error::InvalidPhoneNumber));
    }

    #[test]
    fn answer_states() {
        let c = answer(CallState::Incoming, 1).unwrap();
        assert_eq!(c.payload.as_deref(), Some(&b"ATA\r"[..]));
        let c = answer(CallState::Waiting, 2).unwrap();
        assert_eq!(c.payload.as_deref(), Some(&b"AT+CHLD=22\r"[..]));
        assert!(answer(CallState::Active, 1).is_err());
    }

    #[test]
    fn sms_part_pair() {
        let units: Vec<u16> = "hi".encode_utf16().collect();
        let parts = pdu::build_submit_parts("+12025550100", &units, 15, false, 0).unwrap();
        let cmds = sms_part(&parts[0]);
        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[0].expect, ResponseKind::SmsPrompt);
        let head = String::from_utf8(cmds[0].payload.clone().unwrap()).unwrap();
        assert_eq!(head, format!("AT+CMGS={}\r", parts[0].tpdu_len));
        let payload = cmds[1].payload.as_deref().unwrap();
        assert_eq!(*payload.last().unwrap(), 0x1a);
        // Everything before the terminator is the hex PDU.
        assert_eq!(payload.len(), parts[0].buffer.len() * 2 + 1);
    }

    #[test]
    fn ussd_packs_gsm7() {
        let cmd = ussd("*100#").unwrap();
        let text = String::from_utf8(cmd.payload.clone().unwrap()).unwrap();
        assert!(text.starts_with("AT+CUSD=1,\""));
        assert!(text.ends_with("\",15\r"));
        assert_eq!(ussd("hello").err(), Some(Error::InvalidUssd));
    }

    #[test]
    fn ccwa_modes() {
        let cmds = ccwa(CallWaiting::Allowed);
        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[0].payload.as_deref(), Some(&b"AT+CCWA=1,1,1\r"[..]));
        let cmds = ccwa(CallWaiting::Disallowed);
        assert_eq!(cmds[0].payload.as_deref(), Some(&b"AT+CCWA=0,0,1\r"[..]));
        let cmds = ccwa(CallWaiting::Auto);
        assert_eq!(cmds.len(), 1);
        assert_eq!(cmds[0].payload.as_deref(), Some(&b"AT+CCWA=1,2,1\r"[..]));
    }

    #[test]
    fn sms_maintenance_commands() {
        assert_eq!(
            retrieve_sms(3).payload.as_deref(),
            Some(&b"AT+CMGR=3\r"[..])
        );
        assert_eq!(
            delete_sms(3, None).payload.as_deref(),
            Some(&b"AT+CMGD=3\r"[..])
        );
        assert_eq!(
            delete_sms(0, Some(4)).payload.as_deref(),
            Some(&b"AT+CMGD=0,4\r"[..])
        );
        assert_eq!(
            list_messages(MsgStatus::All).payload.as_deref(),
            Some(&b"AT+CMGL=4\r"[..])
        );
        assert_eq!(msg_ack(None).payload.as_deref(), Some(&b"AT+CNMA\r"[..]));
        assert_eq!(msg_ack(Some(2)).payload.as_deref(), Some(&b"AT+CNMA=2\r"[..]));
    }

    #[test]
    fn dtmf_digits() {
        assert_eq!(
            dtmf('a').unwrap().payload.as_deref(),
            Some(&b"AT+VTS=\"A\"\r"[..])
        );
        assert_eq!(
            dtmf('#').unwrap().payload.as_deref(),
            Some(&b"AT+VTS=\"#\"\r"[..])
        );
        assert!(dtmf('!').is_err());
    }

    #[test]
    fn init_burst_respects_config() {
        let mut cfg = SharedConfig::default();
        cfg.msg_direct = Tristate::Off;
        cfg.msg_storage = MessageStorage::Me;
        cfg.msg_service = 1;
        let cmds = init_burst(&cfg);
        let texts: Vec<String> = cmds
            .iter()
            .map(|c| String::from_utf8_lossy(c.payload.as_deref().unwrap()).into_owned())
            .collect();
        assert!(texts.contains(&"ATZ\r".to_string()));
        assert!(texts.contains(&"AT+CNMI=2,1,0,2,1\r".to_string()));
        assert!(texts.contains(&"AT+CPMS=\"ME\",\"ME\",\"ME\"\r".to_string()));
        assert!(texts.contains(&"AT+CSMS=1\r".to_string()));
        // Family probes close the burst.
        assert_eq!(cmds[cmds.len() - 2].kind, CmdKind::CvoiceQuectel);
        assert_eq!(cmds[cmds.len() - 1].kind, CmdKind::CvoiceSimcom);

        cfg.reset_modem = false;
        cfg.msg_direct = Tristate::None;
        cfg.msg_storage = MessageStorage::Auto;
        cfg.msg_service = -1;
        let cmds = init_burst(&cfg);
        let texts: Vec<&[u8]> = cmds.iter().map(|c| c.payload.as_deref().unwrap()).collect();
        assert!(!texts.contains(&&b"ATZ\r"[..]));
        assert!(!texts.iter().any(|t| t.starts_with(b"AT+CNMI")));
        assert!(!texts.iter().any(|t| t.starts_with(b"AT+CPMS")));
    }
}
