//! Reply classification.
//!
//! Every extracted reply line is tagged with a [`ResponseKind`] by scanning
//! an ordered literal-prefix table. Full-line results carry their trailing
//! `\r` in the id so that `OK\r` does not fire on `OK` embedded in longer
//! replies; prefix results end at `:`. First match wins, so ids that share
//! a stem are ordered longest first.

/// Result kind of one modem reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    ParseError,
    Unknown,
    /// Synthetic result injected when a written command's deadline passes.
    Timeout,

    Boot,
    Busy,
    Cops,

    Cmgr,
    Cmgl,
    CmsError,
    Cmti,
    Cmt,
    Cdsi,
    Cds,
    Cbm,

    Cnum,

    Dsci,
    Cend,
    Cpin,

    Creg,
    Cereg,
    Csq,
    Cssi,
    Cssu,

    Cusd,
    Error,

    Qind,
    NoCarrier,
    NoDialtone,
    NoAnswer,
    Ok,
    Conf,
    Ring,

    SmMemFull,
    SmsPrompt,
    Srvst,

    Cvoice,
    Csms,
    Cmgs,
    Cpms,
    Csca,

    Clcc,
    Rcend,
    Ccwa,
    Qspn,
    Qnwinfo,
    Qpcmv,
    Cpcmreg,
    Qlts,
    Cclk,
}

/// Ordered id table. `ERROR+CNUM:` and `COMMAND NOT SUPPORT\r` are firmware
/// quirks classified onto existing kinds.
static RESPONSES: &[(&[u8], ResponseKind)] = &[
    (b"^BOOT:", ResponseKind::Boot),
    (b"BUSY\r", ResponseKind::Busy),
    (b"+COPS:", ResponseKind::Cops),
    (b"+CMGR:", ResponseKind::Cmgr),
    (b"+CMGL:", ResponseKind::Cmgl),
    (b"+CMS ERROR:", ResponseKind::CmsError),
    (b"+CMTI:", ResponseKind::Cmti),
    (b"+CMT:", ResponseKind::Cmt),
    (b"+CDSI:", ResponseKind::Cdsi),
    (b"+CDS:", ResponseKind::Cds),
    (b"+CBM:", ResponseKind::Cbm),
    (b"ERROR+CNUM:", ResponseKind::Cnum),
    (b"+CNUM:", ResponseKind::Cnum),
    (b"^DSCI:", ResponseKind::Dsci),
    (b"VOICE CALL:", ResponseKind::Cend),
    (b"+CPIN:", ResponseKind::Cpin),
    (b"+CEREG:", ResponseKind::Cereg),
    (b"+CREG:", ResponseKind::Creg),
    (b"+CSQ:", ResponseKind::Csq),
    (b"+CSSI:", ResponseKind::Cssi),
    (b"+CSSU:", ResponseKind::Cssu),
    (b"+CUSD:", ResponseKind::Cusd),
    (b"COMMAND NOT SUPPORT\r", ResponseKind::Error),
    (b"ERROR\r", ResponseKind::Error),
    (b"+QIND:", ResponseKind::Qind),
    (b"NO CARRIER\r", ResponseKind::NoCarrier),
    (b"NO DIALTONE\r", ResponseKind::NoDialtone),
    (b"NO ANSWER\r", ResponseKind::NoAnswer),
    (b"OK\r", ResponseKind::Ok),
    (b"MISSED_CALL:", ResponseKind::Conf),
    (b"RING\r", ResponseKind::Ring),
    (b"^SMMEMFULL:", ResponseKind::SmMemFull),
    (b"> ", ResponseKind::SmsPrompt),
    (b"^SRVST:", ResponseKind::Srvst),
    (b"^CVOICE:", ResponseKind::Cvoice),
    (b"+CSMS:", ResponseKind::Csms),
    (b"+CMGS:", ResponseKind::Cmgs),
    (b"+CPMS:", ResponseKind::Cpms),
    (b"+CSCA:", ResponseKind::Csca),
    (b"+CLCC:", ResponseKind::Clcc),
    (b"REMOTE CALL END", ResponseKind::Rcend),
    (b"+CCWA:", ResponseKind::Ccwa),
    (b"+QSPN:", ResponseKind::Qspn),
    (b"+QNWINFO:", ResponseKind::Qnwinfo),
    (b"+QPCMV:", ResponseKind::Qpcmv),
    (b"+CPCMREG:", ResponseKind::Cpcmreg),
    (b"+QLTS:", ResponseKind::Qlts),
    (b"+CCLK:", ResponseKind::Cclk),
];

impl ResponseKind {
    /// Classify an extracted reply. Unmatched lines are `Unknown`; the
    /// dispatcher may still consume them under the in-flight command's
    /// context (identity reads).
    pub fn classify(line: &[u8]) -> ResponseKind {
        for (id, kind) in RESPONSES {
            if line.len() >= id.len() && &line[..id.len()] == *id {
                return *kind;
            }
        }
        ResponseKind::Unknown
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseKind::ParseError => "PARSE ERROR",
            ResponseKind::Unknown => "UNK",
            ResponseKind::Timeout => "TIMEOUT",
            ResponseKind::Boot => "^BOOT",
            ResponseKind::Busy => "BUSY",
            ResponseKind::Cops => "+COPS",
            ResponseKind::Cmgr => "+CMGR",
            ResponseKind::Cmgl => "+CMGL",
            ResponseKind::CmsError => "+CMS ERROR",
            ResponseKind::Cmti => "+CMTI",
            ResponseKind::Cmt => "+CMT",
            ResponseKind::Cdsi => "+CDSI",
            ResponseKind::Cds => "+CDS",
            ResponseKind::Cbm => "+CBM",
            ResponseKind::Cnum => "+CNUM",
            ResponseKind::Dsci => "^DSCI",
            ResponseKind::Cend => "^CEND",
            ResponseKind::Cpin => "+CPIN",
            ResponseKind::Creg => "+CREG",
            ResponseKind::Cereg => "+CEREG",
            ResponseKind::Csq => "+CSQ",
            ResponseKind::Cssi => "+CSSI",
            ResponseKind::Cssu => "+CSSU",
            ResponseKind::Cusd => "+CUSD",
            ResponseKind::Error => "ERROR",
            ResponseKind::Qind => "+QIND",
            ResponseKind::NoCarrier => "NO CARRIER",
            ResponseKind::NoDialtone => "NO DIALTONE",
            ResponseKind::NoAnswer => "NO ANSWER",
            ResponseKind::Ok => "OK",
            ResponseKind::Conf => "^CONF",
            ResponseKind::Ring => "RING",
            ResponseKind::SmMemFull => "^SMMEMFULL",
            ResponseKind::SmsPrompt => "> ",
            ResponseKind::Srvst => "^SRVST",
            ResponseKind::Cvoice => "^CVOICE",
            ResponseKind::Csms => "+CSMS",
            ResponseKind::Cmgs => "+CMGS",
            ResponseKind::Cpms => "+CPMS",
            ResponseKind::Csca => "+CSCA",
            ResponseKind::Clcc => "+CLCC",
            ResponseKind::Rcend => "CALLEND",
            ResponseKind::Ccwa => "+CCWA",
            ResponseKind::Qspn => "+QSPN",
            ResponseKind::Qnwinfo => "+QNWINFO",
            ResponseKind::Qpcmv => "+QPCMV",
            ResponseKind::Cpcmreg => "+CPCMREG",
            ResponseKind::Qlts => "+QLTS",
            ResponseKind::Cclk => "+CCLK",
        }
    }
}

impl core::fmt::Display for ResponseKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
