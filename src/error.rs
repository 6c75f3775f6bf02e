use core::fmt;

use crate::pdu::hexstr::FromHexError;

/// Every failure the crate can report. The set is closed: callers can match
/// exhaustively and host bindings can map each variant to a stable code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    Unknown,
    DeviceDisabled,
    DeviceNotFound,
    DeviceDisconnected,
    InvalidUssd,
    InvalidPhoneNumber,
    ParseUtf8,
    ParseUcs2,
    EncodeGsm7,
    PackGsm7,
    DecodeGsm7,
    Smsdb,
    Queue,
    BuildPdu,
    ParseCmgrLine,
    InvalidTpduLength,
    MalformedHexstr,
    InvalidSca,
    InvalidTpduType,
    ParseTpdu,
    InvalidTimestamp,
    InvalidCharset,
    BuildSca,
    BuildPhoneNumber,
    TooBig,
    CmdFormat,
    AllocFail,
}

impl Error {
    pub fn as_str(&self) -> &'static str {
        match self {
            Error::Unknown => "unknown error",
            Error::DeviceDisabled => "device disabled",
            Error::DeviceNotFound => "device not found",
            Error::DeviceDisconnected => "device disconnected",
            Error::InvalidUssd => "invalid USSD",
            Error::InvalidPhoneNumber => "invalid phone number",
            Error::ParseUtf8 => "error parsing UTF-8",
            Error::ParseUcs2 => "error parsing UCS-2",
            Error::EncodeGsm7 => "error encoding GSM-7",
            Error::PackGsm7 => "error packing GSM-7",
            Error::DecodeGsm7 => "error decoding GSM-7",
            Error::Smsdb => "SMS database error",
            Error::Queue => "error inserting into command queue",
            Error::BuildPdu => "error building PDU",
            Error::ParseCmgrLine => "error parsing CMGR line",
            Error::InvalidTpduLength => "invalid TPDU length",
            Error::MalformedHexstr => "malformed hex string",
            Error::InvalidSca => "invalid SCA",
            Error::InvalidTpduType => "invalid TPDU type",
            Error::ParseTpdu => "error parsing TPDU",
            Error::InvalidTimestamp => "invalid timestamp",
            Error::InvalidCharset => "invalid charset",
            Error::BuildSca => "error building SCA",
            Error::BuildPhoneNumber => "error building phone number",
            Error::TooBig => "message too big",
            Error::CmdFormat => "error formatting command",
            Error::AllocFail => "allocation failure",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for Error {}

impl From<FromHexError> for Error {
    fn from(_: FromHexError) -> Self {
        Error::MalformedHexstr
    }
}

impl From<rusqlite::Error> for Error {
    fn from(_: rusqlite::Error) -> Self {
        Error::Smsdb
    }
}

impl From<std::io::Error> for Error {
    fn from(_: std::io::Error) -> Self {
        Error::DeviceDisconnected
    }
}

pub type Result<T> = core::result::Result<T, Error>;
