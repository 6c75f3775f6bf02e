//! Vendor families.
//!
//! Quectel and SIMCom firmware diverge on hangup, operator queries, time
//! queries, call notifications and the second initialization burst. The
//! family is detected at runtime from the voice-mode probe replies
//! (`+QPCMV:` vs `+CPCMREG:`); everything else in the crate stays
//! vendor-agnostic through this narrow surface.

pub mod quectel;
pub mod simcom;

use crate::at::command::{self, CmdKind};
use crate::at::queue::Cmd;
use crate::call::HangupCause;
use crate::config::SharedConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vendor {
    Quectel,
    Simcom,
}

impl Vendor {
    /// Vendor-specific initialization, enqueued after family detection.
    pub fn init_burst(self, cfg: &SharedConfig) -> Vec<Cmd> {
        match self {
            Vendor::Quectel => quectel::init_burst(cfg),
            Vendor::Simcom => simcom::init_burst(cfg),
        }
    }

    /// Hang up one call with the whole-device command. `AT+CHLD=1x` for
    /// multi-call releases is chosen by the caller, not here.
    pub fn hangup(self, cfg: &SharedConfig, cause: HangupCause, call_idx: u16) -> Cmd {
        match self {
            Vendor::Simcom => command::chup(),
            Vendor::Quectel => {
                if cfg.qhup {
                    command::qhup(cause, call_idx)
                } else {
                    command::chup()
                }
            }
        }
    }

    /// Operator-name query issued on registration. Quectel wants the
    /// `+QSPN`/`+QNWINFO` pair in one `AT…;…` line.
    pub fn operator_query(self) -> (Vec<Cmd>, bool) {
        match self {
            Vendor::Quectel => (command::qspn_qnwinfo(), true),
            Vendor::Simcom => (command::cspn_cops(), false),
        }
    }

    /// Network time query used as the keep-alive when configured.
    pub fn time_query(self) -> Cmd {
        match self {
            Vendor::Quectel => command::qlts(),
            Vendor::Simcom => command::cclk(),
        }
    }
}

/// Initialization tail for a modem neither probe answered: just close the
/// burst so the device can be marked ready.
pub fn fallback_burst() -> Vec<Cmd> {
    vec![Cmd::new(CmdKind::AtFinal, &b"AT\r"[..])]
}
