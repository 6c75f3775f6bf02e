//! Per-call records and the call state machine.
//!
//! States 0..=5 are the wire numbering used by `+CLCC` and the vendor call
//! notifications; `Released` and `Init` are local pseudo-states appended
//! after them so per-state counters can live in one flat array.

use core::fmt;

pub const MAX_CALL_IDX: u16 = 31;

/// Index of the per-device pseudo-call owning commands not tied to a real
/// call leg (initialization, polling, USSD).
pub const SYS_CHAN: CallId = CallId(0);

/// Stable handle of a call record within one device. `SYS_CHAN` is
/// reserved; real calls get ids from 1 upward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Active = 0,
    OnHold = 1,
    Dialing = 2,
    Alerting = 3,
    Incoming = 4,
    Waiting = 5,
    Released = 6,
    Init = 7,
}

pub const CALL_STATES: usize = 8;

impl CallState {
    pub fn from_clcc(v: u8) -> Option<CallState> {
        Some(match v {
            0 => CallState::Active,
            1 => CallState::OnHold,
            2 => CallState::Dialing,
            3 => CallState::Alerting,
            4 => CallState::Incoming,
            5 => CallState::Waiting,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallState::Active => "active",
            CallState::OnHold => "held",
            CallState::Dialing => "dialing",
            CallState::Alerting => "alerting",
            CallState::Incoming => "incoming",
            CallState::Waiting => "waiting",
            CallState::Released => "released",
            CallState::Init => "initialize",
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallDir {
    Outgoing,
    Incoming,
}

/// Tiny local stand-in for the usual bitflags macro so the flag set reads
/// like the declaration it mirrors.
macro_rules! bitflags_like {
    (
        $(#[$meta:meta])*
        pub struct $name:ident: $ty:ty {
            $(const $flag:ident = $val:expr;)*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name(pub $ty);

        #[allow(dead_code)]
        impl $name {
            $(pub const $flag: $name = $name($val);)*

            pub fn contains(&self, other: $name) -> bool {
                self.0 & other.0 == other.0
            }

            pub fn set(&mut self, other: $name) {
                self.0 |= other.0;
            }

            pub fn clear(&mut self, other: $name) {
                self.0 &= !other.0;
            }
        }
    };
}

bitflags_like! {
    /// Call flags. `HOLD_OTHER` and `CONFERENCE` come from the dial
    /// request; the rest are internal bookkeeping.
    pub struct CallFlags: u16 {
        const HOLD_OTHER = 1;
        const NEED_HANGUP = 2;
        const ACTIVATED = 4;
        const ALIVE = 8;
        const CONFERENCE = 16;
        const MASTER = 32;
        const BRIDGE_LOOP = 64;
        const BRIDGE_CHECK = 128;
        const MULTIPARTY = 256;
    }
}

/// One call leg (the original's `cpvt`). The modem-assigned `call_idx` is
/// unique within a device while the call is alive; `NONE_IDX` marks a call
/// created locally that has not yet appeared in call listings.
#[derive(Debug, Clone)]
pub struct Call {
    pub id: CallId,
    pub call_idx: u16,
    pub dir: CallDir,
    pub state: CallState,
    pub flags: CallFlags,
    pub number: String,
    pub started: std::time::Instant,
}

impl Call {
    pub const NONE_IDX: u16 = u16::MAX;

    pub fn new(id: CallId, call_idx: u16, dir: CallDir, state: CallState) -> Self {
        Call {
            id,
            call_idx,
            dir,
            state,
            flags: CallFlags::default(),
            number: String::new(),
            started: std::time::Instant::now(),
        }
    }

    pub fn is_sound_source(&self) -> bool {
        matches!(
            self.state,
            CallState::Active | CallState::Dialing | CallState::Alerting
        )
    }
}

/// Hangup cause codes surfaced in `CallEnded` events, mirroring the Q.850
/// subset the original forwards to the modem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HangupCause {
    Unallocated = 1,
    NormalClearing = 16,
    UserBusy = 17,
    NoUserResponse = 18,
    CallRejected = 21,
    DestinationOutOfOrder = 27,
    NormalUnspecified = 31,
    IncompatibleDestination = 88,
}

impl HangupCause {
    /// Constrain an arbitrary host cause to the codes the modem accepts.
    pub fn map(code: i32) -> HangupCause {
        match code {
            1 => HangupCause::Unallocated,
            16 => HangupCause::NormalClearing,
            17 => HangupCause::UserBusy,
            18 | 19 => HangupCause::NoUserResponse,
            21 => HangupCause::CallRejected,
            27 => HangupCause::DestinationOutOfOrder,
            31 => HangupCause::NormalUnspecified,
            88 => HangupCause::IncompatibleDestination,
            _ => HangupCause::NormalClearing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_states_map() {
        assert_eq!(CallState::from_clcc(0), Some(CallState::Active));
        assert_eq!(CallState::from_clcc(5), Some(CallState::Waiting));
        assert_eq!(CallState::from_clcc(6), None);
    }

    #[test]
    fn flags() {
        let mut f = CallFlags::default();
        f.set(CallFlags::NEED_HANGUP);
        f.set(CallFlags::ALIVE);
        assert!(f.contains(CallFlags::NEED_HANGUP));
        f.clear(CallFlags::NEED_HANGUP);
        assert!(!f.contains(CallFlags::NEED_HANGUP));
        assert!(f.contains(CallFlags::ALIVE));
    }

    #[test]
    fn cause_mapping() {
        assert_eq!(HangupCause::map(19), HangupCause::NoUserResponse);
        assert_eq!(HangupCause::map(999), HangupCause::NormalClearing);
    }
}
