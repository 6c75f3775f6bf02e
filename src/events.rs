//! Events emitted toward the host telephony framework.
//!
//! The core never blocks on the host: every public call enqueues work and
//! returns, and results surface later through [`EventSink::on_event`].
//! Sinks must not call back into the device under the event, as the
//! per-device lock is held while emitting.

use crate::call::{CallState, HangupCause};
use crate::device::DeviceState;
use crate::pdu::Scts;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmsReportOutcome {
    /// Per-part status bytes in part order; all final.
    Statuses(Vec<u8>),
    /// The record outlived its validity period and was purged.
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    CallStateChanged {
        device: String,
        call_idx: u16,
        from: CallState,
        to: CallState,
        cause: Option<HangupCause>,
    },
    IncomingCall {
        device: String,
        call_idx: u16,
        number: String,
        waiting: bool,
    },
    CallEnded {
        device: String,
        call_idx: u16,
        duration_s: u64,
        cause: HangupCause,
    },
    SmsReceived {
        device: String,
        sender: String,
        timestamp: Option<Scts>,
        body: String,
    },
    SmsReport {
        device: String,
        uid: i64,
        success: bool,
        outcome: SmsReportOutcome,
    },
    UssdReceived {
        device: String,
        kind: &'static str,
        body: String,
        dcs: i32,
    },
    DeviceStateChanged {
        device: String,
        from: DeviceState,
        to: DeviceState,
    },
}

/// Host-side event consumer. Implementations are expected to hand the
/// event off (queue, channel, callback into the framework) rather than do
/// heavy work inline.
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: Event);
}

/// Sink that drops everything. Useful for tools that only exercise the
/// command path.
pub struct NullSink;

impl EventSink for NullSink {
    fn on_event(&self, _event: Event) {}
}

/// Sink collecting events behind a mutex, used by tests and simple hosts.
#[derive(Default)]
pub struct CollectingSink {
    events: std::sync::Mutex<Vec<Event>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<Event> {
        core::mem::take(&mut *self.events.lock().unwrap())
    }
}

impl EventSink for CollectingSink {
    fn on_event(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}
