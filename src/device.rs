//! Per-device state and the public operation surface.
//!
//! One `Device` per physical modem. It owns the AT queue, the call list
//! and the identity/radio snapshot; the supervisor thread owns the TTY
//! reader and calls into the dispatcher with every framed reply. All
//! public operations enqueue commands and return immediately — results
//! arrive as [`Event`]s.

use std::io::Write;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};

use crate::at::command::{self, MsgStatus};
use crate::at::queue::{AtQueue, Cmd, Task};
use crate::call::{
    Call, CallDir, CallFlags, CallId, CallState, HangupCause, CALL_STATES, MAX_CALL_IDX, SYS_CHAN,
};
use crate::config::{CallWaiting, DeviceConfig, SharedConfig};
use crate::error::{Error, Result};
use crate::events::{Event, EventSink};
use crate::modules::Vendor;
use crate::pdu;
use crate::registration::{Registration, Rssi};
use crate::smsdb::SmsDb;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Stopped,
    Started,
    Disconnected,
    Removed,
}

impl DeviceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceState::Stopped => "stopped",
            DeviceState::Started => "started",
            DeviceState::Disconnected => "disconnected",
            DeviceState::Removed => "removed",
        }
    }
}

impl core::fmt::Display for DeviceState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 256-slot bitmap of SMS storage indexes waiting to be read.
#[derive(Debug, Default, Clone, Copy)]
pub struct Inbox([u64; 4]);

impl Inbox {
    pub fn set(&mut self, index: u32) {
        if index < 256 {
            self.0[(index / 64) as usize] |= 1 << (index % 64);
        }
    }

    /// Take the lowest pending index.
    pub fn pop(&mut self) -> Option<u32> {
        for (word, bits) in self.0.iter_mut().enumerate() {
            if *bits != 0 {
                let bit = bits.trailing_zeros();
                *bits &= !(1 << bit);
                return Some(word as u32 * 64 + bit);
            }
        }
        None
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|w| *w == 0)
    }
}

#[derive(Debug, Default, Clone)]
pub struct Stats {
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub at_responses: u64,
    pub in_calls: u64,
    pub in_calls_handled: u64,
    pub cw_calls: u64,
    pub calls_answered: [u64; 2],
    pub calls_duration_s: [u64; 2],
}

impl Stats {
    /// Average call duration in seconds; `-1` when no call completed yet,
    /// preserved as a sentinel rather than a meaningful value.
    pub fn acd(&self) -> i64 {
        let calls = self.calls_answered[0] + self.calls_answered[1];
        if calls == 0 {
            return -1;
        }
        ((self.calls_duration_s[0] + self.calls_duration_s[1]) / calls) as i64
    }
}

pub struct Device {
    pub(crate) cfg: DeviceConfig,
    pub(crate) shared: SharedConfig,
    pub(crate) writer: Box<dyn Write + Send>,
    pub(crate) sink: Arc<dyn EventSink>,
    pub(crate) smsdb: Arc<SmsDb>,
    pub(crate) queue: AtQueue,

    calls: Vec<Call>,
    next_call_id: u32,
    pub(crate) chan_count: [usize; CALL_STATES],

    // Identity, filled during initialization.
    pub(crate) manufacturer: String,
    pub(crate) model: String,
    pub(crate) firmware: String,
    pub(crate) imei: String,
    pub(crate) imsi: String,
    pub(crate) iccid: String,
    pub(crate) subscriber_number: Option<String>,
    pub(crate) sms_scenter: String,
    pub(crate) provider_name: String,

    // Radio state.
    pub(crate) reg: Registration,
    pub(crate) rssi: Rssi,
    pub(crate) act: i32,
    pub(crate) band: Option<String>,

    // Flags.
    pub(crate) connected: bool,
    pub(crate) initialized: bool,
    pub(crate) gsm_registered: bool,
    pub(crate) has_sms: bool,
    pub(crate) has_voice: bool,
    pub(crate) has_call_waiting: bool,
    pub(crate) use_ucs2_encoding: bool,
    pub(crate) vendor: Option<Vendor>,
    pub(crate) ring: bool,
    pub(crate) dialing: bool,
    pub(crate) cwaiting: bool,
    pub(crate) outgoing_sms: bool,

    pub(crate) incoming_sms_index: Option<u32>,
    /// Outcome of the in-flight retrieval's `+CMGR` body, if one arrived:
    /// `Some(true)` parsed and handled, `Some(false)` unparsable. The
    /// trailing `OK` consumes this and advances the drain exactly once.
    pub(crate) incoming_sms_parsed: Option<bool>,
    pub(crate) inbox: Inbox,

    pub(crate) state: DeviceState,
    pub(crate) terminate_monitor: bool,

    pub(crate) stats: Stats,
}

impl Device {
    pub fn new(
        cfg: DeviceConfig,
        shared: SharedConfig,
        writer: Box<dyn Write + Send>,
        sink: Arc<dyn EventSink>,
        smsdb: Arc<SmsDb>,
    ) -> Device {
        Device {
            imei: cfg.imei.clone().unwrap_or_default(),
            imsi: cfg.imsi.clone().unwrap_or_default(),
            cfg,
            shared,
            writer,
            sink,
            smsdb,
            queue: AtQueue::new(),
            calls: Vec::new(),
            next_call_id: 1,
            chan_count: [0; CALL_STATES],
            manufacturer: String::new(),
            model: String::new(),
            firmware: String::new(),
            iccid: String::new(),
            subscriber_number: None,
            sms_scenter: String::new(),
            provider_name: String::new(),
            reg: Registration::default(),
            rssi: Rssi(99),
            act: -1,
            band: None,
            connected: false,
            initialized: false,
            gsm_registered: false,
            has_sms: false,
            has_voice: false,
            has_call_waiting: false,
            use_ucs2_encoding: false,
            vendor: None,
            ring: false,
            dialing: false,
            cwaiting: false,
            outgoing_sms: false,
            incoming_sms_index: None,
            incoming_sms_parsed: None,
            inbox: Inbox::default(),
            state: DeviceState::Stopped,
            terminate_monitor: false,
            stats: Stats::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.cfg.id
    }

    pub fn is_simcom(&self) -> bool {
        self.vendor == Some(Vendor::Simcom)
    }

    pub fn initialized(&self) -> bool {
        self.initialized
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn rssi(&self) -> Rssi {
        self.rssi
    }

    pub fn registration(&self) -> &Registration {
        &self.reg
    }

    pub fn imei(&self) -> &str {
        &self.imei
    }

    pub fn imsi(&self) -> &str {
        &self.imsi
    }

    pub fn iccid(&self) -> &str {
        &self.iccid
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn firmware(&self) -> &str {
        &self.firmware
    }

    pub fn provider_name(&self) -> &str {
        &self.provider_name
    }

    pub fn subscriber_number(&self) -> Option<&str> {
        self.subscriber_number.as_deref()
    }

    pub(crate) fn emit(&self, event: Event) {
        self.sink.on_event(event);
    }

    pub(crate) fn set_device_state(&mut self, to: DeviceState) {
        if self.state == to {
            return;
        }
        let from = self.state;
        self.state = to;
        info!("[{}] device {} -> {}", self.cfg.id, from, to);
        self.emit(Event::DeviceStateChanged {
            device: self.cfg.id.clone(),
            from,
            to,
        });
    }

    // ---- queue plumbing -------------------------------------------------

    pub(crate) fn enqueue(&mut self, call_id: CallId, cmds: Vec<Cmd>, at_head: bool) -> Result<()> {
        self.enqueue_task(Task::new(call_id, cmds), at_head)
    }

    pub(crate) fn enqueue_task(&mut self, task: Task, at_head: bool) -> Result<()> {
        self.queue.add(task, at_head);
        self.queue.run(&mut *self.writer).map_err(|_| Error::Queue)
    }

    fn require_connected(&self) -> Result<()> {
        if !self.connected {
            return Err(Error::DeviceDisconnected);
        }
        Ok(())
    }

    // ---- call list ------------------------------------------------------

    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    pub(crate) fn call(&self, id: CallId) -> Option<&Call> {
        self.calls.iter().find(|c| c.id == id)
    }

    pub(crate) fn call_mut(&mut self, id: CallId) -> Option<&mut Call> {
        self.calls.iter_mut().find(|c| c.id == id)
    }

    pub(crate) fn call_by_idx_mut(&mut self, call_idx: u16) -> Option<&mut Call> {
        self.calls.iter_mut().find(|c| c.call_idx == call_idx)
    }

    pub(crate) fn calls_iter_mut(&mut self) -> impl Iterator<Item = &mut Call> {
        self.calls.iter_mut()
    }

    /// The call a device-level notification refers to when it carries no
    /// index: the current sound source, or any remaining call.
    pub(crate) fn active_call_id(&self) -> Option<CallId> {
        self.calls
            .iter()
            .find(|c| c.is_sound_source())
            .or_else(|| self.calls.first())
            .map(|c| c.id)
    }

    /// The freshly dialed call a first `+CLCC` report gets matched to.
    pub(crate) fn last_initialized_call_id(&self) -> Option<CallId> {
        self.calls
            .iter()
            .rev()
            .find(|c| c.state == CallState::Init)
            .map(|c| c.id)
    }

    pub(crate) fn new_call(&mut self, call_idx: u16, dir: CallDir, state: CallState) -> CallId {
        debug_assert!(call_idx == Call::NONE_IDX || call_idx <= MAX_CALL_IDX);
        debug_assert!(
            call_idx == Call::NONE_IDX || self.calls.iter().all(|c| c.call_idx != call_idx)
        );
        let id = CallId(self.next_call_id);
        self.next_call_id += 1;
        self.calls.push(Call::new(id, call_idx, dir, state));
        self.chan_count[state as usize] += 1;
        debug!(
            "[{}] call {:?} idx:{} {:?} created in {}",
            self.cfg.id, id, call_idx, dir, state
        );
        self.refresh_call_flags();
        id
    }

    /// Reflect `ring`/`dialing`/`cwaiting` from the call list.
    fn refresh_call_flags(&mut self) {
        self.ring = self.chan_count[CallState::Incoming as usize] > 0;
        self.dialing = self.chan_count[CallState::Dialing as usize] > 0
            || self.chan_count[CallState::Alerting as usize] > 0;
        self.cwaiting = self.chan_count[CallState::Waiting as usize] > 0;
    }

    /// Drive one call to `to`, updating counters and emitting the
    /// host-facing events. Entering `Released` destroys the record and
    /// rewrites queued tasks onto the system channel.
    pub(crate) fn change_call_state(
        &mut self,
        id: CallId,
        to: CallState,
        cause: Option<HangupCause>,
    ) {
        let Some(call) = self.calls.iter_mut().find(|c| c.id == id) else {
            return;
        };
        let from = call.state;
        if from == to {
            return;
        }

        call.state = to;
        self.chan_count[from as usize] -= 1;
        self.chan_count[to as usize] += 1;

        let call_idx = call.call_idx;
        let dir = call.dir;
        let started = call.started;
        let number = call.number.clone();
        debug!(
            "[{}] call idx:{} {} -> {}{}",
            self.cfg.id,
            call_idx,
            from,
            to,
            cause.map(|c| format!(" cause {:?}", c)).unwrap_or_default()
        );

        self.refresh_call_flags();

        self.emit(Event::CallStateChanged {
            device: self.cfg.id.clone(),
            call_idx,
            from,
            to,
            cause,
        });

        match to {
            CallState::Incoming | CallState::Waiting => {
                self.stats.in_calls += 1;
                if to == CallState::Waiting {
                    self.stats.cw_calls += 1;
                }
                self.emit(Event::IncomingCall {
                    device: self.cfg.id.clone(),
                    call_idx,
                    number,
                    waiting: to == CallState::Waiting,
                });
            }
            CallState::Active => {
                self.stats.calls_answered[dir as usize] += 1;
            }
            CallState::Released => {
                let duration = if matches!(from, CallState::Active | CallState::OnHold) {
                    Instant::now().duration_since(started).as_secs()
                } else {
                    0
                };
                self.stats.calls_duration_s[dir as usize] += duration;
                self.emit(Event::CallEnded {
                    device: self.cfg.id.clone(),
                    call_idx,
                    duration_s: duration,
                    cause: cause.unwrap_or(HangupCause::NormalClearing),
                });
                self.release_call(id);
            }
            _ => {}
        }
    }

    fn release_call(&mut self, id: CallId) {
        if let Some(pos) = self.calls.iter().position(|c| c.id == id) {
            let call = self.calls.remove(pos);
            self.chan_count[call.state as usize] -= 1;
            self.queue.reassign_call(id, SYS_CHAN);
            self.refresh_call_flags();
            debug!("[{}] call idx:{} released", self.cfg.id, call.call_idx);
        }
    }

    // ---- public operations ----------------------------------------------

    /// Place an outgoing call. Returns the local call handle; progress
    /// arrives via `CallStateChanged` once the modem reports the leg.
    pub fn dial(&mut self, number: &str, clir: Option<i32>, hold_other: bool) -> Result<CallId> {
        self.require_connected()?;
        if !self.has_voice {
            return Err(Error::DeviceDisabled);
        }

        let hold = hold_other && self.chan_count[CallState::Active as usize] > 0;
        let cmds = command::dial(number, clir, hold)?;

        let id = self.new_call(Call::NONE_IDX, CallDir::Outgoing, CallState::Init);
        {
            let call = self.call_mut(id).expect("just created");
            call.number = number.to_string();
            // ATD may still be queued when a local hangup arrives.
            call.flags.set(CallFlags::NEED_HANGUP);
            if hold_other {
                call.flags.set(CallFlags::HOLD_OTHER);
            }
        }

        if let Err(e) = self.enqueue(id, cmds, true) {
            self.release_call(id);
            return Err(e);
        }
        Ok(id)
    }

    pub fn answer(&mut self, id: CallId) -> Result<()> {
        self.require_connected()?;
        let call = self.call(id).ok_or(Error::DeviceNotFound)?;
        let cmd = command::answer(call.state, call.call_idx)?;
        self.call_mut(id).expect("checked").flags.set(CallFlags::NEED_HANGUP);
        self.enqueue(id, vec![cmd], true)
    }

    /// Put active calls on hold and activate this one.
    pub fn activate(&mut self, id: CallId) -> Result<()> {
        self.require_connected()?;
        let call = self.call(id).ok_or(Error::DeviceNotFound)?;
        match call.state {
            CallState::Active => Ok(()),
            CallState::OnHold | CallState::Waiting => {
                let cmd = command::activate(call.call_idx);
                self.enqueue(id, vec![cmd], true)
            }
            _ => Err(Error::Unknown),
        }
    }

    pub fn flip_hold(&mut self) -> Result<()> {
        self.require_connected()?;
        self.enqueue(SYS_CHAN, vec![command::flip_hold()], true)
    }

    pub fn conference(&mut self, id: CallId) -> Result<()> {
        self.require_connected()?;
        self.call(id).ok_or(Error::DeviceNotFound)?;
        self.enqueue(id, vec![command::conference()], true)
    }

    pub fn hangup(&mut self, id: CallId, cause: HangupCause) -> Result<()> {
        self.require_connected()?;
        let call = self.call(id).ok_or(Error::DeviceNotFound)?;
        let call_idx = call.call_idx;
        let established =
            call.dir == CallDir::Incoming || !matches!(call.state, CallState::Init | CallState::Dialing);

        let cmd = if established && self.calls.len() > 1 {
            command::chld_release(call_idx)
        } else {
            self.vendor
                .unwrap_or(Vendor::Quectel)
                .hangup(&self.shared, cause, call_idx)
        };
        self.enqueue(id, vec![cmd], true)
    }

    /// Hang up by modem index, for legs that never got a local record.
    pub(crate) fn hangup_by_idx(&mut self, call_idx: u16, cause: HangupCause) -> Result<()> {
        let cmd = self
            .vendor
            .unwrap_or(Vendor::Quectel)
            .hangup(&self.shared, cause, call_idx);
        self.enqueue(SYS_CHAN, vec![cmd], true)
    }

    pub fn send_dtmf(&mut self, id: CallId, digit: char) -> Result<()> {
        self.require_connected()?;
        let cmd = command::dtmf(digit)?;
        self.enqueue(id, vec![cmd], true)
    }

    /// Queue one SMS. Returns the smsdb uid tracking the message.
    pub fn send_sms(
        &mut self,
        number: &str,
        body: &str,
        validity_minutes: u32,
        request_report: bool,
    ) -> Result<i64> {
        self.require_connected()?;
        if !self.has_sms {
            return Err(Error::DeviceDisabled);
        }
        if !command::valid_phone_number(number) {
            return Err(Error::InvalidPhoneNumber);
        }

        let validity = if validity_minutes == 0 {
            3 * 24 * 60
        } else {
            validity_minutes
        };

        let units: Vec<u16> = body.encode_utf16().collect();
        let csms_ref = self
            .smsdb
            .get_refid(&self.imsi, number)
            .map_err(|_| Error::Smsdb)?;
        let parts = pdu::build_submit_parts(number, &units, validity, request_report, csms_ref)?;

        let uid = self
            .smsdb
            .outgoing_add(
                &self.imsi,
                number,
                body,
                parts.len() as u8,
                validity * 60,
                request_report,
            )
            .map_err(|_| Error::Smsdb)?;

        let mut cmds = Vec::with_capacity(parts.len() * 2);
        for part in &parts {
            cmds.extend(command::sms_part(part));
        }

        self.outgoing_sms = true;
        self.enqueue_task(Task::new(SYS_CHAN, cmds).with_uid(uid), false)?;
        if parts.len() == 1 {
            info!("[{}][SMS:{}] message enqueued", self.cfg.id, uid);
        } else {
            info!(
                "[{}][SMS:{}] message enqueued [{} parts]",
                self.cfg.id,
                uid,
                parts.len()
            );
        }
        Ok(uid)
    }

    pub fn send_ussd(&mut self, code: &str) -> Result<()> {
        self.require_connected()?;
        let cmd = command::ussd(code)?;
        self.enqueue(SYS_CHAN, vec![cmd], false)
    }

    /// Fetch one stored message. Further indications arriving while the
    /// read is in flight land in the inbox bitmap.
    pub(crate) fn retrieve_sms(&mut self, index: u32, quiet: bool) -> Result<()> {
        if self.incoming_sms_index.is_some() {
            debug!(
                "[{}] SMS retrieval already in progress, queueing index {}",
                self.cfg.id, index
            );
            self.inbox.set(index);
            return Ok(());
        }
        self.incoming_sms_index = Some(index);
        self.incoming_sms_parsed = None;
        let cmd = if quiet {
            command::retrieve_sms_quiet(index)
        } else {
            command::retrieve_sms(index)
        };
        if let Err(e) = self.enqueue(SYS_CHAN, vec![cmd], false) {
            self.incoming_sms_index = None;
            return Err(e);
        }
        Ok(())
    }

    /// Close out the retrieval in flight and start the next pending one.
    /// `delete` is false when the reply could not even be parsed, so a
    /// possibly-intact message is not destroyed.
    pub(crate) fn sms_retrieved(&mut self, delete: bool) {
        if let Some(index) = self.incoming_sms_index.take() {
            if delete && self.shared.auto_delete_sms {
                let ack = self.shared.msg_direct == crate::config::Tristate::On;
                if let Err(e) = self.delete_sms(index, ack) {
                    warn!("[{}] unable to delete SMS {}: {}", self.cfg.id, index, e);
                }
            }
        }
        if let Some(next) = self.inbox.pop() {
            if let Err(e) = self.retrieve_sms(next, false) {
                warn!("[{}] unable to read SMS {}: {}", self.cfg.id, next, e);
            }
        }
    }

    /// Read out every storage slot, for setups where the modem buffers
    /// messages without indications. Slots beyond the first queue up in
    /// the inbox bitmap and drain one read at a time.
    pub fn poll_stored_messages(&mut self) -> Result<()> {
        self.require_connected()?;
        if self.shared.disable_sms {
            return Err(Error::DeviceDisabled);
        }
        for index in 0..command::SMS_INDEX_MAX {
            self.retrieve_sms(index, true)?;
        }
        Ok(())
    }

    pub fn delete_sms(&mut self, index: u32, ack: bool) -> Result<()> {
        self.require_connected()?;
        let mut cmds = Vec::with_capacity(2);
        if ack {
            cmds.push(command::msg_ack(None));
        }
        cmds.push(command::delete_sms(index, None));
        self.enqueue(SYS_CHAN, cmds, true)
    }

    pub fn list_messages(&mut self, stat: MsgStatus) -> Result<()> {
        self.require_connected()?;
        self.enqueue(SYS_CHAN, vec![command::list_messages(stat)], false)
    }

    pub fn set_call_waiting(&mut self, mode: CallWaiting) -> Result<()> {
        self.require_connected()?;
        self.shared.call_waiting = mode;
        self.enqueue(SYS_CHAN, command::ccwa(mode), false)
    }

    pub fn reset(&mut self) -> Result<()> {
        self.require_connected()?;
        self.enqueue(SYS_CHAN, vec![command::reset()], false)
    }

    pub fn send_user_command(&mut self, input: &str) -> Result<()> {
        self.require_connected()?;
        self.enqueue(SYS_CHAN, vec![command::user_cmd(input)], true)
    }

    pub(crate) fn request_clcc(&mut self) {
        if self.enqueue(SYS_CHAN, vec![command::clcc()], true).is_err() {
            warn!("[{}] unable to enqueue call list request", self.cfg.id);
        }
    }

    /// Keep-alive issued when the line is silent.
    pub(crate) fn enqueue_ping(&mut self) -> Result<()> {
        let cmd = match (self.shared.query_time, self.vendor) {
            (true, Some(vendor)) => vendor.time_query(),
            _ => command::ping(),
        };
        self.enqueue(SYS_CHAN, vec![cmd], true)
    }

    /// Schedule the common initialization burst after the link opens.
    pub(crate) fn start_initialization(&mut self) -> Result<()> {
        self.connected = true;
        let burst = command::init_burst(&self.shared);
        self.enqueue(SYS_CHAN, burst, false)
    }

    /// Link loss or requested stop: flush the queue, release every call
    /// with a normal-unspecified cause and reset the volatile state.
    pub(crate) fn disconnect(&mut self) {
        let ids: Vec<CallId> = self.calls.iter().map(|c| c.id).collect();
        for id in ids {
            self.change_call_state(id, CallState::Released, Some(HangupCause::NormalUnspecified));
        }
        self.queue.flush();
        self.connected = false;
        self.initialized = false;
        self.gsm_registered = false;
        self.has_sms = false;
        self.has_voice = false;
        self.use_ucs2_encoding = false;
        self.vendor = None;
        self.ring = false;
        self.dialing = false;
        self.cwaiting = false;
        self.outgoing_sms = false;
        self.incoming_sms_index = None;
        self.incoming_sms_parsed = None;
        self.inbox = Inbox::default();
        self.reg = Registration::default();
        self.rssi = Rssi(99);
        self.set_device_state(DeviceState::Disconnected);
    }
}

impl core::fmt::Debug for Device {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.cfg.id)
            .field("state", &self.state)
            .field("calls", &self.calls.len())
            .field("initialized", &self.initialized)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::config::GlobalConfig;
    use crate::events::CollectingSink;
    use std::sync::Mutex;

    /// Shared byte sink standing in for the TTY writer.
    #[derive(Clone, Default)]
    pub struct Wire(pub Arc<Mutex<Vec<u8>>>);

    impl Write for Wire {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Wire {
        pub fn take(&self) -> Vec<u8> {
            core::mem::take(&mut *self.0.lock().unwrap())
        }
    }

    pub struct Harness {
        pub device: Device,
        pub wire: Wire,
        pub sink: Arc<CollectingSink>,
        pub smsdb: Arc<SmsDb>,
    }

    pub fn harness() -> Harness {
        let wire = Wire::default();
        let sink = Arc::new(CollectingSink::new());
        let global = GlobalConfig::default();
        let smsdb = Arc::new(SmsDb::open(&global.smsdb_path, global.csms_ttl_seconds).unwrap());
        let cfg = DeviceConfig {
            id: "quectel0".into(),
            data_tty: "/dev/ttyUSB2".into(),
            audio_tty: None,
            imei: None,
            imsi: Some("250991234567890".into()),
            initial_state: Default::default(),
        };
        let mut device = Device::new(
            cfg,
            SharedConfig::default(),
            Box::new(wire.clone()),
            sink.clone(),
            smsdb.clone(),
        );
        device.connected = true;
        device.initialized = true;
        device.has_sms = true;
        device.has_voice = true;
        Harness {
            device,
            wire,
            sink,
            smsdb,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::harness;
    use super::*;
    use crate::events::Event;

    #[test]
    fn inbox_bitmap() {
        let mut inbox = Inbox::default();
        assert!(inbox.is_empty());
        inbox.set(3);
        inbox.set(130);
        inbox.set(3);
        assert_eq!(inbox.pop(), Some(3));
        assert_eq!(inbox.pop(), Some(130));
        assert_eq!(inbox.pop(), None);
    }

    #[test]
    fn chan_count_matches_call_states() {
        let mut h = harness();
        let a = h.device.new_call(1, CallDir::Incoming, CallState::Incoming);
        let b = h.device.new_call(2, CallDir::Outgoing, CallState::Init);
        h.device.change_call_state(a, CallState::Active, None);
        h.device.change_call_state(b, CallState::Dialing, None);

        let total: usize = h.device.chan_count.iter().sum();
        assert_eq!(total, h.device.calls().len());
        for (state, count) in h.device.chan_count.iter().enumerate() {
            let want = h
                .device
                .calls()
                .iter()
                .filter(|c| c.state as usize == state)
                .count();
            assert_eq!(*count, want);
        }
        assert!(h.device.dialing);
        assert!(!h.device.ring);
    }

    #[test]
    fn released_call_frees_record_and_tasks() {
        let mut h = harness();
        let id = h.device.dial("+12025550100", None, false).unwrap();
        assert_eq!(h.device.calls().len(), 1);

        h.device
            .change_call_state(id, CallState::Released, Some(HangupCause::NormalUnspecified));
        assert!(h.device.calls().is_empty());
        assert_eq!(h.device.chan_count.iter().sum::<usize>(), 0);
        // The dial task now belongs to the system channel.
        assert!(h.device.queue.iter().all(|t| t.call_id == SYS_CHAN));

        let events = h.sink.drain();
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::CallEnded { cause: HangupCause::NormalUnspecified, .. })));
    }

    #[test]
    fn dial_writes_atd() {
        let mut h = harness();
        h.device.dial("+12025550100", None, false).unwrap();
        assert_eq!(h.wire.take(), b"ATD+12025550100;\r");
        assert!(h.device.calls()[0].flags.contains(CallFlags::NEED_HANGUP));
    }

    #[test]
    fn send_sms_registers_uid_and_writes_cmgs() {
        let mut h = harness();
        let uid = h.device.send_sms("+12025550100", "hi", 15, false).unwrap();
        assert!(uid >= 1);
        let wire = h.wire.take();
        let text = String::from_utf8_lossy(&wire);
        assert!(text.starts_with("AT+CMGS="), "wire: {text}");
        // Only the prompt command is written until `> ` arrives.
        assert_eq!(text.matches("AT+CMGS=").count(), 1);
        assert!(!text.contains('\u{1a}'));
    }

    #[test]
    fn retrieval_serializes_through_inbox() {
        let mut h = harness();
        h.device.retrieve_sms(2, false).unwrap();
        assert_eq!(h.device.incoming_sms_index, Some(2));
        h.device.retrieve_sms(5, false).unwrap();
        h.device.retrieve_sms(9, false).unwrap();
        // Only the first CMGR went out.
        assert_eq!(h.wire.take(), b"AT+CMGR=2\r");

        h.device.sms_retrieved(true);
        assert_eq!(h.device.incoming_sms_index, Some(5));
        h.device.sms_retrieved(true);
        assert_eq!(h.device.incoming_sms_index, Some(9));
        h.device.sms_retrieved(true);
        assert_eq!(h.device.incoming_sms_index, None);
    }

    #[test]
    fn poll_stored_messages_reads_one_slot_at_a_time() {
        let mut h = harness();
        h.device.poll_stored_messages().unwrap();
        assert_eq!(h.wire.take(), b"AT+CMGR=0\r");
        assert_eq!(h.device.incoming_sms_index, Some(0));
        assert!(!h.device.inbox.is_empty());
    }

    #[test]
    fn disconnect_releases_everything() {
        let mut h = harness();
        let id = h.device.dial("+12025550100", None, false).unwrap();
        h.device.change_call_state(id, CallState::Dialing, None);
        h.device.disconnect();

        assert!(h.device.calls().is_empty());
        assert!(h.device.queue.is_empty());
        assert_eq!(h.device.state(), DeviceState::Disconnected);

        let events = h.sink.drain();
        assert!(events.iter().any(|e| matches!(
            e,
            Event::CallEnded { cause: HangupCause::NormalUnspecified, .. }
        )));
        assert!(events.iter().any(|e| matches!(
            e,
            Event::DeviceStateChanged { to: DeviceState::Disconnected, .. }
        )));
    }

    #[test]
    fn acd_sentinel() {
        let stats = Stats::default();
        assert_eq!(stats.acd(), -1);
    }
}
