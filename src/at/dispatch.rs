//! Response dispatch.
//!
//! Every framed reply lands here with its [`ResponseKind`]. Dispatch is a
//! two-level table — the in-flight command kind gives final results
//! (`OK`/`ERROR`/prompt) their meaning, unsolicited results carry their
//! own. Handlers mutate device state, drive the call state machine and
//! emit events; an `Err` return is fatal and tears the device down.

use log::{debug, error, info, warn};

use crate::at::command::{self, CmdKind};
use crate::at::parse::{self, CallInfo, CpinState, QindKind};
use crate::at::response::ResponseKind;
use crate::call::{CallDir, CallFlags, CallState, HangupCause, SYS_CHAN};
use crate::device::{Device, DeviceState};
use crate::error::{Error, Result};
use crate::events::{Event, SmsReportOutcome};
use crate::modules::{self, Vendor};
use crate::pdu::{self, hexstr, Tpdu};

const CLCC_CALL_TYPE_VOICE: u32 = 0;

static USSD_TYPES: [&str; 6] = [
    "USSD Notify",
    "USSD Request",
    "USSD Terminated by network",
    "Other local client has responded",
    "Operation not supported",
    "Network time out",
];

impl Device {
    /// Handle one framed reply. Returns `Err` only for conditions that
    /// require supervisor teardown.
    pub(crate) fn dispatch_response(&mut self, kind: ResponseKind, raw: &[u8]) -> Result<()> {
        self.stats.at_responses += 1;
        let line = String::from_utf8_lossy(raw).into_owned();

        if self
            .queue
            .head_cmd()
            .map(|c| c.kind == CmdKind::User && c.in_flight())
            .unwrap_or(false)
        {
            info!("[{}] response to user command: {:?}", self.id(), line.trim_end());
        }

        match kind {
            // Informational lines with no state to carry.
            ResponseKind::Boot
            | ResponseKind::Cssi
            | ResponseKind::Cssu
            | ResponseKind::Srvst
            | ResponseKind::Cvoice
            | ResponseKind::Cpms
            | ResponseKind::Csms
            | ResponseKind::Conf
            | ResponseKind::Qlts
            | ResponseKind::Cclk => {
                debug!("[{}] {}", self.id(), line.trim_end());
                Ok(())
            }

            ResponseKind::Ok => self.on_ok(),
            ResponseKind::Error | ResponseKind::CmsError | ResponseKind::Timeout => {
                self.on_error(kind)
            }
            ResponseKind::SmsPrompt => self.on_sms_prompt(),

            ResponseKind::Cmgs => self.on_cmgs(&line),
            ResponseKind::Cmgr => self.on_cmgr(&line),
            ResponseKind::Cmt => self.on_cmt(&line),
            ResponseKind::Cds => self.on_cds(&line),
            ResponseKind::Cbm => {
                debug!("[{}] cell broadcast ignored", self.id());
                Ok(())
            }
            ResponseKind::Cmgl => self.on_cmgl(&line),
            ResponseKind::Cmti | ResponseKind::Cdsi => self.on_msg_index(&line),

            ResponseKind::Cusd => {
                // An error here is not fatal. Just keep going.
                self.on_cusd(&line);
                Ok(())
            }

            ResponseKind::Clcc => self.on_clcc(&line),
            ResponseKind::Dsci => self.on_dsci(&line),
            ResponseKind::Qind => self.on_qind(&line),
            ResponseKind::Cend => self.on_cend(&line),
            ResponseKind::Rcend => self.on_rcend(),
            ResponseKind::Ccwa => self.on_ccwa(&line),

            ResponseKind::Creg | ResponseKind::Cereg => {
                self.on_creg(&line);
                Ok(())
            }
            ResponseKind::Csq => {
                if let Some(rssi) = parse::parse_csq(&line) {
                    self.rssi = crate::registration::Rssi(rssi);
                } else {
                    debug!("[{}] unparsable CSQ: {:?}", self.id(), line.trim_end());
                }
                Ok(())
            }
            ResponseKind::Cops => {
                if let Some(name) = parse::parse_cops(&line) {
                    info!("[{}] operator: {}", self.id(), name);
                    self.provider_name = name;
                }
                Ok(())
            }
            ResponseKind::Qspn => {
                if let Some(spn) = parse::parse_qspn(&line) {
                    info!("[{}] operator: {}", self.id(), spn);
                    self.provider_name = spn;
                } else {
                    error!("[{}] unparsable QSPN: {:?}", self.id(), line.trim_end());
                }
                Ok(())
            }
            ResponseKind::Qnwinfo => {
                if let Some((act, band)) = parse::parse_qnwinfo(&line) {
                    self.act = act;
                    self.band = band;
                }
                Ok(())
            }

            ResponseKind::Cpin => self.on_cpin(&line),
            ResponseKind::Cnum => {
                self.subscriber_number = parse::parse_cnum(&line);
                Ok(())
            }
            ResponseKind::Csca => {
                self.on_csca(&line);
                Ok(())
            }

            ResponseKind::Qpcmv => {
                self.on_vendor_detected(Vendor::Quectel);
                Ok(())
            }
            ResponseKind::Cpcmreg => {
                self.on_vendor_detected(Vendor::Simcom);
                Ok(())
            }

            ResponseKind::Ring => {
                info!("[{}] RING", self.id());
                Ok(())
            }
            ResponseKind::Busy => {
                error!("[{}] BUSY", self.id());
                Ok(())
            }
            ResponseKind::NoDialtone => {
                error!("[{}] NO DIALTONE", self.id());
                self.on_dial_rejected();
                Ok(())
            }
            ResponseKind::NoAnswer => {
                info!("[{}] NO ANSWER", self.id());
                Ok(())
            }
            ResponseKind::NoCarrier => {
                info!("[{}] NO CARRIER", self.id());
                Ok(())
            }
            ResponseKind::SmMemFull => {
                error!("[{}] SMS storage is full", self.id());
                Ok(())
            }

            ResponseKind::ParseError => {
                error!("[{}] error parsing result", self.id());
                Err(Error::Unknown)
            }
            ResponseKind::Unknown => self.on_unknown(&line),
        }
    }

    // ---- final results --------------------------------------------------

    fn on_ok(&mut self) -> Result<()> {
        let Some(ecmd) = self.queue.head_cmd() else {
            error!("[{}] received unexpected 'OK'", self.id());
            return Ok(());
        };

        if !matches!(ecmd.expect, ResponseKind::Ok | ResponseKind::Cmgr) {
            error!(
                "[{}] received 'OK' when expecting '{}', ignoring",
                self.id(),
                ecmd.expect
            );
            return Ok(());
        }

        let kind = ecmd.kind;
        let call_id = self.queue.head_task().map(|t| t.call_id).unwrap_or(SYS_CHAN);

        match kind {
            CmdKind::AtD => {
                self.dialing = true;
                if let Some(call) = self.call_mut(call_id) {
                    call.flags.set(CallFlags::NEED_HANGUP);
                }
            }
            CmdKind::AtA | CmdKind::Chld2x => {
                if let Some(call) = self.call_mut(call_id) {
                    call.flags.set(CallFlags::NEED_HANGUP);
                }
                debug!("[{}] {} accepted", self.id(), kind);
            }
            CmdKind::Chup | CmdKind::Qhup | CmdKind::Chld1x => {
                if let Some(call) = self.call_mut(call_id) {
                    call.flags.clear(CallFlags::NEED_HANGUP);
                }
                debug!("[{}] hangup confirmed", self.id());
            }
            CmdKind::Cfun => {
                // Reset in progress: the hardware call state is gone.
                self.ring = false;
                self.dialing = false;
                self.cwaiting = false;
            }
            CmdKind::Cscs => {
                debug!("[{}] UCS-2 text encoding enabled", self.id());
                self.use_ucs2_encoding = true;
            }
            CmdKind::Cmgf => {
                debug!("[{}] SMS operation mode set to PDU", self.id());
            }
            CmdKind::Cnmi => {
                debug!("[{}] SMS new message indication enabled", self.id());
                self.has_sms = true;
                self.mark_initialized();
            }
            CmdKind::AtFinal => {
                self.mark_initialized();
            }
            CmdKind::Cmgs => {
                debug!("[{}] sending SMS message in progress", self.id());
            }
            CmdKind::SmsText => {
                self.outgoing_sms = false;
                info!("[{}] SMS message part accepted", self.id());
            }
            CmdKind::Cmgr => {
                // The `+CMGR` body (if the slot held one) was handled when
                // its frame arrived; this closing OK drives the single
                // drain advance. No body at all means an empty slot.
                let delete = self.incoming_sms_parsed.take() == Some(true);
                self.sms_retrieved(delete);
            }
            CmdKind::Cmgd => {
                debug!("[{}] SMS message deleted", self.id());
            }
            CmdKind::Cusd => {
                info!("[{}] USSD request sent", self.id());
            }
            CmdKind::User => {}
            _ => {
                debug!("[{}] {} sent successfully", self.id(), kind);
            }
        }

        self.queue.handle_result(ResponseKind::Ok);
        Ok(())
    }

    fn log_cmd_error(&self, suppress: bool, msg: &str) {
        if suppress {
            debug!("[{}] command response error suppressed: {}", self.id(), msg);
        } else {
            error!("[{}] {}", self.id(), msg);
        }
    }

    fn on_error(&mut self, res: ResponseKind) -> Result<()> {
        let Some(ecmd) = self.queue.head_cmd() else {
            warn!("[{}] received unexpected '{}'", self.id(), res);
            return Ok(());
        };

        if !matches!(
            ecmd.expect,
            ResponseKind::Ok | ResponseKind::Cmgr | ResponseKind::SmsPrompt
        ) {
            warn!(
                "[{}] received '{}' when expecting '{}', ignoring",
                self.id(),
                res,
                ecmd.expect
            );
            return Ok(());
        }

        let kind = ecmd.kind;
        let suppress = ecmd.suppress_error;
        let call_id = self.queue.head_task().map(|t| t.call_id).unwrap_or(SYS_CHAN);
        let uid = self.queue.head_task().map(|t| t.uid).unwrap_or(0);

        let mut fatal = false;
        match kind {
            // Failures that mean the device is not usable at all.
            CmdKind::At | CmdKind::AtZ | CmdKind::AtE | CmdKind::Clcc => {
                self.log_cmd_error(suppress, &format!("command '{kind}' failed"));
                fatal = true;
            }
            CmdKind::Cgmi => {
                self.log_cmd_error(suppress, "getting manufacturer info failed");
                fatal = true;
            }
            CmdKind::Cgmm => {
                self.log_cmd_error(suppress, "getting model info failed");
                fatal = true;
            }
            CmdKind::Cgmr => {
                self.log_cmd_error(suppress, "getting firmware info failed");
                fatal = true;
            }
            CmdKind::Cmee => {
                self.log_cmd_error(suppress, "setting error verbosity level failed");
                fatal = true;
            }
            CmdKind::Cgsn => {
                self.log_cmd_error(suppress, "getting IMEI number failed");
                fatal = true;
            }
            CmdKind::Cimi => {
                self.log_cmd_error(suppress, "getting IMSI number failed");
                fatal = true;
            }
            CmdKind::Cpin => {
                self.log_cmd_error(suppress, "error checking PIN state");
                fatal = true;
            }
            CmdKind::CopsInit => {
                self.log_cmd_error(suppress, "error setting operator select parameters");
                fatal = true;
            }
            CmdKind::CregInit => {
                self.log_cmd_error(suppress, "error enabling registration info");
                fatal = true;
            }
            CmdKind::Cssn => {
                self.log_cmd_error(suppress, "error enabling service notifications");
                fatal = true;
            }

            CmdKind::Creg => {
                debug!("[{}] error getting registration info", self.id());
            }
            CmdKind::CcwaSet | CmdKind::CcwaStatus | CmdKind::Cnum => {
                self.log_cmd_error(suppress, &format!("command '{kind}' failed"));
            }
            CmdKind::QindcfgCsq
            | CmdKind::QindcfgAct
            | CmdKind::QindcfgRing
            | CmdKind::QindcfgCc
            | CmdKind::QindcfgCcOff
            | CmdKind::Dsci
            | CmdKind::DsciOff => {
                debug!("[{}] error enabling indications", self.id());
            }

            CmdKind::CvoiceQuectel => {
                debug!("[{}] no Quectel voice support", self.id());
            }
            CmdKind::CvoiceSimcom => {
                debug!("[{}] no SIMCom voice support", self.id());
                if self.vendor.is_none() {
                    // Neither family probe answered: close initialization
                    // with the generic tail.
                    if self.enqueue(SYS_CHAN, modules::fallback_burst(), false).is_err() {
                        self.log_cmd_error(suppress, "error scheduling initialization commands");
                        fatal = true;
                    }
                }
            }

            CmdKind::Cmgf | CmdKind::Cpms | CmdKind::Cnmi => {
                debug!("[{}] command '{}' failed: no SMS support", self.id(), kind);
                self.has_sms = false;
            }
            CmdKind::Cscs => {
                debug!("[{}] no UCS-2 encoding support", self.id());
                self.use_ucs2_encoding = false;
            }

            CmdKind::AtA | CmdKind::Chld2x => {
                self.log_cmd_error(suppress, "answer failed");
                self.change_call_state(call_id, CallState::Released, Some(HangupCause::CallRejected));
            }
            CmdKind::Chld3 => {
                self.log_cmd_error(suppress, "cannot begin conference");
            }
            CmdKind::Clir => {
                self.log_cmd_error(suppress, "setting CLIR failed");
            }
            CmdKind::Chld2 | CmdKind::AtD => {
                let dialing_call = self
                    .call(call_id)
                    .map(|c| {
                        kind == CmdKind::AtD
                            || (c.flags.contains(CallFlags::HOLD_OTHER) && c.state == CallState::Init)
                    })
                    .unwrap_or(false);
                if dialing_call {
                    self.log_cmd_error(suppress, "dial failed");
                    self.change_call_state(
                        call_id,
                        CallState::Released,
                        Some(HangupCause::NormalUnspecified),
                    );
                }
            }
            CmdKind::Chup | CmdKind::Qhup | CmdKind::Chld1x => {
                self.log_cmd_error(suppress, "error sending hangup");
            }

            CmdKind::Cmgr => {
                // Unreadable or empty slot; keep draining the inbox.
                self.incoming_sms_parsed = None;
                self.sms_retrieved(false);
            }
            CmdKind::Cmgd => {
                self.log_cmd_error(suppress, "error deleting SMS message");
            }
            CmdKind::Cmgs | CmdKind::SmsText => {
                self.outgoing_sms = false;
                match self.smsdb.outgoing_clear(uid) {
                    Ok(Some((dst, _body))) => {
                        self.emit(Event::SmsReport {
                            device: self.id().to_string(),
                            uid,
                            success: false,
                            outcome: SmsReportOutcome::Statuses(Vec::new()),
                        });
                        self.log_cmd_error(suppress, &format!("error sending SMS message to {dst}"));
                    }
                    Ok(None) => {
                        self.log_cmd_error(suppress, "error sending SMS message");
                    }
                    Err(_) => {
                        error!("[{}] smsdb failure while clearing message", self.id());
                    }
                }
            }
            CmdKind::Dtmf => {
                self.log_cmd_error(suppress, "error sending DTMF");
            }
            CmdKind::Cops | CmdKind::Qspn | CmdKind::Cspn => {
                debug!("[{}] could not get provider name", self.id());
            }
            CmdKind::Cusd => {
                self.log_cmd_error(suppress, "error sending USSD");
            }
            _ => {
                self.log_cmd_error(
                    suppress,
                    &format!("received '{res}' for unhandled command '{kind}'"),
                );
            }
        }

        self.queue.handle_result(res);
        if fatal {
            return Err(Error::Unknown);
        }
        Ok(())
    }

    fn on_sms_prompt(&mut self) -> Result<()> {
        match self.queue.head_cmd() {
            Some(ecmd) if ecmd.expect == ResponseKind::SmsPrompt => {
                self.queue.handle_result(ResponseKind::SmsPrompt);
            }
            Some(ecmd) => {
                error!(
                    "[{}] received SMS prompt when expecting '{}', ignoring",
                    self.id(),
                    ecmd.expect
                );
            }
            None => {
                error!("[{}] received unexpected SMS prompt", self.id());
            }
        }
        Ok(())
    }

    // ---- initialization -------------------------------------------------

    fn mark_initialized(&mut self) {
        if self.initialized {
            return;
        }
        self.initialized = true;
        info!("[{}] initialized and ready", self.id());
        self.set_device_state(DeviceState::Started);
    }

    fn on_vendor_detected(&mut self, vendor: Vendor) {
        if self.vendor.is_some() {
            return;
        }
        info!(
            "[{}] {} modem detected, voice supported",
            self.id(),
            match vendor {
                Vendor::Quectel => "Quectel",
                Vendor::Simcom => "SIMCom",
            }
        );
        self.vendor = Some(vendor);
        self.has_voice = true;
        let burst = vendor.init_burst(&self.shared);
        if self.enqueue(SYS_CHAN, burst, false).is_err() {
            error!("[{}] error scheduling vendor initialization", self.id());
        }
    }

    fn on_cpin(&mut self, line: &str) -> Result<()> {
        match parse::parse_cpin(line) {
            Some(CpinState::Ready) => Ok(()),
            Some(CpinState::PinRequired) => {
                error!("[{}] SIM PIN code required", self.id());
                Err(Error::DeviceDisabled)
            }
            Some(CpinState::PukRequired) => {
                error!("[{}] SIM PUK code required", self.id());
                Err(Error::DeviceDisabled)
            }
            None => {
                error!("[{}] error parsing +CPIN: {:?}", self.id(), line.trim_end());
                Err(Error::Unknown)
            }
        }
    }

    fn on_csca(&mut self, line: &str) {
        let Some(raw) = parse::parse_csca(line) else {
            debug!("[{}] could not parse CSCA: {:?}", self.id(), line.trim_end());
            return;
        };
        let value = if self.use_ucs2_encoding && !raw.is_empty() {
            hexstr::decode(raw.as_bytes())
                .ok()
                .and_then(|bytes| pdu::ucs2::ucs2_bytes_to_utf8(&bytes).ok())
        } else {
            Some(raw.clone())
        };
        match value {
            Some(sca) => {
                debug!("[{}] SMS service centre: {}", self.id(), sca);
                self.sms_scenter = sca;
            }
            None => debug!("[{}] undecodable CSCA value: {:?}", self.id(), raw),
        }
    }

    // ---- registration and signal ----------------------------------------

    fn on_creg(&mut self, line: &str) {
        let Some(info) = parse::parse_creg(line) else {
            error!("[{}] error parsing registration: {:?}", self.id(), line.trim_end());
            return;
        };

        if info.registered && !self.gsm_registered {
            // First transition to registered: learn the operator name and
            // apply the configured call-waiting mode.
            let (cmds, at_once) = self.vendor.unwrap_or(Vendor::Simcom).operator_query();
            let task = if at_once {
                crate::at::queue::Task::new(SYS_CHAN, cmds).at_once()
            } else {
                crate::at::queue::Task::new(SYS_CHAN, cmds)
            };
            if self.enqueue_task(task, false).is_err() {
                warn!("[{}] error sending query for provider name", self.id());
            }

            if self.shared.call_waiting != crate::config::CallWaiting::Auto {
                let cmds = command::ccwa(self.shared.call_waiting);
                if self.enqueue(SYS_CHAN, cmds, false).is_err() {
                    warn!("[{}] error setting call waiting mode", self.id());
                }
            }
        }

        self.gsm_registered = info.registered;
        self.reg.status = crate::registration::RegistrationStatus::from(info.status);
        if info.lac.is_some() {
            self.reg.lac = info.lac;
        }
        if info.ci.is_some() {
            self.reg.cell_id = info.ci;
        }
        if info.act.is_some() {
            self.reg.act = info.act;
        }
    }

    // ---- calls -----------------------------------------------------------

    fn on_clcc(&mut self, line: &str) -> Result<()> {
        if !self.initialized() {
            return Ok(());
        }

        for call in self.calls_iter_mut() {
            call.flags.clear(CallFlags::ALIVE);
        }

        // Some firmwares report several calls in one reply.
        for entry in line.split("\r\n").filter(|s| !s.trim().is_empty()) {
            match parse::parse_clcc(entry) {
                Some(info) if info.mode != CLCC_CALL_TYPE_VOICE => {
                    debug!(
                        "[{}] non-voice call idx:{} ignored",
                        self.id(),
                        info.call_idx
                    );
                }
                Some(info) => self.handle_call_info(info),
                None => error!("[{}] cannot parse CLCC line {:?}", self.id(), entry),
            }
        }
        Ok(())
    }

    fn on_dsci(&mut self, line: &str) -> Result<()> {
        let Some(info) = parse::parse_dsci(line) else {
            error!("[{}] failed to parse DSCI {:?}", self.id(), line.trim_end());
            return Ok(());
        };
        if info.mode != CLCC_CALL_TYPE_VOICE {
            debug!("[{}] non-voice DSCI idx:{} ignored", self.id(), info.call_idx);
            return Ok(());
        }
        self.on_call_notification(info);
        Ok(())
    }

    fn on_qind(&mut self, line: &str) -> Result<()> {
        let Some((kind, params)) = parse::parse_qind(line) else {
            return Ok(());
        };
        match kind {
            QindKind::Csq => {
                if let Some(rssi) = parse::parse_qind_csq(params) {
                    self.rssi = crate::registration::Rssi(rssi);
                }
            }
            QindKind::Act => {
                if let Some(name) = parse::parse_qind_act(params) {
                    self.act = parse::act_to_code(name);
                }
            }
            QindKind::CcInfo => match parse::parse_qind_cc(params) {
                Some(info) if info.mode != CLCC_CALL_TYPE_VOICE => {}
                Some(info) => self.on_call_notification(info),
                None => error!("[{}] failed to parse ccinfo {:?}", self.id(), params),
            },
            QindKind::None => {}
        }
        Ok(())
    }

    /// Unsolicited call notification: a released leg will not appear in a
    /// `+CLCC` listing any more and is synthesized locally, every other
    /// state is re-synced through a polled listing.
    fn on_call_notification(&mut self, info: CallInfo) {
        if info.state == CallState::Released {
            self.handle_call_info(info);
        } else {
            self.request_clcc();
        }
    }

    fn handle_call_info(&mut self, info: CallInfo) {
        let reported_dir = if info.incoming {
            CallDir::Incoming
        } else {
            CallDir::Outgoing
        };

        let mut matched = None;
        if let Some(call) = self.call_by_idx_mut(info.call_idx) {
            call.flags.set(CallFlags::ALIVE);
            let dir_ok = call.dir == reported_dir;
            if dir_ok {
                if info.multiparty {
                    call.flags.set(CallFlags::MULTIPARTY);
                } else {
                    call.flags.clear(CallFlags::MULTIPARTY);
                }
                if call.number.is_empty() && !info.number.is_empty() {
                    call.number = info.number.clone();
                }
            }
            matched = Some((
                call.id,
                dir_ok,
                call.state,
                call.flags.contains(CallFlags::CONFERENCE),
            ));
        }

        if let Some((id, dir_ok, old_state, conference)) = matched {
            if !dir_ok {
                error!(
                    "[{}] call idx:{} direction mismatch",
                    self.id(),
                    info.call_idx
                );
                return;
            }
            let conference_pending = info.state == CallState::Alerting && conference;
            if info.state != old_state {
                let cause = if info.state == CallState::Released {
                    Some(HangupCause::NormalClearing)
                } else {
                    None
                };
                self.change_call_state(id, info.state, cause);
            }
            if conference_pending {
                if self.enqueue(id, vec![command::conference()], true).is_err() {
                    warn!("[{}] unable to enqueue conference", self.id());
                }
            }
            return;
        }

        match info.state {
            CallState::Dialing | CallState::Alerting => {
                // A freshly dialed leg gets its modem index on the first
                // report; adopt the youngest locally created call.
                if let Some(id) = self.last_initialized_call_id() {
                    if let Some(call) = self.call_mut(id) {
                        call.call_idx = info.call_idx;
                    }
                    self.change_call_state(id, info.state, None);
                } else {
                    error!(
                        "[{}] unexpected outgoing call idx:{}, hanging up",
                        self.id(),
                        info.call_idx
                    );
                    if self
                        .hangup_by_idx(info.call_idx, HangupCause::CallRejected)
                        .is_err()
                    {
                        error!("[{}] error sending hangup command", self.id());
                    }
                }
            }
            CallState::Incoming | CallState::Waiting => {
                let id = self.new_call(info.call_idx, CallDir::Incoming, info.state);
                if let Some(call) = self.call_mut(id) {
                    call.number = info.number.clone();
                    call.flags.set(CallFlags::NEED_HANGUP);
                }
                self.stats.in_calls += 1;
                if info.state == CallState::Waiting {
                    self.stats.cw_calls += 1;
                }
                if !self.has_voice {
                    warn!(
                        "[{}] incoming call on a device without voice support",
                        self.id()
                    );
                }
                self.emit(Event::IncomingCall {
                    device: self.id().to_string(),
                    call_idx: info.call_idx,
                    number: info.number,
                    waiting: info.state == CallState::Waiting,
                });
            }
            CallState::Released => {
                debug!(
                    "[{}] release of unknown call idx:{} ignored",
                    self.id(),
                    info.call_idx
                );
            }
            state => {
                warn!(
                    "[{}] unhandled call state event idx:{} state:{}",
                    self.id(),
                    info.call_idx,
                    state
                );
            }
        }
    }

    /// `VOICE CALL: END` closes the active leg and triggers a listing
    /// refresh for whatever remains.
    fn on_cend(&mut self, line: &str) -> Result<()> {
        self.request_clcc();

        let duration = parse::parse_cend_duration(line);
        if duration.is_none() {
            debug!("[{}] could not parse all CEND parameters", self.id());
        }

        if let Some(id) = self.active_call_id() {
            if let Some(call) = self.call_mut(id) {
                call.flags.clear(CallFlags::NEED_HANGUP);
            }
            self.change_call_state(id, CallState::Released, Some(HangupCause::NormalClearing));
        }
        Ok(())
    }

    fn on_rcend(&mut self) -> Result<()> {
        if let Some(id) = self.active_call_id() {
            if let Some(call) = self.call_mut(id) {
                call.flags.clear(CallFlags::NEED_HANGUP);
            }
            self.change_call_state(id, CallState::Released, Some(HangupCause::NormalClearing));
        }
        Ok(())
    }

    fn on_dial_rejected(&mut self) {
        if let Some(task) = self.queue.head_task() {
            let call_id = task.call_id;
            if self.call(call_id).is_some() {
                self.change_call_state(
                    call_id,
                    CallState::Released,
                    Some(HangupCause::DestinationOutOfOrder),
                );
            }
        }
    }

    fn on_ccwa(&mut self, line: &str) -> Result<()> {
        if let Some((status, class)) = parse::parse_ccwa_status(line) {
            if class & command::CCWA_CLASS_VOICE != 0 && status <= 1 {
                self.has_call_waiting = status == 1;
                info!(
                    "[{}] call waiting is {}",
                    self.id(),
                    if status == 1 { "enabled" } else { "disabled" }
                );
            }
            return Ok(());
        }

        if self.initialized() {
            match parse::parse_ccwa_urc(line) {
                Some(class) if class & command::CCWA_CLASS_VOICE != 0 => {
                    self.cwaiting = true;
                    self.request_clcc();
                }
                Some(_) => {}
                None => error!("[{}] cannot parse CCWA line {:?}", self.id(), line.trim_end()),
            }
        }
        Ok(())
    }

    // ---- SMS -------------------------------------------------------------

    fn on_msg_index(&mut self, line: &str) -> Result<()> {
        if self.shared.disable_sms {
            warn!(
                "[{}] SMS reception has been disabled in the configuration",
                self.id()
            );
            return Ok(());
        }

        match parse::parse_msg_index(line) {
            Some(index) if index < command::SMS_INDEX_MAX => {
                debug!("[{}] incoming SMS message at index {}", self.id(), index);
                if self.retrieve_sms(index, false).is_err() {
                    error!("[{}] error enqueueing SMS retrieval", self.id());
                }
            }
            _ => {
                // Some firmwares emit nonsense indexes; never drop calls
                // over them.
                warn!(
                    "[{}] error parsing incoming SMS alert {:?}, ignoring",
                    self.id(),
                    line.trim_end()
                );
            }
        }
        Ok(())
    }

    fn on_cmgs(&mut self, line: &str) -> Result<()> {
        let uid = self.queue.head_task().map(|t| t.uid).unwrap_or(0);
        let Some(mr) = parse::parse_cmgs(line) else {
            warn!("[{}] cannot parse CMGS reply {:?}", self.id(), line.trim_end());
            return Ok(());
        };
        match self.smsdb.outgoing_part_put(uid, mr) {
            Ok(Some((dst, _body))) => {
                // All parts handed to the network and no report requested.
                info!("[{}][SMS:{}] message sent to {}", self.id(), uid, dst);
            }
            Ok(None) => {
                debug!("[{}][SMS:{}] part accepted, mr {}", self.id(), uid, mr);
            }
            Err(_) => {
                error!("[{}] smsdb failure recording message reference", self.id());
            }
        }
        Ok(())
    }

    /// Route a parsed TPDU to the inbound or the report path.
    fn handle_tpdu(&mut self, tpdu: Tpdu) {
        match tpdu {
            Tpdu::Deliver(deliver) => {
                let (sender, scts, body) = (deliver.sender, deliver.scts, deliver.body);
                match deliver.udh {
                    Some(udh) if udh.parts > 1 => {
                        info!(
                            "[{}] got SM part from {} [ref={} parts={} order={}]",
                            self.id(),
                            sender,
                            udh.ref_id,
                            udh.parts,
                            udh.order
                        );
                        let imsi = self.imsi.clone();
                        match self.smsdb.put_part(
                            &imsi,
                            &sender,
                            udh.ref_id,
                            udh.parts,
                            udh.order,
                            &body,
                        ) {
                            Ok((_, Some(full))) => {
                                info!("[{}] got full SMS from {}", self.id(), sender);
                                self.emit(Event::SmsReceived {
                                    device: self.id().to_string(),
                                    sender,
                                    timestamp: Some(scts),
                                    body: full,
                                });
                            }
                            Ok((count, None)) => {
                                info!(
                                    "[{}] waiting for remaining parts ({}/{})",
                                    self.id(),
                                    count,
                                    udh.parts
                                );
                            }
                            Err(_) => {
                                // Storage trouble must not lose the text.
                                error!("[{}] error putting SMS into smsdb", self.id());
                                self.emit(Event::SmsReceived {
                                    device: self.id().to_string(),
                                    sender,
                                    timestamp: Some(scts),
                                    body,
                                });
                            }
                        }
                    }
                    _ => {
                        info!("[{}] got single SM from {}", self.id(), sender);
                        self.emit(Event::SmsReceived {
                            device: self.id().to_string(),
                            sender,
                            timestamp: Some(scts),
                            body,
                        });
                    }
                }
            }
            Tpdu::StatusReport(report) => {
                info!(
                    "[{}] got status report mr {} from {} status {}",
                    self.id(),
                    report.mr,
                    report.recipient,
                    report.status
                );
                let imsi = self.imsi.clone();
                match self.smsdb.outgoing_part_status(
                    &imsi,
                    &report.recipient,
                    report.mr,
                    report.status,
                ) {
                    Ok(Some(done)) => {
                        let success = done.statuses.iter().all(|s| s & 0x40 == 0);
                        self.emit(Event::SmsReport {
                            device: self.id().to_string(),
                            uid: done.uid,
                            success,
                            outcome: SmsReportOutcome::Statuses(done.statuses),
                        });
                    }
                    Ok(None) => {
                        debug!("[{}] waiting for remaining reports", self.id());
                    }
                    Err(_) => {
                        error!("[{}] smsdb failure recording delivery status", self.id());
                    }
                }
            }
        }
    }

    fn on_cmgr(&mut self, line: &str) -> Result<()> {
        let Some(ecmd) = self.queue.head_cmd() else {
            warn!("[{}] received unexpected '+CMGR'", self.id());
            return Ok(());
        };
        if ecmd.expect != ResponseKind::Cmgr && ecmd.kind != CmdKind::User {
            error!(
                "[{}] received '+CMGR' when expecting '{}', ignoring",
                self.id(),
                ecmd.expect
            );
            return Ok(());
        }

        // The read command stays in flight: its reply is two frames (this
        // body, then the closing OK), and only the OK may advance the
        // queue and the retrieval drain, or the next queued index would
        // be consumed twice and its read popped unsent.
        let tracked = ecmd.expect == ResponseKind::Cmgr;

        let parsed = parse::parse_cmgr(line)
            .and_then(|reply| pdu::parse_pdu(reply.hex.as_bytes(), reply.tpdu_len));
        match parsed {
            Ok(tpdu) => {
                self.handle_tpdu(tpdu);
                if tracked {
                    self.incoming_sms_parsed = Some(true);
                }
            }
            Err(e) => {
                warn!("[{}] error parsing incoming message: {}", self.id(), e);
                if tracked {
                    self.incoming_sms_parsed = Some(false);
                }
            }
        }
        Ok(())
    }

    /// Directly routed SMS-DELIVER; needs an acknowledgement instead of a
    /// storage read-out.
    fn on_cmt(&mut self, line: &str) -> Result<()> {
        let parsed = parse::parse_cmt(line)
            .and_then(|reply| pdu::parse_pdu(reply.hex.as_bytes(), reply.tpdu_len));
        match parsed {
            Ok(tpdu) => self.handle_tpdu(tpdu),
            Err(e) => warn!("[{}] error parsing direct message: {}", self.id(), e),
        }
        if self.enqueue(SYS_CHAN, vec![command::msg_ack(None)], true).is_err() {
            warn!("[{}] unable to acknowledge message", self.id());
        }
        Ok(())
    }

    fn on_cds(&mut self, line: &str) -> Result<()> {
        let parsed = parse::parse_cds(line)
            .and_then(|reply| pdu::parse_pdu(reply.hex.as_bytes(), reply.tpdu_len));
        match parsed {
            Ok(tpdu) => self.handle_tpdu(tpdu),
            Err(e) => warn!("[{}] error parsing status report: {}", self.id(), e),
        }
        if self.enqueue(SYS_CHAN, vec![command::msg_ack(None)], true).is_err() {
            warn!("[{}] unable to acknowledge status report", self.id());
        }
        Ok(())
    }

    fn on_cmgl(&mut self, line: &str) -> Result<()> {
        match parse::parse_cmgl(line) {
            Ok(reply) => {
                let index = reply.index;
                match pdu::parse_pdu(reply.hex.as_bytes(), reply.tpdu_len) {
                    Ok(tpdu) => {
                        self.handle_tpdu(tpdu);
                        if let (Some(index), true) = (index, self.shared.auto_delete_sms) {
                            if self
                                .enqueue(SYS_CHAN, vec![command::delete_sms(index, None)], true)
                                .is_err()
                            {
                                warn!("[{}] unable to delete listed SMS {}", self.id(), index);
                            }
                        }
                    }
                    Err(e) => warn!("[{}] error parsing listed message: {}", self.id(), e),
                }
            }
            Err(e) => warn!("[{}] error parsing CMGL entry: {}", self.id(), e),
        }
        Ok(())
    }

    // ---- USSD ------------------------------------------------------------

    fn on_cusd(&mut self, line: &str) {
        let Some(ussd) = parse::parse_cusd(line) else {
            warn!("[{}] error parsing CUSD {:?}", self.id(), line.trim_end());
            return;
        };

        let kind = USSD_TYPES
            .get(ussd.kind as usize)
            .copied()
            .unwrap_or("Unknown");

        // Sanitize the DCS down to the three charsets networks send.
        let dcs = if ussd.dcs >= 0 && ussd.dcs & 0x40 != 0 {
            let v = (ussd.dcs & 0x0c) >> 2;
            if v == 3 {
                0
            } else {
                v
            }
        } else {
            0
        };

        let body = match dcs {
            0 => hexstr::decode(ussd.body.as_bytes())
                .map_err(Error::from)
                .and_then(|bytes| pdu::gsm7::unpack_decode(&bytes, 0)),
            1 => Ok(ussd.body.clone()),
            2 => hexstr::decode(ussd.body.as_bytes())
                .map_err(Error::from)
                .and_then(|bytes| pdu::ucs2::ucs2_bytes_to_utf8(&bytes)),
            _ => Err(Error::InvalidCharset),
        };

        match body {
            Ok(body) => {
                info!("[{}] got USSD '{}': {}", self.id(), kind, body);
                self.emit(Event::UssdReceived {
                    device: self.id().to_string(),
                    kind,
                    body,
                    dcs,
                });
            }
            Err(e) => {
                error!("[{}] cannot decode USSD body: {}", self.id(), e);
            }
        }
    }

    // ---- identity capture -----------------------------------------------

    fn on_unknown(&mut self, line: &str) -> Result<()> {
        let value = line.trim_end_matches(['\r', '\n']).trim();
        let Some(ecmd) = self.queue.head_cmd() else {
            debug!("[{}] ignoring unknown result {:?}", self.id(), value);
            return Ok(());
        };

        match ecmd.kind {
            CmdKind::Cgmi => {
                debug!("[{}] manufacturer: {}", self.id(), value);
                self.manufacturer = value.to_string();
            }
            CmdKind::Cgmm => {
                debug!("[{}] model: {}", self.id(), value);
                self.model = value.to_string();
            }
            CmdKind::Cgmr => {
                debug!("[{}] firmware: {}", self.id(), value);
                self.firmware = value.to_string();
            }
            CmdKind::Cgsn => {
                debug!("[{}] IMEI: {}", self.id(), value);
                self.imei = value.to_string();
            }
            CmdKind::Cimi => {
                debug!("[{}] IMSI: {}", self.id(), value);
                self.imsi = value.to_string();
            }
            CmdKind::Ccid | CmdKind::Ciccid | CmdKind::Qccid => {
                let iccid = value
                    .rsplit(':')
                    .next()
                    .map(str::trim)
                    .unwrap_or(value);
                debug!("[{}] ICCID: {}", self.id(), iccid);
                self.iccid = iccid.to_string();
            }
            _ => {
                debug!("[{}] ignoring unknown result {:?}", self.id(), value);
            }
        }
        Ok(())
    }
}
