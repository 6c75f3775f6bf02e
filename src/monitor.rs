//! The per-device supervisor.
//!
//! One thread per modem owns the TTY read side and the ring buffer. The
//! loop purges expired report records, waits for data no longer than the
//! head command's deadline, frames and dispatches every buffered reply,
//! then lets the queue write the next command. Fatal transport or
//! dispatch errors tear the device down to `Disconnected`; rediscovery is
//! the host's job.

use std::io::{Read, Write};
use std::os::fd::BorrowedFd;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, error, info, warn};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

use crate::at::command;
use crate::at::queue::Task;
use crate::at::reader::Framer;
use crate::at::response::ResponseKind;
use crate::call::{CallFlags, HangupCause, SYS_CHAN};
use crate::device::Device;
use crate::error::{Error, Result};
use crate::events::{Event, SmsReportOutcome};
use crate::rb::RingBuffer;

const RINGBUFFER_SIZE: usize = 2 * 1024;
const DATA_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Transport used by the supervisor: byte I/O plus bounded readiness
/// waiting. Implemented for the serial port and by test doubles.
pub trait ModemPort: Read + Write + Send {
    /// Wait until the port is readable or `timeout` passes. `Ok(false)`
    /// means timeout.
    fn wait_readable(&mut self, timeout: Duration) -> std::io::Result<bool>;
}

/// Serial transport on a Linux TTY.
pub struct SerialPort {
    inner: serialport::TTYPort,
}

impl SerialPort {
    /// Open the data channel: 115200 8N1, flow control per profile.
    /// Returns the supervisor's read side and a cloned write handle for
    /// the device queue.
    pub fn open(path: &str, flow_control: bool) -> Result<(SerialPort, Box<dyn Write + Send>)> {
        let flow = if flow_control {
            serialport::FlowControl::Hardware
        } else {
            serialport::FlowControl::None
        };
        let port = serialport::new(path, 115_200)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(flow)
            .timeout(DATA_READ_TIMEOUT)
            .open_native()
            .map_err(|_| Error::DeviceNotFound)?;
        let writer = port
            .try_clone_native()
            .map_err(|_| Error::DeviceNotFound)?;
        Ok((SerialPort { inner: port }, Box::new(writer)))
    }
}

impl Read for SerialPort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for SerialPort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl ModemPort for SerialPort {
    fn wait_readable(&mut self, timeout: Duration) -> std::io::Result<bool> {
        use std::os::fd::AsRawFd;
        let fd = self.inner.as_raw_fd();
        // SAFETY: the fd lives as long as `self.inner`.
        let borrowed: BorrowedFd<'_> = unsafe { BorrowedFd::borrow_raw(fd) };
        let mut fds = [PollFd::new(borrowed, PollFlags::POLLIN)];
        let timeout = PollTimeout::try_from(timeout.as_millis().min(i32::MAX as u128) as i32)
            .unwrap_or(PollTimeout::MAX);
        match poll(&mut fds, timeout) {
            Ok(0) => Ok(false),
            Ok(_) => Ok(true),
            Err(nix::errno::Errno::EINTR) => Ok(false),
            Err(e) => Err(std::io::Error::from_raw_os_error(e as i32)),
        }
    }
}

/// Pop expired outbound records and surface them as failed reports, and
/// drop inbound reassembly parts past their window.
fn handle_expired_reports(dev: &mut Device) {
    loop {
        match dev.smsdb.outgoing_purge_one() {
            Ok(Some(expired)) => {
                info!("[{}][SMS:{}] expired", dev.id(), expired.uid);
                dev.emit(Event::SmsReport {
                    device: dev.id().to_string(),
                    uid: expired.uid,
                    success: false,
                    outcome: SmsReportOutcome::Expired,
                });
            }
            Ok(None) => break,
            Err(_) => {
                warn!("[{}] unable to purge expired reports", dev.id());
                break;
            }
        }
    }
    dev.smsdb.incoming_purge().ok();
}

/// Drain pending bytes someone left on the line before this supervisor
/// took the port.
fn clean_read_data(port: &mut dyn ModemPort) {
    let mut scratch = [0u8; 256];
    while let Ok(true) = port.wait_readable(Duration::ZERO) {
        match port.read(&mut scratch) {
            Ok(n) if n > 0 => debug!("dropping {n} bytes of pending data"),
            _ => break,
        }
    }
}

/// Best-effort hangup of every leg still marked `NEED_HANGUP`, written in
/// one `AT…` line since the response loop is gone.
fn hangup_pending_calls(dev: &mut Device) {
    let pending: Vec<u16> = dev
        .calls()
        .iter()
        .filter(|c| c.flags.contains(CallFlags::NEED_HANGUP))
        .map(|c| c.call_idx)
        .collect();
    // Whatever was queued will never get its response now.
    dev.queue.flush();
    if pending.is_empty() {
        return;
    }
    let simcom = dev.is_simcom();
    for call_idx in pending {
        let cmd = command::hangup_immediate(simcom, HangupCause::NormalUnspecified, call_idx);
        dev.queue.add(Task::new(SYS_CHAN, vec![cmd]).at_once(), false);
    }
    // Push everything out in one write; replies are not awaited.
    loop {
        if dev.queue.run(&mut *dev.writer).is_err() {
            break;
        }
        dev.queue.handle_result(ResponseKind::Ok);
        if dev.queue.is_empty() {
            break;
        }
    }
}

fn monitor_loop(device: &Arc<Mutex<Device>>, port: &mut dyn ModemPort) -> Result<()> {
    let mut rb: RingBuffer<RINGBUFFER_SIZE> = RingBuffer::new();
    let mut framer = Framer::new();
    let mut line = Vec::with_capacity(256);

    clean_read_data(port);

    {
        let mut dev = device.lock().unwrap();
        dev.start_initialization()?;
    }

    loop {
        {
            let mut dev = device.lock().unwrap();
            handle_expired_reports(&mut dev);
            if dev.terminate_monitor {
                info!("[{}] stopping by request", dev.id());
                return Ok(());
            }
        }

        // Bound the wait by the head command's deadline, if one is in
        // flight; otherwise fall back to the idle ping interval.
        let (timeout, head_in_flight) = {
            let dev = device.lock().unwrap();
            match dev.queue.head_deadline() {
                Some(deadline) => (
                    deadline.saturating_duration_since(std::time::Instant::now()),
                    true,
                ),
                None => (DATA_READ_TIMEOUT, false),
            }
        };

        match port.wait_readable(timeout) {
            Ok(true) => {}
            Ok(false) => {
                let mut guard = device.lock().unwrap();
                let dev: &mut Device = &mut guard;
                if head_in_flight {
                    let kind = dev.queue.head_cmd().map(|c| c.kind);
                    error!(
                        "[{}] timeout waiting for response to {:?}",
                        dev.id(),
                        kind
                    );
                    dev.dispatch_response(ResponseKind::Timeout, b"")?;
                    dev.queue.run(&mut *dev.writer)?;
                } else {
                    dev.enqueue_ping().ok();
                }
                continue;
            }
            Err(e) => {
                error!("poll failed: {e}");
                return Err(Error::DeviceDisconnected);
            }
        }

        let n = {
            let (a, _) = rb.write_iov();
            if a.is_empty() {
                // Buffer full without an extractable reply: drop the
                // garbage rather than deadlock.
                error!(
                    "[{}] AT receive buffer overflow",
                    device.lock().unwrap().id()
                );
                rb.reset();
                framer.reset();
                continue;
            }
            match port.read(a) {
                Ok(0) => return Err(Error::DeviceDisconnected),
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                Err(e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::Interrupted | std::io::ErrorKind::WouldBlock
                    ) =>
                {
                    continue
                }
                Err(_) => return Err(Error::DeviceDisconnected),
            }
        };
        rb.write_commit(n);

        let mut guard = device.lock().unwrap();
        let dev: &mut Device = &mut guard;
        dev.stats.read_bytes += n as u64;

        while let Some(frame) = framer.extract(&mut rb) {
            match rb.read_n(frame.len) {
                Some(view) => view.concat_into(&mut line),
                None => break,
            }
            rb.read_advance(frame.len + frame.skip);
            if line.is_empty() {
                continue;
            }
            let kind = ResponseKind::classify(&line);
            dev.dispatch_response(kind, &line)?;
        }

        if !dev.terminate_monitor {
            dev.queue.run(&mut *dev.writer)?;
        }
    }
}

/// Run one device supervisor until stop or fatal error, then tear down.
pub fn run(device: Arc<Mutex<Device>>, mut port: Box<dyn ModemPort>) {
    let result = monitor_loop(&device, &mut *port);

    let mut dev = device.lock().unwrap();
    match result {
        Ok(()) => info!("[{}] monitor finished", dev.id()),
        Err(e) => {
            if !dev.initialized() {
                warn!("[{}] error initializing device: {}", dev.id(), e);
            } else {
                error!("[{}] fatal link error: {}", dev.id(), e);
            }
        }
    }
    hangup_pending_calls(&mut dev);
    dev.terminate_monitor = false;
    dev.disconnect();
}

/// Spawn the supervisor thread for one device.
pub fn spawn(
    device: Arc<Mutex<Device>>,
    port: Box<dyn ModemPort>,
) -> std::thread::JoinHandle<()> {
    let name = device.lock().unwrap().id().to_string();
    std::thread::Builder::new()
        .name(format!("quectel-mon/{name}"))
        .spawn(move || run(device, port))
        .expect("spawn monitor thread")
}

/// Request a supervisor stop; the thread observes the flag on its next
/// wakeup.
pub fn request_stop(device: &Arc<Mutex<Device>>) {
    device.lock().unwrap().terminate_monitor = true;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::CallState;
    use crate::device::test_support::harness;
    use crate::device::DeviceState;
    use std::collections::VecDeque;

    /// Scripted port: hands out canned reply chunks, then fails like an
    /// unplugged USB modem.
    struct ScriptPort {
        chunks: VecDeque<Vec<u8>>,
        fail_after: bool,
    }

    impl Read for ScriptPort {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.chunks.pop_front() {
                Some(chunk) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
                None if self.fail_after => Err(std::io::ErrorKind::BrokenPipe.into()),
                None => Ok(0),
            }
        }
    }

    impl Write for ScriptPort {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl ModemPort for ScriptPort {
        fn wait_readable(&mut self, _timeout: Duration) -> std::io::Result<bool> {
            // Always readable: exhaustion reads as a dead line rather
            // than an idle one.
            Ok(true)
        }
    }

    #[test]
    fn read_error_mid_dial_tears_down() {
        let h = harness();
        let sink = h.sink.clone();
        let device = Arc::new(Mutex::new(h.device));

        {
            let mut dev = device.lock().unwrap();
            let id = dev.dial("+12025550100", None, false).unwrap();
            dev.change_call_state(id, CallState::Dialing, None);
            sink.drain();
        }

        let port = ScriptPort {
            chunks: VecDeque::new(),
            fail_after: false,
        };
        run(device.clone(), Box::new(port));

        let dev = device.lock().unwrap();
        assert_eq!(dev.state(), DeviceState::Disconnected);
        assert!(dev.calls().is_empty());
        assert!(dev.queue.is_empty());

        let events = sink.drain();
        assert!(events.iter().any(|e| matches!(
            e,
            Event::CallEnded {
                cause: HangupCause::NormalUnspecified,
                ..
            }
        )));
        assert!(events.iter().any(|e| matches!(
            e,
            Event::DeviceStateChanged {
                to: DeviceState::Disconnected,
                ..
            }
        )));
    }

    #[test]
    fn scripted_ping_drains_queue() {
        let h = harness();
        let device = Arc::new(Mutex::new(h.device));
        {
            let mut dev = device.lock().unwrap();
            dev.enqueue(SYS_CHAN, vec![command::ping()], false).unwrap();
        }

        let port = ScriptPort {
            chunks: VecDeque::from([b"\r\nOK\r\n".to_vec()]),
            fail_after: false,
        };
        run(device.clone(), Box::new(port));

        // The initialization burst re-filled the queue, but the ping's OK
        // was matched before the line dropped.
        let dev = device.lock().unwrap();
        assert_eq!(dev.state(), DeviceState::Disconnected);
    }
}
