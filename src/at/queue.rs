//! The AT command queue.
//!
//! One queue per device holds ordered [`Task`]s, each a non-empty list of
//! [`Cmd`]s. The head task is the in-flight one: its current command is
//! written once, then the queue waits for the expected (or ignorable)
//! response before advancing. `at_once` tasks are concatenated into a
//! single `AT…` line sharing one response window.

use std::collections::VecDeque;
use std::io::Write;
use std::time::{Duration, Instant};

use log::{debug, error, warn};

use crate::at::command::CmdKind;
use crate::at::response::ResponseKind;
use crate::call::CallId;

pub const TIMEOUT_SHORT: Duration = Duration::from_secs(1);
pub const TIMEOUT_MEDIUM: Duration = Duration::from_secs(5);
pub const TIMEOUT_LONG: Duration = Duration::from_secs(40);

/// One command: payload bytes plus the response token that releases it.
/// The payload is taken when written; a command without payload is in
/// flight and `deadline` holds its absolute expiry.
#[derive(Debug, Clone)]
pub struct Cmd {
    pub kind: CmdKind,
    pub expect: ResponseKind,
    pub ignore_mismatch: bool,
    pub suppress_error: bool,
    pub timeout: Duration,
    pub deadline: Option<Instant>,
    pub payload: Option<Vec<u8>>,
}

impl Cmd {
    pub fn new(kind: CmdKind, payload: impl Into<Vec<u8>>) -> Cmd {
        Cmd {
            kind,
            expect: ResponseKind::Ok,
            ignore_mismatch: false,
            suppress_error: false,
            timeout: TIMEOUT_MEDIUM,
            deadline: None,
            payload: Some(payload.into()),
        }
    }

    pub fn expect(mut self, expect: ResponseKind) -> Cmd {
        self.expect = expect;
        self
    }

    pub fn ignore(mut self) -> Cmd {
        self.ignore_mismatch = true;
        self
    }

    pub fn suppress_error(mut self) -> Cmd {
        self.suppress_error = true;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Cmd {
        self.timeout = timeout;
        self
    }

    /// Written and still waiting for its response.
    pub fn in_flight(&self) -> bool {
        self.payload.is_none()
    }
}

/// An ordered non-empty command list scheduled on one device.
#[derive(Debug)]
pub struct Task {
    pub cmds: Vec<Cmd>,
    pub cursor: usize,
    pub call_id: CallId,
    /// Cross-reference into the smsdb for outbound messages, 0 otherwise.
    pub uid: i64,
    pub at_once: bool,
}

impl Task {
    pub fn new(call_id: CallId, cmds: Vec<Cmd>) -> Task {
        debug_assert!(!cmds.is_empty());
        Task {
            cmds,
            cursor: 0,
            call_id,
            uid: 0,
            at_once: false,
        }
    }

    pub fn at_once(mut self) -> Task {
        self.at_once = true;
        self
    }

    pub fn with_uid(mut self, uid: i64) -> Task {
        self.uid = uid;
        self
    }

    /// The command currently owning the response window.
    pub fn current(&self) -> Option<&Cmd> {
        if self.at_once {
            self.cmds.first()
        } else {
            self.cmds.get(self.cursor)
        }
    }

    fn current_mut(&mut self) -> Option<&mut Cmd> {
        if self.at_once {
            self.cmds.first_mut()
        } else {
            self.cmds.get_mut(self.cursor)
        }
    }
}

#[derive(Debug, Default)]
pub struct AtQueue {
    tasks: VecDeque<Task>,
    /// Currently queued tasks/commands.
    pub at_tasks: usize,
    pub at_cmds: usize,
    /// Lifetime totals.
    pub total_tasks: u64,
    pub total_cmds: u64,
}

/// Write everything, retrying transient errors a bounded number of times.
fn write_all_retry(writer: &mut dyn Write, mut buf: &[u8]) -> std::io::Result<()> {
    let mut tries = 10u32;
    while !buf.is_empty() {
        match writer.write(buf) {
            Ok(0) => return Err(std::io::ErrorKind::WriteZero.into()),
            Ok(n) => {
                tries = 10;
                buf = &buf[n..];
            }
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::Interrupted | std::io::ErrorKind::WouldBlock
                ) =>
            {
                tries -= 1;
                if tries == 0 {
                    return Err(e);
                }
            }
            Err(e) => return Err(e),
        }
    }
    writer.flush()
}

impl AtQueue {
    pub fn new() -> AtQueue {
        AtQueue::default()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Append a task. With `at_head` set and a non-empty queue, the task
    /// goes second so the in-flight head is never preempted.
    pub fn add(&mut self, task: Task, at_head: bool) {
        self.at_tasks += 1;
        self.at_cmds += task.cmds.len();
        self.total_tasks += 1;
        self.total_cmds += task.cmds.len() as u64;

        debug!(
            "queue + [{}] expect [{}] cmds:{} {}{}",
            task.cmds[0].kind,
            task.cmds[0].expect,
            task.cmds.len(),
            if at_head { "after head" } else { "at tail" },
            if task.at_once { " at once" } else { "" },
        );

        if at_head && !self.tasks.is_empty() {
            self.tasks.insert(1, task);
        } else {
            self.tasks.push_back(task);
        }
    }

    pub fn head_task(&self) -> Option<&Task> {
        self.tasks.front()
    }

    pub fn head_task_mut(&mut self) -> Option<&mut Task> {
        self.tasks.front_mut()
    }

    pub fn head_cmd(&self) -> Option<&Cmd> {
        self.head_task().and_then(Task::current)
    }

    /// Deadline of the in-flight head command, if one has been written.
    pub fn head_deadline(&self) -> Option<Instant> {
        self.head_cmd().filter(|c| c.in_flight()).and_then(|c| c.deadline)
    }

    fn remove_head(&mut self) {
        if let Some(task) = self.tasks.pop_front() {
            self.at_tasks -= 1;
            self.at_cmds -= task.cmds.len() - task.cursor;
            debug!(
                "queue - [{}] cmds:{}/{} tasks:{}",
                task.cmds[0].kind,
                task.cursor,
                task.cmds.len(),
                self.at_tasks
            );
        }
    }

    /// Match `res` against the head command and advance the queue.
    pub fn handle_result(&mut self, res: ResponseKind) {
        let Some(task) = self.tasks.front_mut() else {
            return;
        };

        if task.at_once {
            let matched = task.cmds[0].expect == res || task.cmds[0].ignore_mismatch;
            self.at_cmds -= task.cmds.len() - task.cursor;
            task.cursor = task.cmds.len();
            if matched {
                self.remove_head();
            }
            return;
        }

        let index = task.cursor;
        let cmd = &task.cmds[index];
        let matched = cmd.expect == res;
        let tolerated = cmd.ignore_mismatch;
        if matched {
            debug!(
                "queue match [{}] result [{}] cmd {}/{}",
                cmd.kind,
                res,
                index + 1,
                task.cmds.len()
            );
        } else {
            debug!(
                "queue mismatch [{}] expected [{}] got [{}] cmd {}/{}",
                cmd.kind,
                cmd.expect,
                res,
                index + 1,
                task.cmds.len()
            );
        }
        task.cursor += 1;
        self.at_cmds -= 1;
        if task.cursor >= task.cmds.len() || (!matched && !tolerated) {
            self.remove_head();
        }
    }

    /// Advance past the head command as if an unexpected response arrived;
    /// used when writing the payload failed.
    fn handle_write_failure(&mut self) {
        let Some(task) = self.tasks.front_mut() else {
            return;
        };
        if task.at_once {
            let keep = task.cmds[0].ignore_mismatch;
            self.at_cmds -= task.cmds.len() - task.cursor;
            task.cursor = task.cmds.len();
            if !keep {
                self.remove_head();
            }
        } else {
            let tolerated = task.cmds[task.cursor].ignore_mismatch;
            task.cursor += 1;
            self.at_cmds -= 1;
            if task.cursor >= task.cmds.len() || !tolerated {
                self.remove_head();
            }
        }
    }

    /// Write the head task's pending payload, if any. Transport failure
    /// forces the head off the queue and surfaces the error.
    pub fn run(&mut self, writer: &mut dyn Write) -> std::io::Result<()> {
        let Some(task) = self.tasks.front_mut() else {
            return Ok(());
        };

        if task.at_once {
            // All payloads are sent as one `AT…` line with `;` separators
            // and share the first command's response window.
            let total: usize = task.cmds.iter().map(|c| c.payload.as_ref().map_or(0, Vec::len)).sum();
            if total == 0 {
                return Ok(());
            }

            let mut line = Vec::with_capacity(total + task.cmds.len() + 2);
            line.extend_from_slice(b"AT");
            for (i, cmd) in task.cmds.iter().enumerate() {
                if let Some(p) = &cmd.payload {
                    line.extend_from_slice(p);
                }
                line.push(if i + 1 < task.cmds.len() { b';' } else { b'\r' });
            }

            debug!("-> [{}] {} bytes at once", task.cmds[0].kind, line.len());
            if let Err(e) = write_all_retry(writer, &line) {
                warn!("write failed for at-once [{}]: {}", task.cmds[0].kind, e);
                self.handle_write_failure();
                return Err(e);
            }
            for cmd in &mut task.cmds {
                cmd.payload = None;
            }
            let first = &mut task.cmds[0];
            first.deadline = Some(Instant::now() + first.timeout);
            return Ok(());
        }

        let Some(cmd) = task.current_mut() else {
            return Ok(());
        };
        let Some(payload) = cmd.payload.take() else {
            // Already written, waiting on its response.
            return Ok(());
        };

        debug!("-> [{}] {} bytes", cmd.kind, payload.len());
        if let Err(e) = write_all_retry(writer, &payload) {
            error!("write failed for [{}]: {}", cmd.kind, e);
            self.handle_write_failure();
            return Err(e);
        }
        cmd.deadline = Some(Instant::now() + cmd.timeout);
        Ok(())
    }

    /// Drop every queued task.
    pub fn flush(&mut self) {
        self.tasks.clear();
        self.at_tasks = 0;
        self.at_cmds = 0;
    }

    /// Rewrite task ownership when a call is destroyed while its commands
    /// are still queued.
    pub fn reassign_call(&mut self, from: CallId, to: CallId) {
        for task in &mut self.tasks {
            if task.call_id == from {
                task.call_id = to;
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::SYS_CHAN;

    fn cmd(payload: &str) -> Cmd {
        Cmd::new(CmdKind::At, payload.as_bytes())
    }

    #[test]
    fn fifo_order_on_the_wire() {
        let mut q = AtQueue::new();
        let mut wire = Vec::new();

        q.add(Task::new(SYS_CHAN, vec![cmd("AT\r")]), false);
        q.add(Task::new(SYS_CHAN, vec![cmd("AT+CSQ\r")]), false);
        q.add(Task::new(SYS_CHAN, vec![cmd("AT+CREG?\r")]), false);

        q.run(&mut wire).unwrap();
        q.handle_result(ResponseKind::Ok);
        q.run(&mut wire).unwrap();
        q.handle_result(ResponseKind::Ok);
        q.run(&mut wire).unwrap();
        q.handle_result(ResponseKind::Ok);

        assert_eq!(&wire[..], b"AT\rAT+CSQ\rAT+CREG?\r");
        assert!(q.is_empty());
    }

    #[test]
    fn priority_insert_goes_second() {
        let mut q = AtQueue::new();
        let mut wire = Vec::new();

        q.add(Task::new(SYS_CHAN, vec![cmd("T1\r")]), false);
        q.add(Task::new(SYS_CHAN, vec![cmd("T2\r")]), false);
        q.add(Task::new(SYS_CHAN, vec![cmd("T3\r")]), false);
        q.run(&mut wire).unwrap();

        // T1 is in flight; the priority task must not preempt it.
        q.add(Task::new(SYS_CHAN, vec![cmd("TNEW\r")]), true);

        for _ in 0..4 {
            q.handle_result(ResponseKind::Ok);
            q.run(&mut wire).unwrap();
        }
        assert_eq!(&wire[..], b"T1\rTNEW\rT2\rT3\r");
    }

    #[test]
    fn priority_insert_on_empty_queue() {
        let mut q = AtQueue::new();
        q.add(Task::new(SYS_CHAN, vec![cmd("X\r")]), true);
        assert_eq!(q.at_tasks, 1);
        assert_eq!(q.head_cmd().unwrap().kind, CmdKind::At);
    }

    #[test]
    fn at_once_single_write_and_release() {
        let mut q = AtQueue::new();
        let mut wire = Vec::new();

        let task = Task::new(
            SYS_CHAN,
            vec![cmd("+QSPN"), cmd("+QNWINFO"), cmd("+CSQ")],
        )
        .at_once();
        q.add(task, false);
        q.run(&mut wire).unwrap();

        assert_eq!(&wire[..], b"AT+QSPN;+QNWINFO;+CSQ\r");
        assert!(q.head_task().unwrap().cmds.iter().all(Cmd::in_flight));

        // A second run produces no duplicate write.
        q.run(&mut wire).unwrap();
        assert_eq!(&wire[..], b"AT+QSPN;+QNWINFO;+CSQ\r");

        // One matching response pops the whole task.
        q.handle_result(ResponseKind::Ok);
        assert!(q.is_empty());
        assert_eq!(q.at_cmds, 0);
    }

    #[test]
    fn mismatch_pops_whole_task() {
        let mut q = AtQueue::new();
        let mut wire = Vec::new();

        q.add(Task::new(SYS_CHAN, vec![cmd("A\r"), cmd("B\r")]), false);
        q.run(&mut wire).unwrap();
        q.handle_result(ResponseKind::Error);

        assert!(q.is_empty());
        assert_eq!(q.at_cmds, 0);
    }

    #[test]
    fn ignore_tolerates_mismatch() {
        let mut q = AtQueue::new();
        let mut wire = Vec::new();

        q.add(
            Task::new(SYS_CHAN, vec![cmd("A\r").ignore(), cmd("B\r")]),
            false,
        );
        q.run(&mut wire).unwrap();
        q.handle_result(ResponseKind::Error);

        // Task survived, cursor advanced to B.
        assert_eq!(q.at_tasks, 1);
        q.run(&mut wire).unwrap();
        assert_eq!(&wire[..], b"A\rB\r");
        q.handle_result(ResponseKind::Ok);
        assert!(q.is_empty());
    }

    #[test]
    fn deadline_set_only_after_write() {
        let mut q = AtQueue::new();
        q.add(Task::new(SYS_CHAN, vec![cmd("AT\r")]), false);
        assert_eq!(q.head_deadline(), None);

        let mut wire = Vec::new();
        q.run(&mut wire).unwrap();
        assert!(q.head_deadline().is_some());
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn write_failure_forces_head_off() {
        let mut q = AtQueue::new();
        q.add(Task::new(SYS_CHAN, vec![cmd("A\r"), cmd("B\r")]), false);
        assert!(q.run(&mut BrokenPipe).is_err());
        assert!(q.is_empty());
    }

    #[test]
    fn flush_clears_counters() {
        let mut q = AtQueue::new();
        q.add(Task::new(SYS_CHAN, vec![cmd("A\r"), cmd("B\r")]), false);
        q.add(Task::new(SYS_CHAN, vec![cmd("C\r")]), false);
        assert_eq!((q.at_tasks, q.at_cmds), (2, 3));
        q.flush();
        assert_eq!((q.at_tasks, q.at_cmds), (0, 0));
        assert_eq!(q.total_tasks, 2);
    }

    #[test]
    fn reassign_call_rewrites_owner() {
        let mut q = AtQueue::new();
        let call = CallId(4);
        q.add(Task::new(call, vec![cmd("A\r")]), false);
        q.reassign_call(call, SYS_CHAN);
        assert_eq!(q.head_task().unwrap().call_id, SYS_CHAN);
    }
}
