//! Protocol Session - synchronous request/response over GDB/MI
//!
//! Every command is sent with a numeric token prefix; the session then reads
//! output until the result record carrying that token arrives. Everything the
//! debugger prints on the way (async notifications, console text) is attached
//! to the record instead of being dropped.

use super::mi::{self, Record, ResultClass};
use super::types::{AsyncEvent, ResultRecord, TargetStatus};
use super::{Issue, SessionError};
use std::io;
use std::mem;
use std::time::{Duration, Instant};

/// Line-level connection to a debugger
pub trait Transport {
    fn send_line(&mut self, line: &str) -> io::Result<()>;

    /// Next output line. `Ok(None)` if nothing arrived within `timeout`;
    /// an error once the debugger's output is closed.
    fn recv_line(&mut self, timeout: Duration) -> io::Result<Option<String>>;

    fn close(&mut self);
}

/// Wait bounds for [`ProtocolSession::issue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Maximum wait for a command's result record
    pub command: Duration,
    /// After `^running`, how long to wait for `*stopped` before returning
    pub stop_wait: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            command: Duration::from_secs(10),
            stop_wait: Duration::from_secs(2),
        }
    }
}

enum Incoming {
    Line(String),
    Timeout,
    Closed,
}

/// One debugger connection with strictly one command in flight
pub struct ProtocolSession<T: Transport> {
    transport: Option<T>,
    timeouts: Timeouts,
    next_token: u64,
    /// Output received between commands, attached to the next record
    pending_events: Vec<AsyncEvent>,
    pending_console: Vec<String>,
    target: TargetStatus,
}

impl<T: Transport> ProtocolSession<T> {
    pub fn new(transport: T, timeouts: Timeouts) -> Self {
        Self {
            transport: Some(transport),
            timeouts,
            next_token: 1,
            pending_events: Vec::new(),
            pending_console: Vec::new(),
            target: TargetStatus::Disconnected,
        }
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    pub fn transport(&self) -> Option<&T> {
        self.transport.as_ref()
    }

    /// Target state derived from the records seen so far
    pub fn target_status(&self) -> TargetStatus {
        self.target
    }

    /// Write `command` and block until its result record arrives
    pub fn issue(&mut self, command: &str) -> Result<ResultRecord, SessionError> {
        let command = command.trim();
        if command.contains(['\n', '\r']) {
            return Err(SessionError::InvalidInput(
                "a command must be a single line".into(),
            ));
        }
        let transport = self.transport.as_mut().ok_or(SessionError::NotReady)?;

        let token = self.next_token;
        self.next_token += 1;
        let line = format!("{}{}", token, command);
        log::debug!("[mi->] {}", line);

        if let Err(e) = transport.send_line(&line) {
            log::warn!("Debugger input closed: {}", e);
            self.drop_transport();
            return Err(SessionError::NotReady);
        }

        let mut events = mem::take(&mut self.pending_events);
        let mut console = mem::take(&mut self.pending_console);

        match self.collect(token, command, &mut events, &mut console) {
            Ok((class, payload, preceding)) => {
                let record = ResultRecord::new(token, class, payload, events, preceding, console);
                self.observe(&record);
                Ok(record)
            }
            Err(e) => {
                // keep what was read for the next record
                events.append(&mut self.pending_events);
                console.append(&mut self.pending_console);
                self.pending_events = events;
                self.pending_console = console;
                Err(e)
            }
        }
    }

    /// Ask the debugger to exit and release the transport. Idempotent.
    pub fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            log::debug!("[mi->] -gdb-exit");
            let _ = transport.send_line("-gdb-exit");
            transport.close();
        }
        self.target = TargetStatus::Disconnected;
    }

    fn collect(
        &mut self,
        token: u64,
        command: &str,
        events: &mut Vec<AsyncEvent>,
        console: &mut Vec<String>,
    ) -> Result<(ResultClass, mi::MiTuple, usize), SessionError> {
        let started = Instant::now();
        let deadline = started + self.timeouts.command;

        let (class, payload) = loop {
            let line = match self.recv(deadline) {
                Incoming::Line(line) => line,
                Incoming::Timeout => {
                    return Err(SessionError::TimedOut {
                        command: command.to_string(),
                        waited: started.elapsed(),
                    })
                }
                Incoming::Closed => return Err(SessionError::NotReady),
            };

            match mi::parse_line(&line) {
                Ok(Record::Result {
                    token: Some(t),
                    class,
                    results,
                }) if t == token => break (class, results),
                Ok(record) => absorb(record, line, events, console),
                Err(e) if is_result_for(&line, token) => {
                    return Err(SessionError::Protocol {
                        message: e.to_string(),
                        raw: line,
                    })
                }
                Err(_) => console.push(line),
            }
        };

        // a stop read before our own result belongs to an earlier command
        let preceding = events.len();
        if class == ResultClass::Running {
            self.wait_for_stop(events, console);
        }
        Ok((class, payload, preceding))
    }

    /// Bounded wait for `*stopped` after a `^running` result
    fn wait_for_stop(&mut self, events: &mut Vec<AsyncEvent>, console: &mut Vec<String>) {
        let deadline = Instant::now() + self.timeouts.stop_wait;
        loop {
            let line = match self.recv(deadline) {
                Incoming::Line(line) => line,
                Incoming::Timeout | Incoming::Closed => return,
            };
            match mi::parse_line(&line) {
                Ok(record) => absorb(record, line, events, console),
                Err(_) => console.push(line),
            }
            if events.last().is_some_and(AsyncEvent::is_stop) {
                return;
            }
        }
    }

    fn recv(&mut self, deadline: Instant) -> Incoming {
        let Some(transport) = self.transport.as_mut() else {
            return Incoming::Closed;
        };
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Incoming::Timeout;
        }
        match transport.recv_line(remaining) {
            Ok(Some(line)) => {
                log::debug!("[mi<-] {}", line);
                Incoming::Line(line)
            }
            Ok(None) => Incoming::Timeout,
            Err(e) => {
                log::warn!("Debugger output closed: {}", e);
                self.drop_transport();
                Incoming::Closed
            }
        }
    }

    fn drop_transport(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        self.target = TargetStatus::Disconnected;
    }

    fn observe(&mut self, record: &ResultRecord) {
        match record.class {
            ResultClass::Connected => self.target = TargetStatus::Connected,
            ResultClass::Exit => self.target = TargetStatus::Disconnected,
            _ => {}
        }
        for event in &record.events {
            if event.is_exit() {
                self.target = TargetStatus::Disconnected;
            } else if event.is_stop() {
                self.target = TargetStatus::Halted;
            } else if event.kind == mi::AsyncKind::Exec && event.class == "running" {
                self.target = TargetStatus::Running;
            }
        }
        if record.status == super::CommandStatus::Running {
            self.target = TargetStatus::Running;
        }
    }
}

impl<T: Transport> Issue for ProtocolSession<T> {
    fn issue(&mut self, command: &str) -> Result<ResultRecord, SessionError> {
        ProtocolSession::issue(self, command)
    }
}

/// File a non-terminating record under events or console output
fn absorb(record: Record, line: String, events: &mut Vec<AsyncEvent>, console: &mut Vec<String>) {
    match record {
        Record::Async {
            kind,
            class,
            results,
            ..
        } => events.push(AsyncEvent {
            kind,
            class,
            results,
        }),
        Record::Stream { text, .. } => console.push(text),
        Record::Prompt => {}
        Record::Result { token, .. } => {
            // late reply to an earlier command that timed out
            log::warn!("Unmatched result record (token {:?})", token);
            console.push(line);
        }
    }
}

fn is_result_for(line: &str, token: u64) -> bool {
    line.strip_prefix(token.to_string().as_str())
        .is_some_and(|rest| rest.starts_with('^'))
}
