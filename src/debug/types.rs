//! Common types for the debug session.

use super::mi::{AsyncKind, MiTuple, ResultClass};
use serde::Serialize;

/// Connection/execution state of the target as last observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    #[default]
    Disconnected,
    Connected,
    Halted,
    Running,
}

/// Coarse outcome of one command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Success,
    Error,
    Running,
    Exited,
}

/// Asynchronous record (`*stopped`, `=thread-group-started`, ...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AsyncEvent {
    pub kind: AsyncKind,
    pub class: String,
    pub results: MiTuple,
}

impl AsyncEvent {
    pub fn is_stop(&self) -> bool {
        self.kind == AsyncKind::Exec && self.class == "stopped"
    }

    pub fn is_exit(&self) -> bool {
        self.is_stop()
            && self
                .results
                .get_str("reason")
                .is_some_and(|r| r.starts_with("exited"))
    }
}

/// Terminating response to one issued command, plus everything the debugger
/// printed while it was in flight.
///
/// `events` also carries notifications left over from earlier commands; only
/// those after `preceding` arrived after this command's result record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultRecord {
    pub status: CommandStatus,
    pub class: ResultClass,
    pub token: u64,
    pub payload: MiTuple,
    pub events: Vec<AsyncEvent>,
    pub console: Vec<String>,
    #[serde(skip)]
    pub preceding: usize,
}

impl ResultRecord {
    pub fn new(
        token: u64,
        class: ResultClass,
        payload: MiTuple,
        events: Vec<AsyncEvent>,
        preceding: usize,
        console: Vec<String>,
    ) -> Self {
        let own = events.get(preceding..).unwrap_or_default();
        let stopped = own.iter().any(AsyncEvent::is_stop);
        let status = match class {
            ResultClass::Error => CommandStatus::Error,
            ResultClass::Exit => CommandStatus::Exited,
            _ if own.iter().any(AsyncEvent::is_exit) => CommandStatus::Exited,
            ResultClass::Running if !stopped => CommandStatus::Running,
            _ => CommandStatus::Success,
        };
        Self {
            status,
            class,
            token,
            payload,
            events,
            console,
            preceding,
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == CommandStatus::Error
    }

    /// `msg` of an `^error` record
    pub fn error_message(&self) -> Option<&str> {
        if self.is_error() {
            self.payload.get_str("msg")
        } else {
            None
        }
    }

    /// Most recent `*stopped` event attached to this record
    pub fn stop_event(&self) -> Option<&AsyncEvent> {
        self.events.iter().rev().find(|e| e.is_stop())
    }

    pub fn stop_reason(&self) -> Option<&str> {
        self.stop_event().and_then(|e| e.results.get_str("reason"))
    }

    /// Decode the `memory=[{contents="..."}]` payload of a memory read
    pub fn memory_bytes(&self) -> Option<Vec<u8>> {
        let blocks = self.payload.get("memory")?.items();
        let mut bytes = Vec::new();
        for block in blocks {
            let contents = block.get("contents")?.as_str()?;
            bytes.extend(hex::decode(contents).ok()?);
        }
        Some(bytes)
    }

    /// Value of register `number` in a `register-values` payload
    pub fn register_value(&self, number: &str) -> Option<&str> {
        self.payload
            .get("register-values")?
            .items()
            .into_iter()
            .find(|r| r.get("number").and_then(|n| n.as_str()) == Some(number))
            .and_then(|r| r.get("value"))
            .and_then(|v| v.as_str())
    }
}
