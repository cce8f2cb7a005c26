//! Tool Contract - the closed set of operations an orchestrator may invoke.
//!
//! Calls arrive as [`ToolCall`] values (from JSON or a REPL line) and always
//! produce a [`ToolOutcome`]. Failures are data here: nothing below this layer
//! is allowed to abort the caller's loop.

#[cfg(test)]
mod tests;

use crate::debug::{DebugSession, Lifecycle, ResultRecord, SessionError, TargetControl, TargetStatus};
use crate::device::{Description, DeviceIndex, QueryError, Resolution};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bytes written by `write_memory` when no width is given
pub const DEFAULT_WIDTH: u8 = 4;

fn default_width() -> u8 {
    DEFAULT_WIDTH
}

/// One tool invocation with its typed arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum ToolCall {
    Start,
    Restart,
    Stop,
    Status,
    StepInstruction,
    ContinueExecution,
    ReadRegisters,
    ReadMemory {
        address: String,
        length: u64,
    },
    WriteMemory {
        address: String,
        value: String,
        #[serde(default = "default_width")]
        width: u8,
    },
    WriteRegister {
        register: String,
        value: String,
    },
    SetBreakpoint {
        location: String,
    },
    Backtrace,
    EvaluateExpression {
        expression: String,
    },
    ResolveAddress {
        address: String,
    },
    Describe {
        name: String,
    },
}

/// Catalogue entry advertised to the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ToolSpec {
    pub name: &'static str,
    /// Argument names in positional order; `?` marks an optional one
    pub arguments: &'static [&'static str],
    pub description: &'static str,
}

const CATALOGUE: &[ToolSpec] = &[
    ToolSpec {
        name: "start",
        arguments: &[],
        description: "Launch emulator and debugger unless already running",
    },
    ToolSpec {
        name: "restart",
        arguments: &[],
        description: "Tear down and relaunch; target halts at its entry point",
    },
    ToolSpec {
        name: "stop",
        arguments: &[],
        description: "Shut down debugger and emulator",
    },
    ToolSpec {
        name: "status",
        arguments: &[],
        description: "Report whether the target is connected, halted or running",
    },
    ToolSpec {
        name: "step_instruction",
        arguments: &[],
        description: "Execute one machine instruction",
    },
    ToolSpec {
        name: "continue_execution",
        arguments: &[],
        description: "Resume until the next breakpoint or stop",
    },
    ToolSpec {
        name: "read_registers",
        arguments: &[],
        description: "All CPU registers in hexadecimal",
    },
    ToolSpec {
        name: "read_memory",
        arguments: &["address", "length"],
        description: "Read `length` bytes at a hex address",
    },
    ToolSpec {
        name: "write_memory",
        arguments: &["address", "value", "width?"],
        description: "Write a 1/2/4/8-byte value (default 4) at a hex address",
    },
    ToolSpec {
        name: "write_register",
        arguments: &["register", "value"],
        description: "Set a CPU register by name or number",
    },
    ToolSpec {
        name: "set_breakpoint",
        arguments: &["location"],
        description: "Break at a function, file:line or *address",
    },
    ToolSpec {
        name: "backtrace",
        arguments: &[],
        description: "Current call stack",
    },
    ToolSpec {
        name: "evaluate_expression",
        arguments: &["expression"],
        description: "Evaluate a C expression in the current frame",
    },
    ToolSpec {
        name: "resolve_address",
        arguments: &["address"],
        description: "Name the peripheral register at a hex address",
    },
    ToolSpec {
        name: "describe",
        arguments: &["name"],
        description: "Describe PERIPHERAL or PERIPHERAL.REGISTER",
    },
];

/// Errors turning text into a [`ToolCall`]
#[derive(Error, Debug)]
pub enum ToolParseError {
    #[error("Empty command")]
    Empty,

    #[error("Unknown tool '{0}'")]
    UnknownTool(String),

    #[error("{tool}: missing argument '{argument}'")]
    MissingArgument {
        tool: &'static str,
        argument: &'static str,
    },

    #[error("{tool}: invalid {argument} '{value}'")]
    InvalidArgument {
        tool: &'static str,
        argument: &'static str,
        value: String,
    },

    #[error("{tool}: unexpected extra arguments '{extra}'")]
    TooManyArguments { tool: &'static str, extra: String },

    #[error("Malformed tool call: {0}")]
    Json(#[from] serde_json::Error),
}

impl ToolCall {
    /// Every tool, in a stable order
    pub fn catalogue() -> &'static [ToolSpec] {
        CATALOGUE
    }

    pub fn name(&self) -> &'static str {
        match self {
            ToolCall::Start => "start",
            ToolCall::Restart => "restart",
            ToolCall::Stop => "stop",
            ToolCall::Status => "status",
            ToolCall::StepInstruction => "step_instruction",
            ToolCall::ContinueExecution => "continue_execution",
            ToolCall::ReadRegisters => "read_registers",
            ToolCall::ReadMemory { .. } => "read_memory",
            ToolCall::WriteMemory { .. } => "write_memory",
            ToolCall::WriteRegister { .. } => "write_register",
            ToolCall::SetBreakpoint { .. } => "set_breakpoint",
            ToolCall::Backtrace => "backtrace",
            ToolCall::EvaluateExpression { .. } => "evaluate_expression",
            ToolCall::ResolveAddress { .. } => "resolve_address",
            ToolCall::Describe { .. } => "describe",
        }
    }

    /// Decode `{"tool": "...", ...}`
    pub fn from_json(text: &str) -> Result<Self, ToolParseError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Parse the REPL form: tool name, then whitespace-separated arguments.
    /// Free-text arguments (locations, expressions) take the rest of the line.
    pub fn parse_line(line: &str) -> Result<Self, ToolParseError> {
        let (name, rest) = next_word(line);
        if name.is_empty() {
            return Err(ToolParseError::Empty);
        }
        let spec = CATALOGUE
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| ToolParseError::UnknownTool(name.to_string()))?;
        let mut args = Arguments {
            tool: spec.name,
            rest,
        };

        let call = match spec.name {
            "start" => ToolCall::Start,
            "restart" => ToolCall::Restart,
            "stop" => ToolCall::Stop,
            "status" => ToolCall::Status,
            "step_instruction" => ToolCall::StepInstruction,
            "continue_execution" => ToolCall::ContinueExecution,
            "read_registers" => ToolCall::ReadRegisters,
            "backtrace" => ToolCall::Backtrace,
            "read_memory" => ToolCall::ReadMemory {
                address: args.word("address")?,
                length: args.number("length")?,
            },
            "write_memory" => ToolCall::WriteMemory {
                address: args.word("address")?,
                value: args.word("value")?,
                width: match args.optional_word() {
                    Some(width) => parse_number(&width)
                        .and_then(|w| u8::try_from(w).ok())
                        .ok_or(ToolParseError::InvalidArgument {
                            tool: args.tool,
                            argument: "width",
                            value: width,
                        })?,
                    None => DEFAULT_WIDTH,
                },
            },
            "write_register" => ToolCall::WriteRegister {
                register: args.word("register")?,
                value: args.word("value")?,
            },
            "set_breakpoint" => ToolCall::SetBreakpoint {
                location: args.remainder("location")?,
            },
            "evaluate_expression" => ToolCall::EvaluateExpression {
                expression: args.remainder("expression")?,
            },
            "resolve_address" => ToolCall::ResolveAddress {
                address: args.word("address")?,
            },
            "describe" => ToolCall::Describe {
                name: args.word("name")?,
            },
            other => return Err(ToolParseError::UnknownTool(other.to_string())),
        };

        args.finish()?;
        Ok(call)
    }
}

/// Positional argument cursor for [`ToolCall::parse_line`]
struct Arguments<'a> {
    tool: &'static str,
    rest: &'a str,
}

impl Arguments<'_> {
    fn optional_word(&mut self) -> Option<String> {
        let (word, rest) = next_word(self.rest);
        self.rest = rest;
        (!word.is_empty()).then(|| word.to_string())
    }

    fn word(&mut self, argument: &'static str) -> Result<String, ToolParseError> {
        self.optional_word().ok_or(ToolParseError::MissingArgument {
            tool: self.tool,
            argument,
        })
    }

    fn number(&mut self, argument: &'static str) -> Result<u64, ToolParseError> {
        let word = self.word(argument)?;
        parse_number(&word).ok_or(ToolParseError::InvalidArgument {
            tool: self.tool,
            argument,
            value: word,
        })
    }

    fn remainder(&mut self, argument: &'static str) -> Result<String, ToolParseError> {
        let text = self.rest.trim();
        self.rest = "";
        if text.is_empty() {
            return Err(ToolParseError::MissingArgument {
                tool: self.tool,
                argument,
            });
        }
        Ok(text.to_string())
    }

    fn finish(self) -> Result<(), ToolParseError> {
        let extra = self.rest.trim();
        if extra.is_empty() {
            Ok(())
        } else {
            Err(ToolParseError::TooManyArguments {
                tool: self.tool,
                extra: extra.to_string(),
            })
        }
    }
}

fn next_word(text: &str) -> (&str, &str) {
    let text = text.trim_start();
    match text.find(char::is_whitespace) {
        Some(end) => (&text[..end], &text[end..]),
        None => (text, ""),
    }
}

fn parse_number(text: &str) -> Option<u64> {
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

/// Failure categories reported to the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    SessionNotReady,
    Protocol,
    InvalidInput,
    TimedOut,
    Connection,
    Process,
    Io,
}

/// Structured result of one tool invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ToolOutcome {
    /// Debugger result record, including `^error` replies
    Record { record: ResultRecord },
    /// Lifecycle message with the resulting target state
    Message {
        message: String,
        status: TargetStatus,
    },
    Resolution { resolution: Resolution },
    Description { description: Description },
    Error {
        kind: ErrorKind,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        raw: Option<String>,
    },
}

impl ToolOutcome {
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        ToolOutcome::Error {
            kind,
            message: message.into(),
            raw: None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ToolOutcome::Error { .. })
    }
}

impl From<SessionError> for ToolOutcome {
    fn from(err: SessionError) -> Self {
        let message = err.to_string();
        let kind = match err {
            SessionError::NotReady => ErrorKind::SessionNotReady,
            SessionError::TimedOut { .. } => ErrorKind::TimedOut,
            SessionError::Protocol { raw, .. } => {
                return ToolOutcome::Error {
                    kind: ErrorKind::Protocol,
                    message,
                    raw: Some(raw),
                }
            }
            SessionError::Connect { .. } | SessionError::PortTimeout { .. } => ErrorKind::Connection,
            SessionError::Bootstrap { .. } | SessionError::Binary { .. } => ErrorKind::Configuration,
            SessionError::EmulatorExited { .. }
            | SessionError::Spawn { .. }
            | SessionError::Teardown { .. } => ErrorKind::Process,
            SessionError::InvalidInput(_) => ErrorKind::InvalidInput,
            SessionError::Io(_) => ErrorKind::Io,
        };
        ToolOutcome::error(kind, message)
    }
}

impl From<QueryError> for ToolOutcome {
    fn from(err: QueryError) -> Self {
        ToolOutcome::error(ErrorKind::InvalidInput, err.to_string())
    }
}

impl From<ToolParseError> for ToolOutcome {
    fn from(err: ToolParseError) -> Self {
        ToolOutcome::error(ErrorKind::InvalidInput, err.to_string())
    }
}

/// Dispatches [`ToolCall`]s to a session and an optional device index
pub struct Toolbox<S: Lifecycle = DebugSession> {
    session: S,
    index: Option<DeviceIndex>,
}

impl<S: Lifecycle> Toolbox<S> {
    pub fn new(session: S, index: Option<DeviceIndex>) -> Self {
        Self { session, index }
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }

    pub fn status(&self) -> TargetStatus {
        self.session.status()
    }

    /// Run one tool. Every failure is reported as [`ToolOutcome::Error`].
    pub fn invoke(&mut self, call: ToolCall) -> ToolOutcome {
        let name = call.name();
        log::debug!("Invoking tool {}", name);

        let outcome = match call {
            ToolCall::Start => self.lifecycle(S::start),
            ToolCall::Restart => self.lifecycle(S::restart),
            ToolCall::Stop => self.lifecycle(|s: &mut S| {
                s.stop().map(|()| "Environment stopped.".to_string())
            }),
            ToolCall::Status => ToolOutcome::Message {
                message: status_message(self.session.status()).into(),
                status: self.session.status(),
            },
            ToolCall::StepInstruction => record(self.session.step_instruction()),
            ToolCall::ContinueExecution => record(self.session.continue_execution()),
            ToolCall::ReadRegisters => record(self.session.read_registers()),
            ToolCall::ReadMemory { address, length } => {
                record(self.session.read_memory(&address, length))
            }
            ToolCall::WriteMemory {
                address,
                value,
                width,
            } => record(self.session.write_memory(&address, &value, width)),
            ToolCall::WriteRegister { register, value } => {
                record(self.session.write_register(&register, &value))
            }
            ToolCall::SetBreakpoint { location } => record(self.session.set_breakpoint(&location)),
            ToolCall::Backtrace => record(self.session.backtrace()),
            ToolCall::EvaluateExpression { expression } => {
                record(self.session.evaluate_expression(&expression))
            }
            ToolCall::ResolveAddress { address } => match self.device_index() {
                Ok(index) => match index.resolve_address(&address) {
                    Ok(resolution) => ToolOutcome::Resolution { resolution },
                    Err(e) => e.into(),
                },
                Err(outcome) => outcome,
            },
            ToolCall::Describe { name } => match self.device_index() {
                Ok(index) => match index.describe(&name) {
                    Ok(description) => ToolOutcome::Description { description },
                    Err(e) => e.into(),
                },
                Err(outcome) => outcome,
            },
        };

        if let ToolOutcome::Error { kind, message, .. } = &outcome {
            log::warn!("Tool {} failed ({:?}): {}", name, kind, message);
        }
        outcome
    }

    fn lifecycle<F>(&mut self, op: F) -> ToolOutcome
    where
        F: FnOnce(&mut S) -> Result<String, SessionError>,
    {
        match op(&mut self.session) {
            Ok(message) => ToolOutcome::Message {
                message,
                status: self.session.status(),
            },
            Err(e) => e.into(),
        }
    }

    fn device_index(&self) -> Result<&DeviceIndex, ToolOutcome> {
        self.index.as_ref().ok_or_else(|| {
            ToolOutcome::error(
                ErrorKind::Configuration,
                "No device description loaded (start with --svd <file>)",
            )
        })
    }
}

fn record(result: Result<ResultRecord, SessionError>) -> ToolOutcome {
    match result {
        Ok(record) => ToolOutcome::Record { record },
        Err(e) => e.into(),
    }
}

fn status_message(status: TargetStatus) -> &'static str {
    match status {
        TargetStatus::Disconnected => "No session running.",
        TargetStatus::Connected => "Target connected.",
        TargetStatus::Halted => "Target halted.",
        TargetStatus::Running => "Target running.",
    }
}
