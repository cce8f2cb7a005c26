//! Debug module - scripted control of an emulated target through GDB/MI.
//!
//! Layers, bottom up:
//! - `mi`: parser for the debugger's line-oriented output
//! - `protocol`: token-correlated request/response over a [`protocol::Transport`]
//! - `process` / `session`: emulator and debugger subprocess lifecycle
//! - `commands`: the named operation catalogue ([`TargetControl`])

pub mod commands;
pub mod image;
pub mod mi;
pub mod process;
pub mod protocol;
pub mod session;
pub mod types;


use std::io;
use std::time::Duration;
use thiserror::Error;

pub use commands::TargetControl;
pub use protocol::{ProtocolSession, Transport};
pub use session::{DebugSession, ReadyPolicy, SessionConfig};
pub use types::{AsyncEvent, CommandStatus, ResultRecord, TargetStatus};

/// Debug session errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("No debug session is running (start or restart it first)")]
    NotReady,

    #[error("'{command}' produced no result within {}ms", .waited.as_millis())]
    TimedOut { command: String, waited: Duration },

    #[error("Unparseable debugger output ({message}): {raw}")]
    Protocol { message: String, raw: String },

    #[error("Failed to connect to target: {message}")]
    Connect { message: String },

    #[error("Debugger bootstrap '{command}' failed: {message}")]
    Bootstrap { command: String, message: String },

    #[error("Debug port {address} not ready after {attempts} attempts: {last_error}")]
    PortTimeout {
        address: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Emulator exited during startup ({status})")]
    EmulatorExited { status: String },

    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Target binary {path}: {reason}")]
    Binary { path: String, reason: String },

    #[error("Failed to stop {what}: {reason}")]
    Teardown { what: &'static str, reason: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Debugger I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Carries one MI command to a debugger and returns its result record
pub trait Issue {
    fn issue(&mut self, command: &str) -> Result<ResultRecord, SessionError>;
}

/// Session lifecycle as seen by the tool contract
pub trait Lifecycle: Issue {
    /// Launch a session unless one is already live
    fn start(&mut self) -> Result<String, SessionError>;

    /// Tear down whatever is running and launch a fresh session
    fn restart(&mut self) -> Result<String, SessionError>;

    /// Tear everything down. A no-op when nothing is running.
    fn stop(&mut self) -> Result<(), SessionError>;

    fn status(&self) -> TargetStatus;
}
