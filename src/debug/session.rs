//! Debug session - owns the emulator and debugger for one target
//!
//! A [`DebugSession`] is an explicit object rather than ambient global state:
//! whoever holds it owns both subprocesses, and dropping it tears them down.

use super::image::TargetImage;
use super::mi;
use super::process::{self, ChildTransport, Emulator};
use super::protocol::{ProtocolSession, Timeouts};
use super::types::{ResultRecord, TargetStatus};
use super::{Issue, Lifecycle, SessionError};
use std::path::PathBuf;
use std::time::Duration;

/// Backoff schedule for waiting on the emulator's debug port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Total time allowed before giving up
    pub timeout: Duration,
}

impl Default for ReadyPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(1),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Everything needed to (re)launch a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Firmware image loaded into the debugger
    pub elf: PathBuf,
    /// Emulator command line
    pub emulator: Vec<String>,
    /// Debugger command line; must start GDB in MI mode
    pub debugger: Vec<String>,
    /// Where the emulator's remote debug stub listens
    pub host: String,
    pub port: u16,
    pub timeouts: Timeouts,
    pub ready: ReadyPolicy,
    /// How long a terminated process may take to exit before escalation
    pub teardown_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            elf: PathBuf::from("firmware/app.elf"),
            emulator: vec!["make".into(), "startqemu".into()],
            debugger: vec![
                "gdb-multiarch".into(),
                "-q".into(),
                "--interpreter=mi3".into(),
            ],
            host: "localhost".into(),
            port: 1234,
            timeouts: Timeouts::default(),
            ready: ReadyPolicy::default(),
            teardown_grace: Duration::from_secs(2),
        }
    }
}

/// One emulator + one debugger, treated as a single target session
pub struct DebugSession {
    config: SessionConfig,
    emulator: Option<Emulator>,
    protocol: Option<ProtocolSession<ChildTransport>>,
}

impl DebugSession {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            emulator: None,
            protocol: None,
        }
    }

    /// Whether the debugger is running and its pipes are open
    pub fn is_live(&self) -> bool {
        self.protocol.as_ref().is_some_and(ProtocolSession::is_open)
    }

    pub fn emulator_pid(&self) -> Option<u32> {
        self.emulator.as_ref().map(Emulator::pid)
    }

    pub fn debugger_pid(&self) -> Option<u32> {
        self.protocol
            .as_ref()
            .and_then(ProtocolSession::transport)
            .map(ChildTransport::pid)
    }

    fn launch(&mut self) -> Result<String, SessionError> {
        let image = TargetImage::inspect(&self.config.elf)?;

        let mut emulator = Emulator::spawn(&self.config.emulator)?;
        process::wait_for_port(
            &self.config.host,
            self.config.port,
            &self.config.ready,
            &mut emulator,
        )?;
        self.emulator = Some(emulator);

        let transport = ChildTransport::spawn(&self.config.debugger)?;
        let mut protocol = ProtocolSession::new(transport, self.config.timeouts);

        let load = format!(
            "-file-exec-and-symbols {}",
            mi::quote(&self.config.elf.to_string_lossy())
        );
        let record = protocol.issue(&load)?;
        if record.is_error() {
            return Err(SessionError::Bootstrap {
                command: load,
                message: failure_message(&record),
            });
        }

        let connect = format!("-target-select remote {}:{}", self.config.host, self.config.port);
        let record = protocol.issue(&connect)?;
        if record.is_error() {
            return Err(SessionError::Connect {
                message: failure_message(&record),
            });
        }

        let message = format!(
            "Environment restarted. Target halted at entry point ({:#x}).",
            image.entry_point
        );
        self.protocol = Some(protocol);
        Ok(message)
    }
}

impl Lifecycle for DebugSession {
    fn start(&mut self) -> Result<String, SessionError> {
        if self.is_live() {
            return Ok("Environment already running.".into());
        }
        self.restart()
    }

    fn restart(&mut self) -> Result<String, SessionError> {
        self.stop()?;

        match self.launch() {
            Ok(message) => {
                log::info!("{}", message);
                Ok(message)
            }
            Err(e) => {
                log::error!("Session launch failed: {}", e);
                if let Err(teardown) = self.stop() {
                    log::error!("Cleanup after failed launch: {}", teardown);
                }
                Err(e)
            }
        }
    }

    fn stop(&mut self) -> Result<(), SessionError> {
        if let Some(mut protocol) = self.protocol.take() {
            log::info!("Closing debugger session");
            protocol.close();
        }

        if let Some(emulator) = self.emulator.as_mut() {
            // stays tracked on failure so a later stop can retry
            emulator.terminate(self.config.teardown_grace)?;
            self.emulator = None;
        }
        Ok(())
    }

    fn status(&self) -> TargetStatus {
        self.protocol
            .as_ref()
            .filter(|p| p.is_open())
            .map(ProtocolSession::target_status)
            .unwrap_or_default()
    }
}

impl Issue for DebugSession {
    fn issue(&mut self, command: &str) -> Result<ResultRecord, SessionError> {
        self.protocol
            .as_mut()
            .ok_or(SessionError::NotReady)?
            .issue(command)
    }
}

impl Drop for DebugSession {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::error!("Failed to tear down debug session: {}", e);
        }
    }
}

fn failure_message(record: &ResultRecord) -> String {
    record
        .error_message()
        .map(str::to_string)
        .unwrap_or_else(|| format!("{:?}", record.class))
}
