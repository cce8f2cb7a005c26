//! jtag-agent - scripted debugging of emulated embedded targets
//!
//! Drives an emulator and a GDB/MI debugger as one session, answers
//! questions about the device's memory-mapped registers from its CMSIS-SVD
//! description, and exposes both through a closed tool contract for an
//! automated orchestrator.

pub mod config;
pub mod debug;
pub mod device;
pub mod tools;
pub mod ui;

pub use config::AgentConfig;
pub use debug::{DebugSession, SessionConfig, SessionError, TargetControl};
pub use device::{DeviceError, DeviceIndex, QueryError};
pub use tools::{ErrorKind, ToolCall, ToolOutcome, Toolbox};
