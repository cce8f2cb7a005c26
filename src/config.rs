//! Agent configuration - `jtag-agent.toml`
//!
//! Every key is optional; a missing file means all defaults. Durations are
//! given in milliseconds.

use crate::debug::protocol::Timeouts;
use crate::debug::{ReadyPolicy, SessionConfig};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Looked up in the working directory when no `--config` is given
pub const DEFAULT_CONFIG_FILE: &str = "jtag-agent.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    pub session: SessionSection,
    pub device: DeviceSection,
    /// Free-form memory layout notes handed to the orchestrator as text
    pub memory_map: toml::Table,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionSection {
    pub elf: PathBuf,
    pub emulator: Vec<String>,
    pub debugger: Vec<String>,
    pub host: String,
    pub port: u16,
    pub command_timeout_ms: u64,
    pub stop_wait_ms: u64,
    pub ready_timeout_ms: u64,
    pub teardown_grace_ms: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        let defaults = SessionConfig::default();
        Self {
            elf: defaults.elf,
            emulator: defaults.emulator,
            debugger: defaults.debugger,
            host: defaults.host,
            port: defaults.port,
            command_timeout_ms: millis(defaults.timeouts.command),
            stop_wait_ms: millis(defaults.timeouts.stop_wait),
            ready_timeout_ms: millis(defaults.ready.timeout),
            teardown_grace_ms: millis(defaults.teardown_grace),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceSection {
    /// CMSIS-SVD description of the target; optional at runtime
    pub svd: PathBuf,
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            svd: PathBuf::from("firmware/device.svd"),
        }
    }
}

impl AgentConfig {
    /// Load `path`, or `jtag-agent.toml` if present, or fall back to defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))
            }
            None => {
                log::debug!("No {} found, using defaults", DEFAULT_CONFIG_FILE);
                Ok(Self::default())
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config =
            Self::from_toml(&text).with_context(|| format!("loading config {}", path.display()))?;
        log::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).context("parsing TOML")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let s = &self.session;
        if s.emulator.is_empty() {
            bail!("session.emulator must name a program");
        }
        if s.debugger.is_empty() {
            bail!("session.debugger must name a program");
        }
        if s.port == 0 {
            bail!("session.port must be non-zero");
        }
        if s.command_timeout_ms == 0 || s.ready_timeout_ms == 0 {
            bail!("session timeouts must be non-zero");
        }
        Ok(())
    }

    /// Build the launch parameters for a [`crate::debug::DebugSession`]
    pub fn session_config(&self) -> SessionConfig {
        let s = &self.session;
        SessionConfig {
            elf: s.elf.clone(),
            emulator: s.emulator.clone(),
            debugger: s.debugger.clone(),
            host: s.host.clone(),
            port: s.port,
            timeouts: Timeouts {
                command: Duration::from_millis(s.command_timeout_ms),
                stop_wait: Duration::from_millis(s.stop_wait_ms),
            },
            ready: ReadyPolicy {
                timeout: Duration::from_millis(s.ready_timeout_ms),
                ..ReadyPolicy::default()
            },
            teardown_grace: Duration::from_millis(s.teardown_grace_ms),
        }
    }

    /// `[memory_map]` rendered back to TOML, or `None` when empty
    pub fn memory_map_text(&self) -> Option<String> {
        if self.memory_map.is_empty() {
            return None;
        }
        toml::to_string_pretty(&self.memory_map).ok()
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_config_is_default() {
        let config = AgentConfig::from_toml("").unwrap();
        assert_eq!(config, AgentConfig::default());
        assert_eq!(config.session_config(), SessionConfig::default());
        assert!(config.memory_map_text().is_none());
    }

    #[test]
    fn test_partial_session_overrides() {
        let config = AgentConfig::from_toml(
            r#"
            [session]
            elf = "build/blinky.elf"
            port = 3333
            command_timeout_ms = 500

            [device]
            svd = "svd/STM32F303.svd"
            "#,
        )
        .unwrap();
        let session = config.session_config();
        assert_eq!(session.elf, PathBuf::from("build/blinky.elf"));
        assert_eq!(session.port, 3333);
        assert_eq!(session.timeouts.command, Duration::from_millis(500));
        assert_eq!(session.timeouts.stop_wait, Duration::from_secs(2));
        assert_eq!(session.emulator, ["make", "startqemu"]);
        assert_eq!(config.device.svd, PathBuf::from("svd/STM32F303.svd"));
    }

    #[test]
    fn test_memory_map_round_trips_as_text() {
        let config = AgentConfig::from_toml(
            r#"
            [memory_map.flash]
            base = "0x08000000"
            size = "256K"

            [memory_map.sram]
            base = "0x20000000"
            size = "40K"
            "#,
        )
        .unwrap();
        let text = config.memory_map_text().unwrap();
        assert!(text.contains("[flash]"));
        assert!(text.contains("base = \"0x20000000\""));
    }

    #[test]
    fn test_rejects_unknown_keys_and_bad_values() {
        assert!(AgentConfig::from_toml("[session]\nprot = 1234").is_err());
        assert!(AgentConfig::from_toml("[session]\nport = 0").is_err());
        assert!(AgentConfig::from_toml("[session]\nemulator = []").is_err());
        assert!(AgentConfig::from_toml("[session]\nport = \"1234\"").is_err());
    }

    #[test]
    fn test_from_file_reports_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[session]\nport = 0").unwrap();
        let err = AgentConfig::from_file(file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("session.port must be non-zero"));
        assert!(err.to_string().contains(&file.path().display().to_string()));

        assert!(AgentConfig::from_file(Path::new("/nonexistent/jtag-agent.toml")).is_err());
    }
}
