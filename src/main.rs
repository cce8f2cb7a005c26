//! jtag-agent - emulator + GDB session driver
//!
//! Entry point: loads configuration and the device description, then serves
//! the tool contract either as an interactive REPL or as JSON lines.

use anyhow::Result;
use clap::Parser;
use jtag_agent::debug::Lifecycle;
use jtag_agent::ui::{cli, json};
use jtag_agent::{AgentConfig, DebugSession, DeviceIndex, ToolCall, Toolbox};
use std::io;
use std::path::PathBuf;

/// JTAG Agent: drive an emulated target through GDB/MI
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (default: ./jtag-agent.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Firmware ELF to debug
    #[arg(long)]
    elf: Option<PathBuf>,

    /// CMSIS-SVD device description
    #[arg(long)]
    svd: Option<PathBuf>,

    /// Emulator debug port
    #[arg(short, long)]
    port: Option<u16>,

    /// Read JSON tool calls from stdin, one per line
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Print the tool catalogue as JSON and exit
    #[arg(long, default_value_t = false)]
    list_tools: bool,

    /// Do not launch the session at startup
    #[arg(long, default_value_t = false)]
    no_start: bool,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(
        match args.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        },
    ))
    .init();

    if args.list_tools {
        println!("{}", serde_json::to_string_pretty(ToolCall::catalogue())?);
        return Ok(());
    }

    let mut config = AgentConfig::load(args.config.as_deref())?;
    if let Some(elf) = args.elf {
        config.session.elf = elf;
    }
    if let Some(svd) = args.svd {
        config.device.svd = svd;
    }
    if let Some(port) = args.port {
        config.session.port = port;
    }

    let index = load_index(&config);
    let session = DebugSession::new(config.session_config());
    let mut toolbox = Toolbox::new(session, index);

    if !args.no_start {
        match toolbox.session_mut().start() {
            Ok(message) => log::info!("{}", message),
            // keep serving; the caller can fix things and `restart`
            Err(e) => log::error!("Initial start failed: {}", e),
        }
    }

    if args.json {
        let handled = json::run_json(&mut toolbox, io::stdin().lock(), io::stdout().lock())?;
        log::info!("Handled {} tool calls", handled);
    } else {
        println!("[*] jtag-agent v{}", env!("CARGO_PKG_VERSION"));
        cli::run_cli(&mut toolbox, config.memory_map_text().as_deref())?;
    }

    toolbox.session_mut().stop()?;
    Ok(())
}

/// Missing or broken SVD files leave the register tools unavailable
fn load_index(config: &AgentConfig) -> Option<DeviceIndex> {
    let path = &config.device.svd;
    if !path.is_file() {
        log::warn!(
            "SVD file not found at {}; register lookup tools are disabled",
            path.display()
        );
        return None;
    }
    match DeviceIndex::from_file(path) {
        Ok(index) => Some(index),
        Err(e) => {
            log::warn!("Failed to load SVD {}: {}", path.display(), e);
            None
        }
    }
}
