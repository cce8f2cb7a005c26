//! CLI - reedline-based REPL interface
//!
//! Lines are tool calls in their positional form (`read_memory 0x20000000 16`)
//! plus a few short aliases and local commands.

use crate::debug::{Lifecycle, TargetStatus};
use crate::device::parse_hex_address;
use crate::tools::{ToolCall, ToolOutcome, ToolParseError, Toolbox};
use anyhow::Result;
use colored::Colorize;
use reedline::{Prompt, PromptHistorySearch, PromptHistorySearchStatus, Reedline, Signal};
use std::borrow::Cow;

/// Prompt showing the target state
pub struct AgentPrompt {
    status: TargetStatus,
}

impl AgentPrompt {
    pub fn new() -> Self {
        Self {
            status: TargetStatus::Disconnected,
        }
    }

    pub fn set_status(&mut self, status: TargetStatus) {
        self.status = status;
    }
}

impl Default for AgentPrompt {
    fn default() -> Self {
        Self::new()
    }
}

impl Prompt for AgentPrompt {
    fn render_prompt_left(&self) -> Cow<'_, str> {
        let status = match self.status {
            TargetStatus::Disconnected => "---",
            TargetStatus::Connected => "con",
            TargetStatus::Halted => "hlt",
            TargetStatus::Running => "run",
        };
        Cow::Owned(format!("[jtag:{}]", status))
    }

    fn render_prompt_right(&self) -> Cow<'_, str> {
        Cow::Borrowed("")
    }

    fn render_prompt_indicator(&self, _prompt_mode: reedline::PromptEditMode) -> Cow<'_, str> {
        Cow::Borrowed("> ")
    }

    fn render_prompt_multiline_indicator(&self) -> Cow<'_, str> {
        Cow::Borrowed("... ")
    }

    fn render_prompt_history_search_indicator(
        &self,
        history_search: PromptHistorySearch,
    ) -> Cow<'_, str> {
        let prefix = match history_search.status {
            PromptHistorySearchStatus::Passing => "",
            PromptHistorySearchStatus::Failing => "(failed) ",
        };
        Cow::Owned(format!("(search: {}{}) ", prefix, history_search.term))
    }
}

/// Command parsing result
#[derive(Debug, PartialEq, Eq)]
pub enum ParsedCommand {
    Tool(ToolCall),
    /// List the tool catalogue: tools
    Tools,
    /// Print the configured memory map: map
    MemoryMap,
    /// Help: ? or help
    Help,
    /// Quit: q or exit
    Quit,
}

/// Parse a REPL line, expanding aliases to their tool names
pub fn parse_command(input: &str) -> Result<ParsedCommand, ToolParseError> {
    let input = input.trim();
    let (cmd, rest) = input.split_once(char::is_whitespace).unwrap_or((input, ""));

    let tool = match cmd {
        "?" | "help" => return Ok(ParsedCommand::Help),
        "q" | "quit" | "exit" => return Ok(ParsedCommand::Quit),
        "tools" => return Ok(ParsedCommand::Tools),
        "map" => return Ok(ParsedCommand::MemoryMap),

        "si" | "stepi" => "step_instruction",
        "c" | "continue" => "continue_execution",
        "regs" | "dr" => "read_registers",
        "x" => "read_memory",
        "b" | "break" => "set_breakpoint",
        "bt" => "backtrace",
        "p" | "print" => "evaluate_expression",
        "info" => "describe",
        other => other,
    };

    ToolCall::parse_line(&format!("{} {}", tool, rest)).map(ParsedCommand::Tool)
}

fn print_help() {
    println!("{}", "JTAG Agent Commands".bold().cyan());
    println!("{}", "═".repeat(50).cyan());

    println!("\n{}", "Session:".bold().yellow());
    println!("  {}                      Launch emulator and debugger", "start".green());
    println!("  {}                    Relaunch, halted at entry", "restart".green());
    println!("  {}                 Shut everything down", "stop / status".green());

    println!("\n{}", "Execution:".bold().yellow());
    println!("  {}                         Step one instruction", "si".green());
    println!("  {}                          Continue", "c".green());
    println!("  {}                   Set breakpoint", "b <location>".green());
    println!("  {}                         Backtrace", "bt".green());

    println!("\n{}", "Data:".bold().yellow());
    println!("  {}                       Show registers", "regs".green());
    println!("  {}                 Set register", "write_register <r> <v>".green());
    println!("  {}             Read memory", "x <addr> <len>".green());
    println!("  {}  Write memory", "write_memory <addr> <v> [w]".green());
    println!("  {}                   Evaluate expression", "p <expr>".green());

    println!("\n{}", "Device:".bold().yellow());
    println!("  {}          Register at address", "resolve_address <addr>".green());
    println!("  {}     Peripheral or register info", "info <PERIPH[.REG]>".green());
    println!("  {}                        Memory map notes", "map".green());

    println!("\n{}", "Other:".bold().yellow());
    println!("  {}                      List all tools", "tools".green());
    println!("  {}                          Show this help", "?".green());
    println!("  {}                          Quit", "q".green());
}

fn print_tools() {
    for spec in ToolCall::catalogue() {
        let usage = std::iter::once(spec.name)
            .chain(spec.arguments.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");
        println!("  {:<40} {}", usage.green(), spec.description);
    }
}

/// Print an outcome for a human reader
pub fn print_outcome(outcome: &ToolOutcome) {
    match outcome {
        ToolOutcome::Message { message, .. } => println!("{} {}", "[*]".green(), message),
        ToolOutcome::Error { kind, message, raw } => {
            println!("{} {:?}: {}", "[!]".red(), kind, message);
            if let Some(raw) = raw {
                println!("    {}", raw.dimmed());
            }
        }
        ToolOutcome::Record { record } if !record.is_error() => {
            match (record.memory_bytes(), record.payload.get("memory")) {
                (Some(bytes), Some(memory)) => {
                    let base = memory
                        .items()
                        .first()
                        .and_then(|block| block.get("begin"))
                        .and_then(|begin| begin.as_str())
                        .and_then(|begin| parse_hex_address(begin).ok())
                        .unwrap_or(0);
                    for line in hex_dump(base, &bytes) {
                        println!("{}", line);
                    }
                }
                _ => print_json(outcome),
            }
        }
        other => print_json(other),
    }
}

fn print_json(outcome: &ToolOutcome) {
    match serde_json::to_string_pretty(outcome) {
        Ok(json) => println!("{}", json),
        Err(e) => println!("{} Cannot render outcome: {}", "[!]".red(), e),
    }
}

/// `address: bytes` lines, 16 bytes each
fn hex_dump(base: u64, bytes: &[u8]) -> Vec<String> {
    bytes
        .chunks(16)
        .enumerate()
        .map(|(i, chunk)| {
            let address = base.wrapping_add(i as u64 * 16);
            let grouped: Vec<String> = chunk.chunks(4).map(hex::encode).collect();
            format!("{}  {}", format!("{:#010x}", address).cyan(), grouped.join(" "))
        })
        .collect()
}

/// Run the REPL until `quit` or end of input
pub fn run_cli<S: Lifecycle>(toolbox: &mut Toolbox<S>, memory_map: Option<&str>) -> Result<()> {
    let mut line_editor = Reedline::create();
    let mut prompt = AgentPrompt::new();

    println!(
        "{}",
        "JTAG Agent - Type '?' for help, 'q' to quit".bold().cyan()
    );

    loop {
        prompt.set_status(toolbox.status());
        let sig = line_editor.read_line(&prompt)?;
        match sig {
            Signal::Success(buffer) => {
                let input = buffer.trim();
                if input.is_empty() {
                    continue;
                }

                match parse_command(input) {
                    Ok(ParsedCommand::Tool(call)) => print_outcome(&toolbox.invoke(call)),
                    Ok(ParsedCommand::Tools) => print_tools(),
                    Ok(ParsedCommand::MemoryMap) => match memory_map {
                        Some(map) => println!("{}", map),
                        None => println!("    {}", "(no [memory_map] configured)".dimmed()),
                    },
                    Ok(ParsedCommand::Help) => print_help(),
                    Ok(ParsedCommand::Quit) => break,
                    Err(e) => {
                        println!("{} {}", "[!]".red(), e);
                        println!("    Type '?' for help");
                    }
                }
            }
            Signal::CtrlD | Signal::CtrlC => {
                println!("\n[*] Interrupted");
                break;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aliases_expand_to_tools() {
        assert_eq!(
            parse_command("x 0x20000000 16").unwrap(),
            ParsedCommand::Tool(ToolCall::ReadMemory {
                address: "0x20000000".into(),
                length: 16
            })
        );
        assert_eq!(
            parse_command("b main").unwrap(),
            ParsedCommand::Tool(ToolCall::SetBreakpoint {
                location: "main".into()
            })
        );
        assert_eq!(
            parse_command("si").unwrap(),
            ParsedCommand::Tool(ToolCall::StepInstruction)
        );
        assert_eq!(
            parse_command("info RCC.CR").unwrap(),
            ParsedCommand::Tool(ToolCall::Describe {
                name: "RCC.CR".into()
            })
        );
    }

    #[test]
    fn test_local_commands() {
        assert_eq!(parse_command("?").unwrap(), ParsedCommand::Help);
        assert_eq!(parse_command(" quit ").unwrap(), ParsedCommand::Quit);
        assert_eq!(parse_command("map").unwrap(), ParsedCommand::MemoryMap);
        assert!(matches!(
            parse_command("disassemble"),
            Err(ToolParseError::UnknownTool(_))
        ));
    }

    #[test]
    fn test_hex_dump_rows() {
        colored::control::set_override(false);
        let bytes: Vec<u8> = (0u8..20).collect();
        assert_eq!(
            hex_dump(0x2000_0000, &bytes),
            [
                "0x20000000  00010203 04050607 08090a0b 0c0d0e0f",
                "0x20000010  10111213",
            ]
        );
    }

    #[test]
    fn test_prompt_reflects_status() {
        let mut prompt = AgentPrompt::new();
        assert_eq!(prompt.render_prompt_left(), "[jtag:---]");
        prompt.set_status(TargetStatus::Halted);
        assert_eq!(prompt.render_prompt_left(), "[jtag:hlt]");
    }
}
