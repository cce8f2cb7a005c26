//! Command API - the named operations a caller may issue against the target.
//!
//! Each operation validates its arguments and maps onto exactly one MI
//! command (numeric register ids cost one extra lookup). Payloads are returned
//! untouched; interpreting them is the caller's job.

use super::mi;
use super::types::ResultRecord;
use super::{Issue, SessionError};
use crate::device::parse_hex_address;

type Result<T> = std::result::Result<T, SessionError>;

/// Operation catalogue, available on anything that can [`Issue`] commands
pub trait TargetControl: Issue {
    /// Execute exactly one machine instruction
    fn step_instruction(&mut self) -> Result<ResultRecord> {
        self.issue("-exec-next-instruction")
    }

    /// Resume until the next stop event
    fn continue_execution(&mut self) -> Result<ResultRecord> {
        self.issue("-exec-continue")
    }

    /// All general-purpose registers, hexadecimal
    fn read_registers(&mut self) -> Result<ResultRecord> {
        self.issue("-data-list-register-values x")
    }

    /// Read `length` bytes starting at a hex `address`
    fn read_memory(&mut self, address: &str, length: u64) -> Result<ResultRecord> {
        let address = hex_address(address)?;
        if length == 0 {
            return Err(SessionError::InvalidInput("length must be at least 1".into()));
        }
        self.issue(&format!("-data-read-memory-bytes {:#x} {}", address, length))
    }

    /// Store a `width`-byte scalar at `address`.
    ///
    /// Goes through the console `set` command; the structured MI memory write
    /// is unreliable on remote targets.
    fn write_memory(&mut self, address: &str, value: &str, width: u8) -> Result<ResultRecord> {
        let address = hex_address(address)?;
        let c_type = c_type_for_width(width)?;
        let value = scalar(value, Some(width))?;

        let console = format!("set *({} *) {:#x} = {}", c_type, address, value);
        self.issue(&format!("-interpreter-exec console {}", mi::quote(&console)))
    }

    /// Set a CPU register by name (`r0`, `pc`) or number
    fn write_register(&mut self, register: &str, value: &str) -> Result<ResultRecord> {
        let value = scalar(value, None)?;
        let name = register_name(self, register)?;
        self.issue(&format!("-gdb-set ${}={}", name, value))
    }

    /// Break at a symbol, `file:line`, or `*address`
    fn set_breakpoint(&mut self, location: &str) -> Result<ResultRecord> {
        let location = single_line(location, "location")?;
        let location = if location.contains(char::is_whitespace) || location.contains('"') {
            mi::quote(location)
        } else {
            location.to_string()
        };
        self.issue(&format!("-break-insert {}", location))
    }

    /// Frames of the current call stack
    fn backtrace(&mut self) -> Result<ResultRecord> {
        self.issue("-stack-list-frames")
    }

    /// Evaluate a source-level expression in the current frame
    fn evaluate_expression(&mut self, expression: &str) -> Result<ResultRecord> {
        let expression = single_line(expression, "expression")?;
        self.issue(&format!("-data-evaluate-expression {}", mi::quote(expression)))
    }
}

impl<T: Issue + ?Sized> TargetControl for T {}

fn hex_address(address: &str) -> Result<u64> {
    parse_hex_address(address).map_err(|e| SessionError::InvalidInput(e.to_string()))
}

fn c_type_for_width(width: u8) -> Result<&'static str> {
    match width {
        1 => Ok("unsigned char"),
        2 => Ok("unsigned short"),
        4 => Ok("unsigned int"),
        8 => Ok("unsigned long long"),
        other => Err(SessionError::InvalidInput(format!(
            "width must be 1, 2, 4 or 8 bytes, got {}",
            other
        ))),
    }
}

/// Validate a hex (`0x..`) or decimal literal, optionally bounded by `width` bytes
fn scalar(value: &str, width: Option<u8>) -> Result<String> {
    let value = value.trim();
    let invalid = || SessionError::InvalidInput(format!("invalid value '{}'", value));

    let parsed = if let Some(hex) = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        if hex.is_empty() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        u64::from_str_radix(hex, 16).map_err(|_| invalid())?
    } else if let Some(neg) = value.strip_prefix('-') {
        let magnitude: u64 = neg.parse().map_err(|_| invalid())?;
        if magnitude > i64::MAX as u64 + 1 {
            return Err(invalid());
        }
        return Ok(value.to_string());
    } else {
        if value.is_empty() || !value.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        value.parse::<u64>().map_err(|_| invalid())?
    };

    if let Some(width) = width.filter(|w| *w < 8) {
        let max = (1u64 << (u32::from(width) * 8)) - 1;
        if parsed > max {
            return Err(SessionError::InvalidInput(format!(
                "value {} does not fit in {} byte(s)",
                value, width
            )));
        }
    }
    Ok(value.to_string())
}

/// Resolve a register id to the lower-case name GDB expects
fn register_name<I: Issue + ?Sized>(session: &mut I, register: &str) -> Result<String> {
    let register = register.trim().trim_start_matches('$');
    if register.is_empty() {
        return Err(SessionError::InvalidInput("empty register name".into()));
    }

    if let Ok(number) = register.parse::<usize>() {
        let record = session.issue("-data-list-register-names")?;
        let name = record
            .payload
            .get("register-names")
            .map(|names| names.items())
            .and_then(|names| names.get(number).and_then(|n| n.as_str()).map(str::to_string))
            .filter(|name| !name.is_empty());
        return name.ok_or_else(|| {
            SessionError::InvalidInput(format!("no register with number {}", number))
        });
    }

    if !register.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(SessionError::InvalidInput(format!(
            "invalid register name '{}'",
            register
        )));
    }
    Ok(register.to_ascii_lowercase())
}

fn single_line<'a>(arg: &'a str, what: &str) -> Result<&'a str> {
    let arg = arg.trim();
    if arg.is_empty() {
        return Err(SessionError::InvalidInput(format!("empty {}", what)));
    }
    if arg.contains(['\n', '\r']) {
        return Err(SessionError::InvalidInput(format!(
            "{} must be a single line",
            what
        )));
    }
    Ok(arg)
}
