//! GDB/MI output parser
//!
//! Turns one line of debugger output into a [`Record`]. Grammar (simplified
//! from the GDB manual):
//!
//! ```text
//! line    = [token] ("^" | "*" | "+" | "=") class ("," result)*
//!         | ("~" | "@" | "&") c-string
//!         | "(gdb)"
//! result  = variable "=" value
//! value   = c-string | "{" [result ("," result)*] "}"
//!         | "[" [value ("," value)* | result ("," result)*] "]"
//! ```

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use thiserror::Error;

/// A value inside an MI record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MiValue {
    Const(String),
    Tuple(MiTuple),
    List(Vec<MiValue>),
    /// `[name=value,...]`, e.g. `stack=[frame={...},frame={...}]`
    ResultList(Vec<(String, MiValue)>),
}

impl MiValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MiValue::Const(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&MiTuple> {
        match self {
            MiValue::Tuple(t) => Some(t),
            _ => None,
        }
    }

    /// Elements of a list, whichever form it was written in
    pub fn items(&self) -> Vec<&MiValue> {
        match self {
            MiValue::List(values) => values.iter().collect(),
            MiValue::ResultList(results) => results.iter().map(|(_, v)| v).collect(),
            _ => Vec::new(),
        }
    }

    /// Look up `key` when this value is a tuple
    pub fn get(&self, key: &str) -> Option<&MiValue> {
        self.as_tuple().and_then(|t| t.get(key))
    }
}

impl Serialize for MiValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            MiValue::Const(s) => serializer.serialize_str(s),
            MiValue::Tuple(t) => t.serialize(serializer),
            MiValue::List(values) => {
                let mut seq = serializer.serialize_seq(Some(values.len()))?;
                for v in values {
                    seq.serialize_element(v)?;
                }
                seq.end()
            }
            MiValue::ResultList(results) => {
                let mut seq = serializer.serialize_seq(Some(results.len()))?;
                for (name, value) in results {
                    seq.serialize_element(&Single(name, value))?;
                }
                seq.end()
            }
        }
    }
}

struct Single<'a>(&'a str, &'a MiValue);

impl Serialize for Single<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(self.0, self.1)?;
        map.end()
    }
}

/// Ordered `name=value` pairs. Keys may repeat.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MiTuple(pub Vec<(String, MiValue)>);

impl MiTuple {
    pub fn get(&self, key: &str) -> Option<&MiValue> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(MiValue::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for MiTuple {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// Result class of a `^` record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultClass {
    Done,
    Running,
    Connected,
    Error,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AsyncKind {
    /// `*` execution state changes (`*stopped`, `*running`)
    Exec,
    /// `+` progress
    Status,
    /// `=` supplementary notifications
    Notify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Console,
    Target,
    Log,
}

/// One parsed output line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Result {
        token: Option<u64>,
        class: ResultClass,
        results: MiTuple,
    },
    Async {
        token: Option<u64>,
        kind: AsyncKind,
        class: String,
        results: MiTuple,
    },
    Stream {
        kind: StreamKind,
        text: String,
    },
    Prompt,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} at column {position}")]
pub struct MiParseError {
    pub position: usize,
    pub message: String,
}

/// Parse a single line of MI output (without its line terminator)
pub fn parse_line(line: &str) -> Result<Record, MiParseError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim_end() == "(gdb)" {
        return Ok(Record::Prompt);
    }

    let mut p = Parser::new(line);
    let token = p.token();

    let Some(marker) = p.bump() else {
        return Err(p.error("empty record"));
    };

    let record = match marker {
        b'~' | b'@' | b'&' => {
            let kind = match marker {
                b'~' => StreamKind::Console,
                b'@' => StreamKind::Target,
                _ => StreamKind::Log,
            };
            Record::Stream {
                kind,
                text: p.c_string()?,
            }
        }
        b'^' => {
            let class = match p.class() {
                "done" => ResultClass::Done,
                "running" => ResultClass::Running,
                "connected" => ResultClass::Connected,
                "error" => ResultClass::Error,
                "exit" => ResultClass::Exit,
                other => return Err(p.error(&format!("unknown result class '{}'", other))),
            };
            Record::Result {
                token,
                class,
                results: p.trailing_results()?,
            }
        }
        b'*' | b'+' | b'=' => {
            let kind = match marker {
                b'*' => AsyncKind::Exec,
                b'+' => AsyncKind::Status,
                _ => AsyncKind::Notify,
            };
            let class = p.class().to_string();
            if class.is_empty() {
                return Err(p.error("missing async class"));
            }
            Record::Async {
                token,
                kind,
                class,
                results: p.trailing_results()?,
            }
        }
        _ => return Err(p.error("not an MI record")),
    };

    if !p.at_end() {
        return Err(p.error("trailing characters"));
    }
    Ok(record)
}

/// Quote `s` as an MI c-string
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            _ => out.push(ch),
        }
    }
    out.push('"');
    out
}

struct Parser<'a> {
    bytes: &'a [u8],
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            bytes: src.as_bytes(),
            src,
            pos: 0,
        }
    }

    fn error(&self, message: &str) -> MiParseError {
        MiParseError {
            position: self.pos,
            message: message.to_string(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn expect(&mut self, b: u8) -> Result<(), MiParseError> {
        if self.peek() == Some(b) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", b as char)))
        }
    }

    fn take_while(&mut self, pred: impl Fn(u8) -> bool) -> &'a str {
        let start = self.pos;
        while self.peek().is_some_and(&pred) {
            self.pos += 1;
        }
        &self.src[start..self.pos]
    }

    fn token(&mut self) -> Option<u64> {
        let digits = self.take_while(|b| b.is_ascii_digit());
        digits.parse().ok()
    }

    fn class(&mut self) -> &'a str {
        self.take_while(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    }

    fn trailing_results(&mut self) -> Result<MiTuple, MiParseError> {
        let mut results = Vec::new();
        while self.peek() == Some(b',') {
            self.pos += 1;
            results.push(self.result()?);
        }
        Ok(MiTuple(results))
    }

    fn result(&mut self) -> Result<(String, MiValue), MiParseError> {
        let name = self.take_while(|b| b != b'=' && b != b',' && b != b'}' && b != b']');
        if name.is_empty() {
            return Err(self.error("expected variable name"));
        }
        let name = name.to_string();
        self.expect(b'=')?;
        Ok((name, self.value()?))
    }

    fn value(&mut self) -> Result<MiValue, MiParseError> {
        match self.peek() {
            Some(b'"') => Ok(MiValue::Const(self.c_string()?)),
            Some(b'{') => {
                self.pos += 1;
                let mut results = Vec::new();
                if self.peek() != Some(b'}') {
                    loop {
                        results.push(self.result()?);
                        if self.peek() == Some(b',') {
                            self.pos += 1;
                        } else {
                            break;
                        }
                    }
                }
                self.expect(b'}')?;
                Ok(MiValue::Tuple(MiTuple(results)))
            }
            Some(b'[') => {
                self.pos += 1;
                if self.peek() == Some(b']') {
                    self.pos += 1;
                    return Ok(MiValue::List(Vec::new()));
                }
                let value = if matches!(self.peek(), Some(b'"' | b'{' | b'[')) {
                    let mut values = vec![self.value()?];
                    while self.peek() == Some(b',') {
                        self.pos += 1;
                        values.push(self.value()?);
                    }
                    MiValue::List(values)
                } else {
                    let mut results = vec![self.result()?];
                    while self.peek() == Some(b',') {
                        self.pos += 1;
                        results.push(self.result()?);
                    }
                    MiValue::ResultList(results)
                };
                self.expect(b']')?;
                Ok(value)
            }
            _ => Err(self.error("expected value")),
        }
    }

    fn c_string(&mut self) -> Result<String, MiParseError> {
        self.expect(b'"')?;
        let mut out = Vec::new();
        loop {
            let Some(b) = self.bump() else {
                return Err(self.error("unterminated string"));
            };
            match b {
                b'"' => break,
                b'\\' => {
                    let Some(esc) = self.bump() else {
                        return Err(self.error("unterminated escape"));
                    };
                    match esc {
                        b'n' => out.push(b'\n'),
                        b't' => out.push(b'\t'),
                        b'r' => out.push(b'\r'),
                        b'a' => out.push(0x07),
                        b'b' => out.push(0x08),
                        b'f' => out.push(0x0c),
                        b'v' => out.push(0x0b),
                        b'e' => out.push(0x1b),
                        b'0'..=b'7' => {
                            // up to three octal digits
                            let mut value = u32::from(esc - b'0');
                            for _ in 0..2 {
                                match self.peek() {
                                    Some(d @ b'0'..=b'7') => {
                                        value = value * 8 + u32::from(d - b'0');
                                        self.pos += 1;
                                    }
                                    _ => break,
                                }
                            }
                            out.push(value as u8);
                        }
                        other => out.push(other),
                    }
                }
                other => out.push(other),
            }
        }
        Ok(String::from_utf8_lossy(&out).into_owned())
    }
}
