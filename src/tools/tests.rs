//! Tool dispatch tests against an in-memory session.

use super::*;
use crate::debug::mi::{MiTuple, MiValue, ResultClass};
use crate::debug::{CommandStatus, Issue};
use std::time::Duration;

const SVD: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<device>
  <name>MINI</name>
  <peripherals>
    <peripheral>
      <name>GPIOA</name>
      <description>General-purpose I/Os</description>
      <baseAddress>0x48000000</baseAddress>
      <registers>
        <register>
          <name>MODER</name>
          <description>GPIO port mode register</description>
          <addressOffset>0x0</addressOffset>
        </register>
        <register>
          <name>ODR</name>
          <description>GPIO port output data register</description>
          <addressOffset>0x14</addressOffset>
        </register>
      </registers>
    </peripheral>
  </peripherals>
</device>"#;

/// Session double: records every command and answers `^done`
#[derive(Default)]
struct FakeSession {
    live: bool,
    launches: u32,
    commands: Vec<String>,
}

impl Issue for FakeSession {
    fn issue(&mut self, command: &str) -> Result<ResultRecord, SessionError> {
        if !self.live {
            return Err(SessionError::NotReady);
        }
        self.commands.push(command.to_string());
        let payload = MiTuple(vec![("echo".into(), MiValue::Const(command.into()))]);
        Ok(ResultRecord::new(
            self.commands.len() as u64,
            ResultClass::Done,
            payload,
            Vec::new(),
            0,
            Vec::new(),
        ))
    }
}

impl Lifecycle for FakeSession {
    fn start(&mut self) -> Result<String, SessionError> {
        if self.live {
            return Ok("Environment already running.".into());
        }
        self.restart()
    }

    fn restart(&mut self) -> Result<String, SessionError> {
        self.live = true;
        self.launches += 1;
        Ok("Environment restarted. Target halted at entry point (0x8000101).".into())
    }

    fn stop(&mut self) -> Result<(), SessionError> {
        self.live = false;
        Ok(())
    }

    fn status(&self) -> TargetStatus {
        if self.live {
            TargetStatus::Halted
        } else {
            TargetStatus::Disconnected
        }
    }
}

fn toolbox() -> Toolbox<FakeSession> {
    let index = DeviceIndex::from_svd(SVD).unwrap();
    Toolbox::new(FakeSession::default(), Some(index))
}

fn error_kind(outcome: &ToolOutcome) -> Option<ErrorKind> {
    match outcome {
        ToolOutcome::Error { kind, .. } => Some(*kind),
        _ => None,
    }
}

#[test]
fn test_catalogue_matches_call_names() {
    let names: Vec<&str> = ToolCall::catalogue().iter().map(|s| s.name).collect();
    assert_eq!(names.len(), 15);
    for spec in ToolCall::catalogue() {
        // every advertised tool parses from its bare name plus placeholder args
        let args: Vec<&str> = spec
            .arguments
            .iter()
            .filter(|a| !a.ends_with('?'))
            .map(|a| match *a {
                "length" => "4",
                "address" => "0x20000000",
                _ => "x",
            })
            .collect();
        let line = format!("{} {}", spec.name, args.join(" "));
        let call = ToolCall::parse_line(&line).unwrap();
        assert_eq!(call.name(), spec.name);
    }
}

#[test]
fn test_parse_line_arguments() {
    assert_eq!(
        ToolCall::parse_line("read_memory 0x20000000 0x10").unwrap(),
        ToolCall::ReadMemory {
            address: "0x20000000".into(),
            length: 16
        }
    );
    assert_eq!(
        ToolCall::parse_line("write_memory 0x20000000 0xAA55").unwrap(),
        ToolCall::WriteMemory {
            address: "0x20000000".into(),
            value: "0xAA55".into(),
            width: DEFAULT_WIDTH
        }
    );
    assert_eq!(
        ToolCall::parse_line("  evaluate_expression  buf[i] + 1 ").unwrap(),
        ToolCall::EvaluateExpression {
            expression: "buf[i] + 1".into()
        }
    );
    assert_eq!(
        ToolCall::parse_line("set_breakpoint main.c:42").unwrap(),
        ToolCall::SetBreakpoint {
            location: "main.c:42".into()
        }
    );
}

#[test]
fn test_parse_line_errors() {
    assert!(matches!(ToolCall::parse_line("   "), Err(ToolParseError::Empty)));
    assert!(matches!(
        ToolCall::parse_line("reboot"),
        Err(ToolParseError::UnknownTool(t)) if t == "reboot"
    ));
    assert!(matches!(
        ToolCall::parse_line("read_memory 0x0"),
        Err(ToolParseError::MissingArgument { argument: "length", .. })
    ));
    assert!(matches!(
        ToolCall::parse_line("read_memory 0x0 lots"),
        Err(ToolParseError::InvalidArgument { argument: "length", .. })
    ));
    assert!(matches!(
        ToolCall::parse_line("write_memory 0x0 1 300"),
        Err(ToolParseError::InvalidArgument { argument: "width", .. })
    ));
    assert!(matches!(
        ToolCall::parse_line("status now"),
        Err(ToolParseError::TooManyArguments { .. })
    ));
}

#[test]
fn test_json_calls() {
    let call = ToolCall::from_json(r#"{"tool":"read_memory","address":"0x20000000","length":16}"#)
        .unwrap();
    assert_eq!(
        call,
        ToolCall::ReadMemory {
            address: "0x20000000".into(),
            length: 16
        }
    );
    let call = ToolCall::from_json(r#"{"tool":"write_memory","address":"0x0","value":"1"}"#).unwrap();
    assert!(matches!(call, ToolCall::WriteMemory { width: 4, .. }));
    assert_eq!(
        ToolCall::from_json(r#"{"tool":"status"}"#).unwrap(),
        ToolCall::Status
    );

    assert!(ToolCall::from_json(r#"{"tool":"format_disk"}"#).is_err());
    assert!(ToolCall::from_json(r#"{"tool":"read_memory","address":"0x0"}"#).is_err());
    assert!(ToolCall::from_json("not json").is_err());
}

#[test]
fn test_commands_before_start_are_not_ready() {
    let mut tools = toolbox();
    let outcome = tools.invoke(ToolCall::ReadRegisters);
    assert_eq!(error_kind(&outcome), Some(ErrorKind::SessionNotReady));

    let json = serde_json::to_value(&outcome).unwrap();
    assert_eq!(json["outcome"], "error");
    assert_eq!(json["kind"], "session_not_ready");
    assert!(json.get("raw").is_none());
}

#[test]
fn test_lifecycle_messages() {
    let mut tools = toolbox();
    assert_eq!(
        tools.invoke(ToolCall::Status),
        ToolOutcome::Message {
            message: "No session running.".into(),
            status: TargetStatus::Disconnected
        }
    );

    let started = tools.invoke(ToolCall::Start);
    assert!(matches!(
        &started,
        ToolOutcome::Message { message, status: TargetStatus::Halted } if message.starts_with("Environment restarted")
    ));
    assert!(matches!(
        tools.invoke(ToolCall::Start),
        ToolOutcome::Message { message, .. } if message == "Environment already running."
    ));
    tools.invoke(ToolCall::Restart);
    assert_eq!(tools.session().launches, 2);

    assert_eq!(
        tools.invoke(ToolCall::Stop),
        ToolOutcome::Message {
            message: "Environment stopped.".into(),
            status: TargetStatus::Disconnected
        }
    );
}

#[test]
fn test_target_commands_dispatch() {
    let mut tools = toolbox();
    tools.invoke(ToolCall::Start);

    let outcome = tools.invoke(ToolCall::ReadMemory {
        address: "0x20000000".into(),
        length: 8,
    });
    let ToolOutcome::Record { record } = outcome else {
        panic!("expected a record");
    };
    assert_eq!(record.status, CommandStatus::Success);

    tools.invoke(ToolCall::WriteRegister {
        register: "PC".into(),
        value: "0x08000100".into(),
    });
    tools.invoke(ToolCall::StepInstruction);
    tools.invoke(ToolCall::Backtrace);
    assert_eq!(
        tools.session().commands,
        [
            "-data-read-memory-bytes 0x20000000 8",
            "-gdb-set $pc=0x08000100",
            "-exec-next-instruction",
            "-stack-list-frames",
        ]
    );
}

#[test]
fn test_invalid_arguments_become_error_outcomes() {
    let mut tools = toolbox();
    tools.invoke(ToolCall::Start);
    let outcome = tools.invoke(ToolCall::WriteMemory {
        address: "0x0".into(),
        value: "1".into(),
        width: 3,
    });
    assert_eq!(error_kind(&outcome), Some(ErrorKind::InvalidInput));
    assert!(tools.session().commands.is_empty());

    let outcome = tools.invoke(ToolCall::ResolveAddress {
        address: "0xZZ".into(),
    });
    assert_eq!(error_kind(&outcome), Some(ErrorKind::InvalidInput));
}

#[test]
fn test_device_tools() {
    let mut tools = toolbox();
    // no session needed for descriptor queries
    let outcome = tools.invoke(ToolCall::ResolveAddress {
        address: "0x48000014".into(),
    });
    let json = serde_json::to_value(&outcome).unwrap();
    assert_eq!(json["outcome"], "resolution");
    assert_eq!(json["resolution"]["result"], "found");
    assert_eq!(json["resolution"]["register"], "ODR");

    let outcome = tools.invoke(ToolCall::Describe {
        name: "gpioa".into(),
    });
    let json = serde_json::to_value(&outcome).unwrap();
    assert_eq!(json["description"]["result"], "peripheral");
    assert_eq!(
        json["description"]["registers"],
        serde_json::json!(["MODER", "ODR"])
    );

    let outcome = tools.invoke(ToolCall::Describe {
        name: "UNKNOWN".into(),
    });
    assert!(matches!(
        outcome,
        ToolOutcome::Description {
            description: Description::PeripheralNotFound { .. }
        }
    ));
}

#[test]
fn test_device_tools_without_index() {
    let mut tools: Toolbox<FakeSession> = Toolbox::new(FakeSession::default(), None);
    for call in [
        ToolCall::ResolveAddress {
            address: "0x0".into(),
        },
        ToolCall::Describe {
            name: "GPIOA".into(),
        },
    ] {
        assert_eq!(
            error_kind(&tools.invoke(call)),
            Some(ErrorKind::Configuration)
        );
    }
}

#[test]
fn test_session_error_kinds() {
    let cases = [
        (SessionError::NotReady, ErrorKind::SessionNotReady),
        (
            SessionError::TimedOut {
                command: "-exec-continue".into(),
                waited: Duration::from_secs(10),
            },
            ErrorKind::TimedOut,
        ),
        (
            SessionError::Connect {
                message: "Connection refused".into(),
            },
            ErrorKind::Connection,
        ),
        (
            SessionError::Binary {
                path: "app.elf".into(),
                reason: "not an ELF image".into(),
            },
            ErrorKind::Configuration,
        ),
        (
            SessionError::EmulatorExited {
                status: "exit status: 2".into(),
            },
            ErrorKind::Process,
        ),
        (
            SessionError::InvalidInput("bad".into()),
            ErrorKind::InvalidInput,
        ),
    ];
    for (err, kind) in cases {
        assert_eq!(error_kind(&ToolOutcome::from(err)), Some(kind));
    }

    let outcome = ToolOutcome::from(SessionError::Protocol {
        message: "expected value at column 10".into(),
        raw: "5^done,x=".into(),
    });
    assert_eq!(
        outcome,
        ToolOutcome::Error {
            kind: ErrorKind::Protocol,
            message: "Unparseable debugger output (expected value at column 10): 5^done,x=".into(),
            raw: Some("5^done,x=".into()),
        }
    );
}
