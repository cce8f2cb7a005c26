//! Integration tests: JSON-lines tool contract without a running target

use jtag_agent::ui::json::run_json;
use jtag_agent::{DebugSession, DeviceIndex, SessionConfig, Toolbox};
use serde_json::Value;

const SVD: &str = r#"<device>
  <name>MINI</name>
  <peripherals>
    <peripheral>
      <name>GPIOA</name>
      <baseAddress>0x48000000</baseAddress>
      <registers>
        <register><name>MODER</name><addressOffset>0x0</addressOffset></register>
        <register><name>ODR</name><addressOffset>0x14</addressOffset></register>
      </registers>
    </peripheral>
  </peripherals>
</device>"#;

fn serve(input: &str) -> Vec<Value> {
    let index = DeviceIndex::from_svd(SVD).unwrap();
    let mut toolbox = Toolbox::new(DebugSession::new(SessionConfig::default()), Some(index));
    let mut output = Vec::new();
    run_json(&mut toolbox, input.as_bytes(), &mut output).unwrap();
    String::from_utf8(output)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

#[test]
fn test_one_outcome_per_call_in_order() {
    let outcomes = serve(concat!(
        r#"{"tool":"status"}"#,
        "\n\n",
        r#"{"tool":"read_registers"}"#,
        "\n",
        r#"{"tool":"resolve_address","address":"0x48000014"}"#,
        "\n",
        r#"{"tool":"describe","name":"GPIOA.IDR"}"#,
        "\n",
    ));
    assert_eq!(outcomes.len(), 4);

    assert_eq!(outcomes[0]["outcome"], "message");
    assert_eq!(outcomes[0]["status"], "disconnected");

    assert_eq!(outcomes[1]["outcome"], "error");
    assert_eq!(outcomes[1]["kind"], "session_not_ready");

    assert_eq!(outcomes[2]["resolution"]["result"], "found");
    assert_eq!(outcomes[2]["resolution"]["address"], "0x48000014");

    assert_eq!(outcomes[3]["description"]["result"], "register_not_found");
    assert_eq!(outcomes[3]["description"]["register"], "IDR");
}

#[test]
fn test_malformed_lines_do_not_stop_the_stream() {
    let outcomes = serve("{\"tool\":\"reboot\"}\nnot json\n{\"tool\":\"resolve_address\",\"address\":\"0xFFFFFFFF\"}\n");
    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes[0]["kind"], "invalid_input");
    assert_eq!(outcomes[1]["kind"], "invalid_input");
    assert_eq!(outcomes[2]["resolution"]["result"], "not_found");
}
