//! JSON-lines front end
//!
//! One [`ToolCall`] object per input line, one [`ToolOutcome`] object per
//! output line, in order. Blank lines are skipped; malformed ones get an
//! `invalid_input` outcome so the stream never desynchronises.

use crate::debug::Lifecycle;
use crate::tools::{ToolCall, ToolOutcome, Toolbox};
use anyhow::{Context, Result};
use std::io::{BufRead, Write};

/// Serve calls from `input` until end of input; returns the number handled
pub fn run_json<S, R, W>(toolbox: &mut Toolbox<S>, input: R, mut output: W) -> Result<usize>
where
    S: Lifecycle,
    R: BufRead,
    W: Write,
{
    let mut handled = 0;
    for line in input.lines() {
        let line = line.context("reading tool call")?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let outcome = match ToolCall::from_json(line) {
            Ok(call) => toolbox.invoke(call),
            Err(e) => ToolOutcome::from(e),
        };
        serde_json::to_writer(&mut output, &outcome).context("encoding outcome")?;
        writeln!(output)?;
        output.flush()?;
        handled += 1;
    }
    Ok(handled)
}
