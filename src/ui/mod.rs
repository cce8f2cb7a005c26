//! UI module - interactive REPL and JSON-lines front ends over the tool contract.

pub mod cli;
pub mod json;
