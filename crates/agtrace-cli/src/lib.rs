//! The official CLI for agtrace: wires the runtime Lifecycle, the Hub, and
//! one-shot query commands together over a single on-disk workspace.

pub mod cli;
pub mod commands;
