//! Command handlers.
//!
//! Each handler is a thin `execute` that parses CLI input, calls into
//! `duplex-core` / `duplex-voice` and formats the result for the terminal.

pub mod check;
pub mod defaults;
pub mod simulate;
