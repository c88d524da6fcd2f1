#![doc = include_str!(concat!(env!("OUT_DIR"), "/README_GENERATED.md"))]
#![deny(unused_crate_dependencies)]

// Used by the binary target only
use tracing_subscriber as _;

// Only used by the integration tests
#[cfg(test)]
use tempfile as _;

pub mod commands;
pub mod handlers;
pub mod parser;
pub mod sim;

pub use commands::{Commands, SimulateArgs};
pub use parser::Cli;
