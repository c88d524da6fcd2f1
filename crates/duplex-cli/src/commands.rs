//! Subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand};

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Print the default settings as JSON
    Defaults,

    /// Load, validate and clamp a settings file, then print the effective values
    Check {
        /// Path to a JSON settings file
        file: PathBuf,
    },

    /// Run playback and echo cancellation against simulated hardware
    Simulate(SimulateArgs),
}

/// Arguments for `duplex simulate`.
#[derive(Debug, Clone, Args)]
pub struct SimulateArgs {
    /// JSON settings file (defaults are used when omitted)
    #[arg(short, long, env = "DUPLEX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Text to speak; repeat for several utterances
    #[arg(short, long = "text")]
    pub texts: Vec<String>,

    /// Interrupt playback this many milliseconds after it starts
    #[arg(long)]
    pub barge_in_ms: Option<u64>,

    /// Override the working sample rate (16000, 32000 or 48000)
    #[arg(long)]
    pub sample_rate: Option<u32>,

    /// Speaker-to-microphone coupling, 0.0 to 1.0
    #[arg(long, default_value_t = 0.6)]
    pub echo_gain: f32,

    /// Peak amplitude of near-end noise on the microphone
    #[arg(long, default_value_t = 40)]
    pub noise: i16,

    /// Write mic / reference / output WAV files into this directory
    #[arg(long)]
    pub record: Option<PathBuf>,

    /// Give up waiting for playback after this many seconds
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,
}
