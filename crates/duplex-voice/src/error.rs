//! Voice core error types.

use duplex_core::DeviceError;

/// Errors that can occur in the duplex audio core.
#[derive(Debug, thiserror::Error)]
pub enum VoiceError {
    /// Working rate is not one the engine supports.
    #[error("Unsupported working sample rate: {0} Hz")]
    UnsupportedSampleRate(u32),

    /// Capture and output buffers differ in length.
    #[error("Buffer length mismatch: capture has {capture} samples, output has {output}")]
    LengthMismatch { capture: usize, output: usize },

    /// The native echo engine rejected its configuration.
    #[error("Echo engine configuration failed: {0}")]
    EngineConfig(String),

    /// Playback thread could not be started.
    #[error("Failed to spawn playback thread: {0}")]
    ThreadSpawn(String),

    /// Playback device failure.
    #[error("Playback device error: {0}")]
    Device(#[from] DeviceError),

    /// WAV encoder failure (debug recording).
    #[error("WAV recording error: {0}")]
    Wav(#[from] hound::Error),

    /// IO error (recording directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
