//! Error types for the collaborator ports.

/// Errors reported by the audio device collaborator.
///
/// This is a closed set: device adapters map every backend-specific
/// failure onto one of these before it reaches the playback controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum DeviceError {
    /// Playback buffer ran dry (gap in audio).
    #[error("playback buffer underrun")]
    Underrun,

    /// Buffer overrun (data lost).
    #[error("buffer overrun")]
    Overrun,

    /// Device suspended by power management.
    #[error("device suspended")]
    Suspended,

    /// I/O error during read or write.
    #[error("device I/O error")]
    Io,

    /// Invalid parameter or handle.
    #[error("invalid device parameter")]
    Invalid,

    /// Device busy or no handles available.
    #[error("device busy")]
    Busy,

    /// Operation timed out.
    #[error("device operation timed out")]
    Timeout,

    /// Device not found or cannot be opened.
    #[error("no such audio device")]
    NoDevice,

    /// Anything else.
    #[error("unknown device error")]
    Unknown,
}

impl DeviceError {
    /// Whether the controller should call `recover()` and keep playing.
    ///
    /// Underrun, overrun and suspend are transient; every other error aborts
    /// the current utterance.
    #[must_use]
    pub const fn is_recoverable(self) -> bool {
        matches!(self, Self::Underrun | Self::Overrun | Self::Suspended)
    }

    /// Positive numeric code used by C-style device backends.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Invalid => 1,
            Self::NoDevice => 3,
            Self::Overrun => 4,
            Self::Underrun => 5,
            Self::Suspended => 6,
            Self::Io => 7,
            Self::Busy => 8,
            Self::Timeout => 9,
            Self::Unknown => 10,
        }
    }

    /// Decode a backend return value (`-code` or `code`). Unknown values map
    /// to [`DeviceError::Unknown`].
    #[must_use]
    pub const fn from_code(code: i32) -> Self {
        match code.unsigned_abs() {
            1 => Self::Invalid,
            3 => Self::NoDevice,
            4 => Self::Overrun,
            5 => Self::Underrun,
            6 => Self::Suspended,
            7 => Self::Io,
            8 => Self::Busy,
            9 => Self::Timeout,
            _ => Self::Unknown,
        }
    }
}

/// Errors reported by the speech synthesis collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SynthesisError {
    /// The synthesizer ran but could not produce audio.
    #[error("synthesis failed: {0}")]
    Failed(String),

    /// The synthesizer produced audio at a rate other than the working rate.
    #[error("synthesized audio is {actual} Hz, expected {expected} Hz")]
    SampleRateMismatch {
        /// Working rate of the playback path.
        expected: u32,
        /// Rate the synthesizer produced.
        actual: u32,
    },
}

/// Errors reported by the calibration collaborator.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CalibrationError {
    /// `finish` was called without a running measurement.
    #[error("no calibration in progress")]
    NotRunning,

    /// Correlation peak too weak to trust the measured delay.
    #[error("calibration correlation too low: {0:.3}")]
    LowCorrelation(f64),

    /// Any other collaborator failure.
    #[error("calibration failed: {0}")]
    Failed(String),
}
