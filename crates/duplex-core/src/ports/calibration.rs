//! Acoustic delay calibration port.
//!
//! The correlation math lives in the collaborator. The playback controller
//! only sequences the hooks around one designated utterance:
//!
//! ```text
//! request() ──► is_pending() at Playing ──► start()
//!                                             │
//!           natural end of utterance ◄────────┘
//!                     │
//!                     ▼
//!              is_running() ──► finish() ──► delay hint + metrics
//! ```

use crate::error::CalibrationError;

/// Result of a finished measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationOutcome {
    /// Measured speaker-to-mic delay.
    pub delay_ms: u32,
    /// Normalised correlation peak backing the measurement.
    pub correlation: f64,
}

/// Delay calibration hooks.
pub trait Calibrator: Send + Sync {
    /// Ask for a measurement on the next utterance that starts playing.
    fn request(&self);

    /// Whether a measurement has been requested but not started.
    fn is_pending(&self) -> bool;

    /// Begin measuring. Clears the pending flag.
    fn start(&self);

    /// Whether a measurement is in progress.
    fn is_running(&self) -> bool;

    /// Stop measuring and report the result.
    fn finish(&self) -> Result<CalibrationOutcome, CalibrationError>;
}

/// Calibrator that never has anything pending.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCalibrator;

impl Calibrator for NoopCalibrator {
    fn request(&self) {}

    fn is_pending(&self) -> bool {
        false
    }

    fn start(&self) {}

    fn is_running(&self) -> bool {
        false
    }

    fn finish(&self) -> Result<CalibrationOutcome, CalibrationError> {
        Err(CalibrationError::NotRunning)
    }
}
