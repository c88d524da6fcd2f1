//! Native echo engine backend trait: the call contract around an external
//! adaptive filter.
//!
//! The [`EchoCancellationEngine`](crate::engine::EchoCancellationEngine)
//! drives a `Box<dyn NativeEchoEngine>` one 10 ms frame at a time:
//!
//! ```text
//!   process_render(reference)          ← far end, what the speaker played
//!   set_stream_delay_ms(hint)
//!   process_capture(capture)           ← near end, cleaned in place
//! ```
//!
//! All three calls for one frame happen under the engine lock. Backends
//! never see partial frames: the engine zero-pads trailing samples.
//!
//! A backend wrapping a process-global native instance must document that
//! only one may exist at a time; the engine itself imposes no singleton.

use duplex_core::{NoiseSuppressionLevel, Sample};

// ── Shared types ───────────────────────────────────────────────────

/// Configuration handed to the backend once at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeEngineConfig {
    /// Working rate, one of the supported rates.
    pub sample_rate: u32,
    /// Samples per frame (10 ms at `sample_rate`).
    pub frame_size: usize,
    pub noise_suppression: NoiseSuppressionLevel,
    pub high_pass_filter: bool,
    /// Lighter-weight echo control for constrained targets.
    pub mobile_mode: bool,
    /// Initial stream delay.
    pub delay_hint_ms: u32,
}

/// Best-effort quality metrics. Every field is optional; backends report
/// what they have.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NativeStats {
    /// Echo return loss (dB).
    pub erl_db: Option<f64>,
    /// Echo return loss enhancement (dB).
    pub erle_db: Option<f64>,
    /// Likelihood in `[0, 1]` that residual echo remains.
    pub residual_echo_likelihood: Option<f64>,
    /// Delay estimated by the backend (ms).
    pub delay_ms: Option<i32>,
    /// Fraction of frames where the filter diverged.
    pub divergent_filter_fraction: Option<f64>,
}

/// Failure reported by a native call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("native echo engine error {code}: {message}")]
pub struct NativeError {
    pub code: i32,
    pub message: String,
}

impl NativeError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

// ── Backend trait ──────────────────────────────────────────────────

/// Adaptive-filter echo canceller operating on fixed 10 ms frames.
///
/// Implementations must be `Send` so the engine can be shared with the
/// capture and playback threads behind a mutex.
pub trait NativeEchoEngine: Send {
    /// Apply configuration. Called once before any frame.
    fn apply_config(&mut self, config: &NativeEngineConfig) -> Result<(), NativeError>;

    /// Feed one far-end (reference) frame. The backend may modify the
    /// buffer; the engine discards it afterwards.
    fn process_render(&mut self, frame: &mut [Sample]) -> Result<(), NativeError>;

    /// Hint the current render-to-capture delay.
    fn set_stream_delay_ms(&mut self, delay_ms: u32);

    /// Cancel echo from one near-end (capture) frame in place.
    fn process_capture(&mut self, frame: &mut [Sample]) -> Result<(), NativeError>;

    /// Current quality metrics.
    fn statistics(&self) -> NativeStats {
        NativeStats::default()
    }

    /// Try to clear adaptive filter memory. Returns `false` when the backend
    /// cannot do this; that is not an error.
    fn reset(&mut self) -> bool {
        false
    }
}
