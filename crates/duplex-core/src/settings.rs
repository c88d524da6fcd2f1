//! Settings domain types and validation.
//!
//! Two tiers of checking:
//!
//! - [`validate_settings`] rejects structural errors that make the engine
//!   impossible to build (unsupported working rate, zero failure threshold).
//! - [`DuplexSettings::sanitized`] clamps tuning values into their valid
//!   ranges with a warning. A bad tuning value never fails startup.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::audio::{DEFAULT_SAMPLE_RATE, SUPPORTED_SAMPLE_RATES, frame_samples, is_supported_rate};

/// Default gate threshold on the i16 amplitude scale.
pub const DEFAULT_GATE_THRESHOLD: f32 = 600.0;

/// Default stream-delay hint handed to the native engine (ms).
pub const DEFAULT_DELAY_HINT_MS: u32 = 70;

/// Valid range for the stream-delay hint (ms).
pub const DELAY_HINT_RANGE_MS: (u32, u32) = (10, 200);

/// Default reference history (ms).
pub const DEFAULT_REFERENCE_BUFFER_MS: u32 = 2000;

/// Smallest reference history accepted (ms).
pub const MIN_REFERENCE_BUFFER_MS: u32 = 100;

/// Largest reference history accepted (ms).
pub const MAX_REFERENCE_BUFFER_MS: u32 = 10_000;

/// Consecutive native failures before cancellation is disabled.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 10;

/// Default `wait_for_idle` polling interval (ms).
pub const DEFAULT_IDLE_POLL_MS: u64 = 50;

const ATTACK_RANGE_MS: (f32, f32) = (0.1, 1000.0);
const HOLD_RANGE_MS: (f32, f32) = (0.0, 5000.0);
const RELEASE_RANGE_MS: (f32, f32) = (1.0, 5000.0);
const FLOOR_RANGE_DB: (f32, f32) = (-96.0, 0.0);

/// Native noise suppression strength.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseSuppressionLevel {
    Off,
    Low,
    #[default]
    Moderate,
    High,
}

/// Top-level settings for the duplex core.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DuplexSettings {
    pub engine: EngineSettings,
    pub gate: GateSettings,
    pub playback: PlaybackSettings,
    pub recording: RecordingSettings,
}

/// Echo-cancellation engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Working rate for every producer and the native engine (Hz).
    pub sample_rate: u32,

    /// Initial stream-delay hint (ms). Calibration may overwrite it.
    pub delay_hint_ms: u32,

    /// Reference history kept by the delay buffer (ms).
    pub reference_buffer_ms: u32,

    /// Fixed reference delay applied by the buffer, in samples. Zero keeps
    /// the buffer a plain FIFO and leaves alignment to the native engine.
    pub reference_delay_samples: usize,

    /// Consecutive failing frames before cancellation is disabled.
    pub failure_threshold: u32,

    pub noise_suppression: NoiseSuppressionLevel,
    pub high_pass_filter: bool,

    /// Lighter-weight native echo control for constrained targets.
    pub mobile_mode: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            delay_hint_ms: DEFAULT_DELAY_HINT_MS,
            reference_buffer_ms: DEFAULT_REFERENCE_BUFFER_MS,
            reference_delay_samples: 0,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            noise_suppression: NoiseSuppressionLevel::default(),
            high_pass_filter: true,
            mobile_mode: false,
        }
    }
}

impl EngineSettings {
    /// Reference history in samples at the working rate.
    #[must_use]
    pub fn reference_buffer_samples(&self) -> usize {
        let samples = u64::from(self.sample_rate) * u64::from(self.reference_buffer_ms) / 1000;
        usize::try_from(samples).unwrap_or(usize::MAX)
    }
}

/// Post-filter envelope gate settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateSettings {
    /// Open threshold on the i16 amplitude scale. `0` disables the gate.
    pub threshold: f32,
    pub attack_ms: f32,
    pub hold_ms: f32,
    pub release_ms: f32,
    /// Attenuation applied while closed (dB, negative).
    pub floor_db: f32,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_GATE_THRESHOLD,
            attack_ms: 2.0,
            hold_ms: 50.0,
            release_ms: 100.0,
            floor_db: -60.0,
        }
    }
}

impl GateSettings {
    /// Whether the gate participates in processing at all.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.threshold > 0.0
    }

    /// Clamp every tuning value into range, warning about each change.
    #[must_use]
    pub fn clamped(mut self) -> Self {
        self.threshold = clamp_warn("gate.threshold", self.threshold, 0.0, f32::from(i16::MAX));
        self.attack_ms = clamp_warn(
            "gate.attack_ms",
            self.attack_ms,
            ATTACK_RANGE_MS.0,
            ATTACK_RANGE_MS.1,
        );
        self.hold_ms = clamp_warn("gate.hold_ms", self.hold_ms, HOLD_RANGE_MS.0, HOLD_RANGE_MS.1);
        self.release_ms = clamp_warn(
            "gate.release_ms",
            self.release_ms,
            RELEASE_RANGE_MS.0,
            RELEASE_RANGE_MS.1,
        );
        self.floor_db = clamp_warn(
            "gate.floor_db",
            self.floor_db,
            FLOOR_RANGE_DB.0,
            FLOOR_RANGE_DB.1,
        );
        self
    }
}

/// Playback controller settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackSettings {
    /// Sleep between `wait_for_idle` polls (ms).
    pub idle_poll_interval_ms: u64,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            idle_poll_interval_ms: DEFAULT_IDLE_POLL_MS,
        }
    }
}

/// Debug WAV recording of mic / reference / output streams.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingSettings {
    pub enabled: bool,
    pub directory: PathBuf,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            directory: PathBuf::from("."),
        }
    }
}

impl DuplexSettings {
    /// Create settings with sensible defaults.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::default()
    }

    /// Return a copy with every tuning value clamped into range.
    ///
    /// Structural problems are left alone; run [`validate_settings`] for
    /// those.
    #[must_use]
    pub fn sanitized(mut self) -> Self {
        self.gate = self.gate.clamped();

        let (lo, hi) = DELAY_HINT_RANGE_MS;
        if !(lo..=hi).contains(&self.engine.delay_hint_ms) {
            let clamped = self.engine.delay_hint_ms.clamp(lo, hi);
            warn!(
                field = "engine.delay_hint_ms",
                value = self.engine.delay_hint_ms,
                clamped,
                "Out-of-range setting clamped"
            );
            self.engine.delay_hint_ms = clamped;
        }

        let (lo, hi) = (MIN_REFERENCE_BUFFER_MS, MAX_REFERENCE_BUFFER_MS);
        if !(lo..=hi).contains(&self.engine.reference_buffer_ms) {
            let clamped = self.engine.reference_buffer_ms.clamp(lo, hi);
            warn!(
                field = "engine.reference_buffer_ms",
                value = self.engine.reference_buffer_ms,
                clamped,
                "Out-of-range setting clamped"
            );
            self.engine.reference_buffer_ms = clamped;
        }

        // The hold-back must leave room for two frames in the history.
        let max_delay = self
            .engine
            .reference_buffer_samples()
            .saturating_sub(2 * frame_samples(self.engine.sample_rate));
        if self.engine.reference_delay_samples > max_delay {
            warn!(
                field = "engine.reference_delay_samples",
                value = self.engine.reference_delay_samples,
                clamped = max_delay,
                "Out-of-range setting clamped"
            );
            self.engine.reference_delay_samples = max_delay;
        }

        if self.playback.idle_poll_interval_ms == 0 {
            warn!(
                field = "playback.idle_poll_interval_ms",
                value = 0,
                clamped = 1,
                "Out-of-range setting clamped"
            );
            self.playback.idle_poll_interval_ms = 1;
        }

        self
    }
}

fn clamp_warn(field: &'static str, value: f32, lo: f32, hi: f32) -> f32 {
    // NaN compares false everywhere; fall back to the lower bound.
    let clamped = if value.is_nan() { lo } else { value.clamp(lo, hi) };
    if clamped.to_bits() != value.to_bits() {
        warn!(field, value, clamped, "Out-of-range setting clamped");
    }
    clamped
}

/// Settings validation or loading error.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Sample rate {0} Hz is not supported (expected one of {SUPPORTED_SAMPLE_RATES:?})")]
    UnsupportedSampleRate(u32),

    #[error("Failure threshold must be at least 1")]
    ZeroFailureThreshold,

    #[error("Recording directory cannot be empty while recording is enabled")]
    EmptyRecordingDirectory,

    #[error("Failed to read settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Validate structural settings values.
pub fn validate_settings(settings: &DuplexSettings) -> Result<(), SettingsError> {
    if !is_supported_rate(settings.engine.sample_rate) {
        return Err(SettingsError::UnsupportedSampleRate(
            settings.engine.sample_rate,
        ));
    }

    if settings.engine.failure_threshold == 0 {
        return Err(SettingsError::ZeroFailureThreshold);
    }

    if settings.recording.enabled && settings.recording.directory.as_os_str().is_empty() {
        return Err(SettingsError::EmptyRecordingDirectory);
    }

    Ok(())
}

/// Load settings from a JSON file, validate them and clamp tuning values.
///
/// Missing fields take their defaults.
pub fn load_settings(path: &Path) -> Result<DuplexSettings, SettingsError> {
    let raw = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let settings: DuplexSettings =
        serde_json::from_str(&raw).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    validate_settings(&settings)?;
    Ok(settings.sanitized())
}
