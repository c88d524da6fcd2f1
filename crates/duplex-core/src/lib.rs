#![doc = include_str!(concat!(env!("OUT_DIR"), "/README_GENERATED.md"))]
#![deny(unused_crate_dependencies)]

pub mod audio;
pub mod error;
pub mod ports;
pub mod settings;

// Re-export commonly used types for convenience
pub use audio::{
    DEFAULT_SAMPLE_RATE, FRAME_DURATION_MS, MAX_FRAME_SAMPLES, SUPPORTED_SAMPLE_RATES, Sample,
    db_to_linear, frame_samples, is_supported_rate, ms_to_samples, rms,
};
pub use error::{CalibrationError, DeviceError, SynthesisError};
pub use ports::{
    CalibrationOutcome, Calibrator, EchoReference, MetricsSink, NoopCalibrator, NoopMetrics,
    NoopReference, PlaybackDevice, SpeechSynthesizer, Synthesis, TracingMetrics, metric_names,
};
pub use settings::{
    DEFAULT_DELAY_HINT_MS, DEFAULT_FAILURE_THRESHOLD, DEFAULT_GATE_THRESHOLD, DEFAULT_IDLE_POLL_MS,
    DEFAULT_REFERENCE_BUFFER_MS, DELAY_HINT_RANGE_MS, DuplexSettings, EngineSettings,
    GateSettings, MAX_REFERENCE_BUFFER_MS, MIN_REFERENCE_BUFFER_MS, NoiseSuppressionLevel,
    PlaybackSettings, RecordingSettings, SettingsError, load_settings, validate_settings,
};

// Only used by the integration tests
#[cfg(test)]
use tempfile as _;
