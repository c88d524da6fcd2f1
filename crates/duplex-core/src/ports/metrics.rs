//! Scalar metrics port.

use tracing::debug;

/// Metric names reported by the core.
pub mod metric_names {
    /// Synthesis wall-clock time (ms).
    pub const SYNTHESIS_MS: &str = "tts.synthesis_ms";
    /// Synthesis realtime factor.
    pub const SYNTHESIS_RTF: &str = "tts.realtime_factor";
    /// 1.0 on success, 0.0 on failure.
    pub const CALIBRATION_SUCCESS: &str = "aec.calibration.success";
    pub const CALIBRATION_DELAY_MS: &str = "aec.calibration.delay_ms";
    pub const CALIBRATION_CORRELATION: &str = "aec.calibration.correlation";
}

/// Receives named scalar reports. Must not block.
pub trait MetricsSink: Send + Sync {
    fn record(&self, name: &'static str, value: f64);
}

/// Discards every report.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record(&self, _name: &'static str, _value: f64) {}
}

/// Forwards every report to `tracing` at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn record(&self, name: &'static str, value: f64) {
        debug!(metric = name, value, "metric");
    }
}
