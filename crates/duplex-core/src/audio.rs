//! Sample format and frame geometry shared by every component.
//!
//! All producers hand audio to the core already at the engine's working
//! rate. Nothing in this workspace resamples.

/// One mono PCM sample (signed 16-bit, the device wire format).
pub type Sample = i16;

/// Working rates the echo-cancellation engine accepts.
pub const SUPPORTED_SAMPLE_RATES: [u32; 3] = [16_000, 32_000, 48_000];

/// Default working rate.
pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;

/// Duration of one inner frame, the unit of exchange with the engine.
pub const FRAME_DURATION_MS: u32 = 10;

/// Largest inner frame across all supported rates (10 ms at 48 kHz).
pub const MAX_FRAME_SAMPLES: usize = 480;

/// Whether `sample_rate` is one of [`SUPPORTED_SAMPLE_RATES`].
#[must_use]
pub fn is_supported_rate(sample_rate: u32) -> bool {
    SUPPORTED_SAMPLE_RATES.contains(&sample_rate)
}

/// Samples in one 10 ms inner frame at `sample_rate`.
#[must_use]
pub const fn frame_samples(sample_rate: u32) -> usize {
    (sample_rate / 1000 * FRAME_DURATION_MS) as usize
}

/// Convert a duration in milliseconds to a (fractional) sample count.
#[must_use]
pub fn ms_to_samples(ms: f32, sample_rate: u32) -> f32 {
    ms * sample_rate as f32 / 1000.0
}

/// Convert decibels to a linear gain factor.
#[must_use]
pub fn db_to_linear(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Root-mean-square level of a block of samples, on the i16 scale.
#[must_use]
pub fn rms(samples: &[Sample]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
    (sum_sq / samples.len() as f64).sqrt()
}
