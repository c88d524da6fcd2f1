//! Engine health: consecutive-failure latch and processing counters.
//!
//! The monitor is a fail-safe, not a retry loop. Once the native engine
//! fails `threshold` frames in a row, cancellation stays off (capture keeps
//! flowing as passthrough) until an explicit [`FailureMonitor::reset`].

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use tracing::{error, warn};

/// Warn on the first failure of a run and then every this many.
const WARN_EVERY: u32 = 100;

/// Consecutive native-engine failure counter with an auto-disable latch.
#[derive(Debug)]
pub struct FailureMonitor {
    threshold: u32,
    consecutive: AtomicU32,
    active: AtomicBool,
}

impl FailureMonitor {
    /// `threshold` is raised to at least 1.
    #[must_use]
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            consecutive: AtomicU32::new(0),
            active: AtomicBool::new(true),
        }
    }

    #[must_use]
    pub const fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Whether cancellation is enabled.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive.load(Ordering::Relaxed)
    }

    pub fn record_success(&self) {
        self.consecutive.store(0, Ordering::Relaxed);
    }

    /// Count one failed frame. Returns `true` if this call disabled
    /// processing.
    pub fn record_failure(&self, reason: &dyn std::fmt::Display) -> bool {
        let errors = self.consecutive.fetch_add(1, Ordering::Relaxed).saturating_add(1);

        if errors == 1 || errors % WARN_EVERY == 0 {
            warn!(
                errors,
                error = %reason,
                "Echo cancellation frame failed, passing capture through"
            );
        }

        if errors >= self.threshold && self.active.swap(false, Ordering::AcqRel) {
            error!(
                errors,
                threshold = self.threshold,
                "Echo cancellation disabled after repeated failures; reset required"
            );
            return true;
        }
        false
    }

    /// Re-enable processing and clear the failure run.
    pub fn reset(&self) {
        self.consecutive.store(0, Ordering::Relaxed);
        self.active.store(true, Ordering::Release);
    }
}

/// Snapshot of [`ProcessingStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProcessingSnapshot {
    pub frames_processed: u64,
    pub frames_passed_through: u64,
    /// Exponential moving average of `process()` call duration.
    pub avg_processing_time_us: f64,
}

/// Lock-free frame counters updated from the capture thread.
#[derive(Debug, Default)]
pub struct ProcessingStats {
    frames_processed: AtomicU64,
    frames_passed_through: AtomicU64,
    // f64 bits; only the capture thread writes it.
    avg_time_us: AtomicU64,
}

impl ProcessingStats {
    /// Returns the new total.
    pub fn add_processed(&self, frames: u64) -> u64 {
        self.frames_processed.fetch_add(frames, Ordering::Relaxed) + frames
    }

    pub fn add_passed_through(&self, frames: u64) {
        self.frames_passed_through.fetch_add(frames, Ordering::Relaxed);
    }

    /// Fold one call duration into the moving average (weight 0.01).
    pub fn record_call(&self, elapsed: Duration) {
        let sample = elapsed.as_secs_f64() * 1e6;
        let avg = f64::from_bits(self.avg_time_us.load(Ordering::Relaxed));
        let next = if avg <= 0.0 {
            sample
        } else {
            avg.mul_add(0.99, sample * 0.01)
        };
        self.avg_time_us.store(next.to_bits(), Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.frames_processed.store(0, Ordering::Relaxed);
        self.frames_passed_through.store(0, Ordering::Relaxed);
        self.avg_time_us.store(0, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> ProcessingSnapshot {
        ProcessingSnapshot {
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            frames_passed_through: self.frames_passed_through.load(Ordering::Relaxed),
            avg_processing_time_us: f64::from_bits(self.avg_time_us.load(Ordering::Relaxed)),
        }
    }
}
