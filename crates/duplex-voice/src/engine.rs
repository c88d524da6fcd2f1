//! Echo cancellation engine: orchestrates one native adaptive filter.
//!
//! ```text
//!   playback thread                         capture thread
//!        │                                        │
//!  add_reference(chunk)                    process(capture, out)
//!        │                                        │
//!        ▼                                        ▼  per 10 ms frame
//!  ReferenceDelayBuffer ──── read_frame ────► ┌──────────────────────┐
//!                          none? passthrough  │ lock native          │
//!                                             │   process_render     │
//!                                             │   set_stream_delay   │
//!                                             │   process_capture    │
//!                                             │ unlock               │
//!                                             └──────────┬───────────┘
//!                                          ok: gate ◄────┴────► err: passthrough
//!                                                               + FailureMonitor
//! ```
//!
//! The engine lock covers only the three native calls for one frame. The
//! capture thread never waits on playback work: reference writes take the
//! buffer lock, not the engine lock.
//!
//! Nothing resamples. Every producer hands in audio at the working rate.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

use duplex_core::{
    DELAY_HINT_RANGE_MS, DuplexSettings, EchoReference, MAX_FRAME_SAMPLES, Sample, frame_samples,
    is_supported_rate,
};
use tracing::{debug, info, warn};

use crate::backend::{NativeEchoEngine, NativeEngineConfig, NativeError, NativeStats};
use crate::error::VoiceError;
use crate::gate::{EnvelopeGate, GateState};
use crate::health::{FailureMonitor, ProcessingStats};
use crate::recorder::{DebugRecorder, RecordStream};
use crate::reference::{ReferenceDelayBuffer, ReferenceStats};

/// Log a counters line every this many processed frames (5 s of audio).
const STATS_LOG_INTERVAL_FRAMES: u64 = 500;

/// Health and throughput snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineStats {
    pub active: bool,
    pub consecutive_errors: u32,
    pub frames_processed: u64,
    pub frames_passed_through: u64,
    pub avg_processing_time_us: f64,
    pub delay_hint_ms: u32,
    pub reference: ReferenceStats,
}

/// Echo canceller wrapping one [`NativeEchoEngine`].
///
/// Shared between the capture thread (`process`) and the playback thread
/// (`add_reference` via [`EchoReference`]) behind an `Arc`.
pub struct EchoCancellationEngine {
    sample_rate: u32,
    frame_size: usize,
    native: Mutex<Box<dyn NativeEchoEngine>>,
    reference: ReferenceDelayBuffer,
    gate: Option<Mutex<EnvelopeGate>>,
    monitor: FailureMonitor,
    stats: ProcessingStats,
    delay_hint_ms: AtomicU32,
    recorder: Option<DebugRecorder>,
}

impl std::fmt::Debug for EchoCancellationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EchoCancellationEngine")
            .field("sample_rate", &self.sample_rate)
            .field("frame_size", &self.frame_size)
            .field("active", &self.monitor.is_active())
            .field("gate", &self.gate_state())
            .finish_non_exhaustive()
    }
}

fn clamp_delay_hint(delay_ms: u32) -> u32 {
    let (lo, hi) = DELAY_HINT_RANGE_MS;
    let clamped = delay_ms.clamp(lo, hi);
    if clamped != delay_ms {
        warn!(delay_ms, clamped, "Delay hint out of range, clamped");
    }
    clamped
}

impl EchoCancellationEngine {
    /// Configure `native` from `settings` and wrap it.
    ///
    /// Fails only on structural problems: an unsupported working rate or a
    /// backend that rejects its configuration. Tuning values are clamped.
    pub fn new(
        settings: &DuplexSettings,
        mut native: Box<dyn NativeEchoEngine>,
    ) -> Result<Self, VoiceError> {
        let sample_rate = settings.engine.sample_rate;
        if !is_supported_rate(sample_rate) {
            return Err(VoiceError::UnsupportedSampleRate(sample_rate));
        }
        let settings = settings.clone().sanitized();
        let frame_size = frame_samples(sample_rate);

        let config = NativeEngineConfig {
            sample_rate,
            frame_size,
            noise_suppression: settings.engine.noise_suppression,
            high_pass_filter: settings.engine.high_pass_filter,
            mobile_mode: settings.engine.mobile_mode,
            delay_hint_ms: settings.engine.delay_hint_ms,
        };
        native
            .apply_config(&config)
            .map_err(|e| VoiceError::EngineConfig(e.to_string()))?;

        let reference = ReferenceDelayBuffer::with_duration(
            sample_rate,
            settings.engine.reference_buffer_ms,
            frame_size,
            settings.engine.reference_delay_samples,
        );

        let gate = settings
            .gate
            .is_enabled()
            .then(|| Mutex::new(EnvelopeGate::new(&settings.gate, sample_rate)));

        let recorder = settings
            .recording
            .enabled
            .then(|| DebugRecorder::new(&settings.recording.directory, sample_rate));

        info!(
            sample_rate,
            frame_size,
            delay_hint_ms = config.delay_hint_ms,
            noise_suppression = ?config.noise_suppression,
            high_pass_filter = config.high_pass_filter,
            mobile_mode = config.mobile_mode,
            gate = gate.is_some(),
            recording = recorder.is_some(),
            "Echo cancellation engine initialized"
        );

        Ok(Self {
            sample_rate,
            frame_size,
            native: Mutex::new(native),
            reference,
            gate,
            monitor: FailureMonitor::new(settings.engine.failure_threshold),
            stats: ProcessingStats::default(),
            delay_hint_ms: AtomicU32::new(config.delay_hint_ms),
            recorder,
        })
    }

    // ── Capture path ───────────────────────────────────────────────

    /// Cancel echo from `capture` into `out`.
    ///
    /// Both buffers must have the same length; any length is accepted.
    /// The chunk is split into 10 ms frames and a trailing partial frame is
    /// zero-padded for the native call, consuming one full reference frame.
    /// Splitting a chunk on frame boundaries across several calls yields the
    /// same output.
    pub fn process(&self, capture: &[Sample], out: &mut [Sample]) -> Result<(), VoiceError> {
        if capture.len() != out.len() {
            return Err(VoiceError::LengthMismatch {
                capture: capture.len(),
                output: out.len(),
            });
        }
        if capture.is_empty() {
            return Ok(());
        }

        let started = Instant::now();
        if let Some(recorder) = &self.recorder {
            recorder.write(RecordStream::Mic, capture);
        }

        for (cap, dst) in capture
            .chunks(self.frame_size)
            .zip(out.chunks_mut(self.frame_size))
        {
            self.process_frame(cap, dst);
        }

        if let Some(recorder) = &self.recorder {
            recorder.write(RecordStream::Output, out);
        }
        self.stats.record_call(started.elapsed());
        Ok(())
    }

    fn process_frame(&self, capture: &[Sample], out: &mut [Sample]) {
        if !self.monitor.is_active() {
            self.pass_through(capture, out);
            return;
        }

        let mut reference = [0; MAX_FRAME_SAMPLES];
        let reference = &mut reference[..self.frame_size];
        if !self.reference.read_frame(reference) {
            // Nothing playing: filtering would only add artifacts.
            self.pass_through(capture, out);
            return;
        }

        let mut frame = [0; MAX_FRAME_SAMPLES];
        let frame = &mut frame[..self.frame_size];
        frame[..capture.len()].copy_from_slice(capture);

        let delay_ms = self.delay_hint_ms.load(Ordering::Relaxed);
        let result = match self.native.lock() {
            Ok(mut native) => native.process_render(reference).and_then(|()| {
                native.set_stream_delay_ms(delay_ms);
                native.process_capture(frame)
            }),
            Err(_) => Err(NativeError::new(-1, "engine lock poisoned")),
        };

        match result {
            Ok(()) => {
                self.monitor.record_success();
                let cleaned = &mut frame[..capture.len()];
                if let Some(gate) = &self.gate {
                    if let Ok(mut gate) = gate.lock() {
                        gate.process(cleaned);
                    }
                }
                out.copy_from_slice(cleaned);

                let processed = self.stats.add_processed(1);
                if processed % STATS_LOG_INTERVAL_FRAMES == 0 {
                    let snapshot = self.stats.snapshot();
                    debug!(
                        frames_processed = snapshot.frames_processed,
                        frames_passed_through = snapshot.frames_passed_through,
                        avg_us = snapshot.avg_processing_time_us,
                        reference_frames = self.reference.available_frame_count(),
                        "Echo cancellation running"
                    );
                }
            }
            Err(e) => {
                self.pass_through(capture, out);
                self.monitor.record_failure(&e);
            }
        }
    }

    fn pass_through(&self, capture: &[Sample], out: &mut [Sample]) {
        out.copy_from_slice(capture);
        self.stats.add_passed_through(1);
    }

    // ── Reference path ─────────────────────────────────────────────

    /// Queue audio that was just written to the speaker. Ignored while
    /// cancellation is disabled.
    pub fn add_reference(&self, samples: &[Sample]) {
        if !self.monitor.is_active() {
            return;
        }
        self.reference.write(samples);
        if let Some(recorder) = &self.recorder {
            recorder.write(RecordStream::Reference, samples);
        }
    }

    // ── Control ────────────────────────────────────────────────────

    /// Clear reference audio and counters, and re-enable cancellation.
    ///
    /// The native adaptive filter is reset only if the backend supports it.
    pub fn reset(&self) {
        self.reference.clear();
        self.monitor.reset();
        self.stats.reset();

        let native_reset = self.native.lock().is_ok_and(|mut native| native.reset());
        if !native_reset {
            debug!("Native echo engine keeps its adaptive filter state across reset");
        }
        info!(native_reset, "Echo cancellation reset");
    }

    /// Apply a new stream-delay hint, clamped to the valid range.
    pub fn set_delay_hint_ms(&self, delay_ms: u32) {
        let delay_ms = clamp_delay_hint(delay_ms);
        self.delay_hint_ms.store(delay_ms, Ordering::Relaxed);
        info!(delay_ms, "Echo cancellation delay hint updated");
    }

    // ── Accessors ──────────────────────────────────────────────────

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.monitor.is_active()
    }

    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Samples per 10 ms frame.
    #[must_use]
    pub const fn frame_size(&self) -> usize {
        self.frame_size
    }

    #[must_use]
    pub fn delay_hint_ms(&self) -> u32 {
        self.delay_hint_ms.load(Ordering::Relaxed)
    }

    #[must_use]
    pub const fn reference_buffer(&self) -> &ReferenceDelayBuffer {
        &self.reference
    }

    /// Gate position, or `None` when the gate is disabled.
    #[must_use]
    pub fn gate_state(&self) -> Option<GateState> {
        self.gate
            .as_ref()
            .and_then(|gate| gate.lock().ok().map(|g| g.state()))
    }

    #[must_use]
    pub fn stats(&self) -> EngineStats {
        let snapshot = self.stats.snapshot();
        EngineStats {
            active: self.monitor.is_active(),
            consecutive_errors: self.monitor.consecutive_errors(),
            frames_processed: snapshot.frames_processed,
            frames_passed_through: snapshot.frames_passed_through,
            avg_processing_time_us: snapshot.avg_processing_time_us,
            delay_hint_ms: self.delay_hint_ms(),
            reference: self.reference.stats(),
        }
    }

    /// Metrics reported by the backend, if any.
    #[must_use]
    pub fn native_stats(&self) -> NativeStats {
        self.native
            .lock()
            .map(|native| native.statistics())
            .unwrap_or_default()
    }

    /// Echo return loss enhancement in dB, when the backend reports it.
    #[must_use]
    pub fn erle_db(&self) -> Option<f64> {
        self.native_stats().erle_db
    }

    /// Residual echo likelihood in `[0, 1]`, when the backend reports it.
    #[must_use]
    pub fn residual_echo_likelihood(&self) -> Option<f64> {
        self.native_stats().residual_echo_likelihood
    }
}

impl EchoReference for EchoCancellationEngine {
    fn add_reference(&self, samples: &[Sample]) {
        Self::add_reference(self, samples);
    }

    fn clear_reference(&self) {
        self.reference.clear();
        debug!("Echo reference cleared");
    }

    fn set_delay_hint_ms(&self, delay_ms: u32) {
        Self::set_delay_hint_ms(self, delay_ms);
    }

    fn on_playback_start(&self) {
        if let Some(recorder) = &self.recorder {
            if let Err(e) = recorder.start() {
                warn!(error = %e, "Failed to start echo debug recording");
            }
        }
    }

    fn on_playback_stop(&self) {
        if let Some(recorder) = &self.recorder {
            if let Err(e) = recorder.stop() {
                warn!(error = %e, "Failed to finalize echo debug recording");
            }
        }
    }
}
