//! Playback controller for interruptible speech output.
//!
//! ## State machine
//!
//! ```text
//!          audio ready               pause()
//!   Idle ──────────────► Playing ────────────► Paused
//!    ▲                     │  ▲    resume()      │
//!    │ end / fatal error   │  └──────────────────┘
//!    ├─────────────────────┘
//!    │                       discard() from any state
//!    └──────────────────── Discarding ◄─────────────
//! ```
//!
//! Callers only flip the requested state and signal the condition variable.
//! The playback thread owns the device, the synthesizer and the queue pops;
//! it performs every side effect of a discard.
//!
//! ## Discard epoch
//!
//! Device writes block, so they happen with the controller lock released.
//! Before unlocking, the thread snapshots the discard epoch; after the write
//! it compares. A mismatch means the device was flushed while the write was
//! in flight: the chunk is void, it is not mirrored into the echo
//! reference, and the utterance ends. A boolean flag cannot tell "this write
//! is stale" apart from "discarded, then a new utterance started".
//!
//! ## Lock discipline
//!
//! The controller lock guards state and queue only. No device call, no
//! synthesizer call and no call into the echo reference, calibrator or
//! metrics sink happens under it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use duplex_core::{
    Calibrator, DeviceError, DuplexSettings, EchoReference, MetricsSink, NoopCalibrator,
    NoopMetrics, NoopReference, PlaybackDevice, Sample, SpeechSynthesizer, SynthesisError,
    metric_names,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::VoiceError;

// ── State and events ───────────────────────────────────────────────

/// Playback state. Exactly one value at a time, changed only under the
/// controller lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlaybackState {
    /// Nothing playing.
    Idle,

    /// Writing an utterance to the device.
    Playing,

    /// Utterance suspended mid-stream; the playback thread is parked.
    Paused,

    /// Discard requested; the playback thread is flushing.
    Discarding,
}

/// Events emitted by the playback thread.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    /// State changed.
    StateChanged(PlaybackState),

    /// Synthesis finished; sent exactly once per utterance, before the
    /// first chunk is written.
    AudioReady {
        samples: usize,
        sample_rate: u32,
        synthesis_time: Duration,
        realtime_factor: f64,
    },

    /// Utterance played to the end and drained.
    Finished,

    /// Utterance or queued text dropped by `discard()`.
    Discarded,

    /// Fatal device error; the utterance was abandoned.
    Failed { error: DeviceError },

    /// The synthesizer could not produce audio; the utterance was skipped.
    SynthesisFailed { error: SynthesisError },
}

/// Receiving end of the controller's event channel.
pub type PlaybackEventReceiver = mpsc::UnboundedReceiver<PlaybackEvent>;

/// Result of [`PlaybackController::wait_for_idle`].
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleWait {
    /// Queue empty, nothing in flight, state Idle.
    Idle,

    /// Budget ran out. Playback may still be running.
    TimedOut,
}

// ── Configuration ──────────────────────────────────────────────────

/// Configuration for the playback controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackConfig {
    /// Working rate; synthesized audio at any other rate is rejected.
    pub sample_rate: u32,

    /// Sleep between `wait_for_idle` polls.
    pub idle_poll_interval: Duration,
}

impl PlaybackConfig {
    #[must_use]
    pub fn from_settings(settings: &DuplexSettings) -> Self {
        Self {
            sample_rate: settings.engine.sample_rate,
            idle_poll_interval: Duration::from_millis(
                settings.playback.idle_poll_interval_ms.max(1),
            ),
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self::from_settings(&DuplexSettings::default())
    }
}

/// Collaborators handed to the playback thread.
pub struct PlaybackParts {
    pub device: Box<dyn PlaybackDevice>,
    pub synthesizer: Box<dyn SpeechSynthesizer>,
    pub reference: Arc<dyn EchoReference>,
    pub calibrator: Arc<dyn Calibrator>,
    pub metrics: Arc<dyn MetricsSink>,
}

impl PlaybackParts {
    /// Device and synthesizer with no echo reference, calibration or
    /// metrics.
    pub fn new(device: Box<dyn PlaybackDevice>, synthesizer: Box<dyn SpeechSynthesizer>) -> Self {
        Self {
            device,
            synthesizer,
            reference: Arc::new(NoopReference),
            calibrator: Arc::new(NoopCalibrator),
            metrics: Arc::new(NoopMetrics),
        }
    }

    #[must_use]
    pub fn with_reference(mut self, reference: Arc<dyn EchoReference>) -> Self {
        self.reference = reference;
        self
    }

    #[must_use]
    pub fn with_calibrator(mut self, calibrator: Arc<dyn Calibrator>) -> Self {
        self.calibrator = calibrator;
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }
}

// ── Shared state ───────────────────────────────────────────────────

#[derive(Debug)]
struct QueuedUtterance {
    text: String,
    /// Discard epoch at enqueue time; older than current means stale.
    epoch: u64,
}

#[derive(Debug)]
struct Inner {
    state: PlaybackState,
    queue: VecDeque<QueuedUtterance>,
    /// An utterance has been popped and is being synthesized or played.
    in_flight: bool,
    running: bool,
}

impl Inner {
    fn set_state(
        &mut self,
        new_state: PlaybackState,
        events: &mpsc::UnboundedSender<PlaybackEvent>,
    ) {
        if self.state != new_state {
            debug!(old = ?self.state, new = ?new_state, "Playback state transition");
            self.state = new_state;
            emit(events, PlaybackEvent::StateChanged(new_state));
        }
    }

    /// Drop queue entries from before the latest discard. Returns how many.
    fn purge_stale(&mut self, epoch: u64) -> usize {
        let before = self.queue.len();
        self.queue.retain(|u| u.epoch >= epoch);
        before - self.queue.len()
    }
}

struct Shared {
    inner: Mutex<Inner>,
    wake: Condvar,
    epoch: AtomicU64,
    events: mpsc::UnboundedSender<PlaybackEvent>,
}

impl Shared {
    fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    fn lock(&self) -> Option<MutexGuard<'_, Inner>> {
        self.inner.lock().ok()
    }
}

/// Emit an event (best-effort; a dropped receiver is ignored).
fn emit(events: &mpsc::UnboundedSender<PlaybackEvent>, event: PlaybackEvent) {
    if events.send(event).is_err() {
        debug!("Playback event receiver dropped");
    }
}

// ── Controller ─────────────────────────────────────────────────────

/// Handle to the playback thread.
///
/// Every method is non-blocking except [`wait_for_idle`](Self::wait_for_idle)
/// and [`shutdown`](Self::shutdown).
pub struct PlaybackController {
    shared: Arc<Shared>,
    calibrator: Arc<dyn Calibrator>,
    idle_poll_interval: Duration,
    thread: Option<JoinHandle<()>>,
}

impl PlaybackController {
    /// Start the playback thread.
    pub fn spawn(
        config: PlaybackConfig,
        parts: PlaybackParts,
    ) -> Result<(Self, PlaybackEventReceiver), VoiceError> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                state: PlaybackState::Idle,
                queue: VecDeque::new(),
                in_flight: false,
                running: true,
            }),
            wake: Condvar::new(),
            epoch: AtomicU64::new(0),
            events: event_tx,
        });

        let calibrator = Arc::clone(&parts.calibrator);
        let mut worker = PlaybackWorker {
            shared: Arc::clone(&shared),
            device: parts.device,
            synthesizer: parts.synthesizer,
            reference: parts.reference,
            calibrator: parts.calibrator,
            metrics: parts.metrics,
            sample_rate: config.sample_rate,
        };

        let thread = std::thread::Builder::new()
            .name("duplex-playback".into())
            .spawn(move || worker.run())
            .map_err(|e| VoiceError::ThreadSpawn(e.to_string()))?;

        info!(sample_rate = config.sample_rate, "Playback controller started");

        Ok((
            Self {
                shared,
                calibrator,
                idle_poll_interval: config.idle_poll_interval,
                thread: Some(thread),
            },
            event_rx,
        ))
    }

    /// Queue text for synthesis and playback. Blank text is ignored.
    pub fn enqueue(&self, text: impl Into<String>) {
        let text = text.into();
        if text.trim().is_empty() {
            debug!("Ignoring blank utterance");
            return;
        }
        let Some(mut inner) = self.shared.lock() else {
            return;
        };
        if !inner.running {
            return;
        }
        let epoch = self.shared.epoch();
        inner.queue.push_back(QueuedUtterance { text, epoch });
        debug!(queued = inner.queue.len(), "Utterance queued");
        self.shared.wake.notify_all();
    }

    /// Queue text and measure acoustic delay while it plays.
    pub fn enqueue_with_calibration(&self, text: impl Into<String>) {
        self.calibrator.request();
        info!("Delay calibration queued for next playback");
        self.enqueue(text);
    }

    /// Playing → Paused. Returns whether the transition happened.
    pub fn pause(&self) -> bool {
        self.transition(PlaybackState::Playing, PlaybackState::Paused)
    }

    /// Paused → Playing. Returns whether the transition happened.
    pub fn resume(&self) -> bool {
        self.transition(PlaybackState::Paused, PlaybackState::Playing)
    }

    fn transition(&self, from: PlaybackState, to: PlaybackState) -> bool {
        let Some(mut inner) = self.shared.lock() else {
            return false;
        };
        if inner.state != from {
            return false;
        }
        inner.set_state(to, &self.shared.events);
        self.shared.wake.notify_all();
        true
    }

    /// Drop the current utterance and everything queued before this call.
    ///
    /// Fire-and-forget: completion is observable as the state settling back
    /// to Idle.
    pub fn discard(&self) {
        let Some(mut inner) = self.shared.lock() else {
            return;
        };
        let epoch = self.shared.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        inner.set_state(PlaybackState::Discarding, &self.shared.events);
        self.shared.wake.notify_all();
        info!(epoch, "Playback discard requested");
    }

    /// Poll until the queue is empty, nothing is in flight and the state is
    /// Idle, or until `timeout` elapses. A timeout too large to represent
    /// as an instant waits without a deadline.
    pub fn wait_for_idle(&self, timeout: Duration) -> IdleWait {
        let deadline = Instant::now().checked_add(timeout);
        loop {
            if self.is_idle() {
                return IdleWait::Idle;
            }
            let mut nap = self.idle_poll_interval;
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    return IdleWait::TimedOut;
                }
                nap = nap.min(deadline - now);
            }
            std::thread::sleep(nap);
        }
    }

    fn is_idle(&self) -> bool {
        self.shared.lock().is_some_and(|inner| {
            inner.queue.is_empty() && !inner.in_flight && inner.state == PlaybackState::Idle
        })
    }

    #[must_use]
    pub fn state(&self) -> PlaybackState {
        self.shared
            .lock()
            .map_or(PlaybackState::Idle, |inner| inner.state)
    }

    /// Utterances waiting behind the current one.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.shared.lock().map_or(0, |inner| inner.queue.len())
    }

    /// Number of discards so far.
    #[must_use]
    pub fn discard_epoch(&self) -> u64 {
        self.shared.epoch()
    }

    /// Stop the playback thread, discarding anything in flight.
    pub fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        if let Some(mut inner) = self.shared.lock() {
            inner.running = false;
            self.shared.epoch.fetch_add(1, Ordering::AcqRel);
            self.shared.wake.notify_all();
        }
        if thread.join().is_err() {
            error!("Playback thread panicked");
        }
        info!("Playback controller stopped");
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ── Playback thread ────────────────────────────────────────────────

/// How one utterance ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Finished,
    /// `played` is true once any chunk may have reached the device.
    Discarded { played: bool },
    Failed,
    /// Synthesis failed; nothing was played.
    Skipped,
}

enum ChunkLoop {
    Complete,
    Discarded,
    Failed(DeviceError),
}

struct PlaybackWorker {
    shared: Arc<Shared>,
    device: Box<dyn PlaybackDevice>,
    synthesizer: Box<dyn SpeechSynthesizer>,
    reference: Arc<dyn EchoReference>,
    calibrator: Arc<dyn Calibrator>,
    metrics: Arc<dyn MetricsSink>,
    sample_rate: u32,
}

impl PlaybackWorker {
    fn run(&mut self) {
        debug!("Playback thread running");
        while let Some(utterance) = self.next_utterance() {
            let outcome = self.play(&utterance);
            self.settle(outcome);
        }
        debug!("Playback thread exiting");
    }

    /// Block until there is something to play. `None` on shutdown.
    ///
    /// Also settles discards that arrive while nothing is playing.
    fn next_utterance(&self) -> Option<QueuedUtterance> {
        let mut inner = self.shared.lock()?;
        loop {
            if !inner.running {
                return None;
            }

            let epoch = self.shared.epoch();
            let purged = inner.purge_stale(epoch);
            if inner.state == PlaybackState::Discarding {
                inner.set_state(PlaybackState::Idle, &self.shared.events);
            }
            if purged > 0 {
                debug!(purged, "Dropped queued utterances");
                emit(&self.shared.events, PlaybackEvent::Discarded);
            }

            if let Some(utterance) = inner.queue.pop_front() {
                inner.in_flight = true;
                return Some(utterance);
            }

            inner = self.shared.wake.wait(inner).ok()?;
        }
    }

    fn play(&mut self, utterance: &QueuedUtterance) -> Outcome {
        let synthesis = match self.synthesizer.synthesize(&utterance.text) {
            Ok(synthesis) => synthesis,
            Err(error) => {
                warn!(%error, "Speech synthesis failed, skipping utterance");
                emit(&self.shared.events, PlaybackEvent::SynthesisFailed { error });
                return Outcome::Skipped;
            }
        };

        if synthesis.sample_rate != self.sample_rate {
            let error = SynthesisError::SampleRateMismatch {
                expected: self.sample_rate,
                actual: synthesis.sample_rate,
            };
            warn!(%error, "Synthesized audio not at working rate, skipping utterance");
            emit(&self.shared.events, PlaybackEvent::SynthesisFailed { error });
            return Outcome::Skipped;
        }

        if self.shared.epoch() != utterance.epoch {
            debug!("Utterance discarded during synthesis");
            return Outcome::Discarded { played: false };
        }

        let realtime_factor = synthesis.realtime_factor();
        let synthesis_ms = synthesis.synthesis_time.as_secs_f64() * 1000.0;
        self.metrics.record(metric_names::SYNTHESIS_MS, synthesis_ms);
        self.metrics.record(metric_names::SYNTHESIS_RTF, realtime_factor);
        info!(
            samples = synthesis.samples.len(),
            synthesis_ms,
            realtime_factor,
            "Speech synthesized"
        );
        emit(
            &self.shared.events,
            PlaybackEvent::AudioReady {
                samples: synthesis.samples.len(),
                sample_rate: synthesis.sample_rate,
                synthesis_time: synthesis.synthesis_time,
                realtime_factor,
            },
        );

        if !self.begin_playing(utterance.epoch) {
            debug!("Utterance discarded before playback started");
            return Outcome::Discarded { played: false };
        }

        if self.calibrator.is_pending() {
            self.calibrator.start();
            info!("Delay calibration started");
        }
        self.reference.on_playback_start();

        match self.write_chunks(&synthesis.samples, utterance.epoch) {
            ChunkLoop::Complete => {
                if let Err(e) = self.device.drain() {
                    warn!(error = %e, "Playback drain failed");
                }
                if self.shared.epoch() != utterance.epoch {
                    return Outcome::Discarded { played: true };
                }
                self.finish_calibration();
                self.reference.on_playback_stop();
                emit(&self.shared.events, PlaybackEvent::Finished);
                debug!("Utterance finished");
                Outcome::Finished
            }
            ChunkLoop::Discarded => Outcome::Discarded { played: true },
            ChunkLoop::Failed(error) => {
                error!(%error, "Fatal playback device error, abandoning utterance");
                self.abandon_calibration();
                self.reference.on_playback_stop();
                emit(&self.shared.events, PlaybackEvent::Failed { error });
                Outcome::Failed
            }
        }
    }

    /// Idle → Playing, once per utterance. False if the utterance went stale.
    fn begin_playing(&self, epoch: u64) -> bool {
        let Some(mut inner) = self.shared.lock() else {
            return false;
        };
        if !inner.running
            || inner.state == PlaybackState::Discarding
            || self.shared.epoch() != epoch
        {
            return false;
        }
        inner.set_state(PlaybackState::Playing, &self.shared.events);
        true
    }

    /// The per-chunk write loop.
    fn write_chunks(&mut self, samples: &[Sample], epoch: u64) -> ChunkLoop {
        let chunk = self.device.period_frames().max(1);
        let mut cursor = 0;

        while cursor < samples.len() {
            // (a)/(b): check state under the lock, parking while paused.
            let Some(resumed) = self.wait_until_writable(epoch) else {
                return ChunkLoop::Discarded;
            };
            if resumed {
                if let Err(e) = self.device.recover(DeviceError::Underrun) {
                    warn!(error = %e, "Stream prepare after resume failed");
                }
            }

            // (c): blocking write with the lock released.
            let end = (cursor + chunk).min(samples.len());
            let pending = &samples[cursor..end];
            let result = self.device.write(pending);

            // (d): the device may have been flushed while we were writing.
            if self.shared.epoch() != epoch {
                debug!("Discard landed during device write, dropping chunk");
                return ChunkLoop::Discarded;
            }

            match result {
                Ok(0) => {
                    debug!(samples = pending.len(), "Device accepted nothing, skipping chunk");
                    cursor = end;
                }
                Ok(written) => {
                    let written = written.min(pending.len());
                    self.reference.add_reference(&pending[..written]);
                    cursor += written;
                }
                Err(e) if e.is_recoverable() => {
                    warn!(error = %e, "Recoverable playback error, recovering");
                    if let Err(re) = self.device.recover(e) {
                        if !re.is_recoverable() {
                            return ChunkLoop::Failed(re);
                        }
                        warn!(error = %re, "Playback recovery reported an error");
                    }
                    cursor = end;
                }
                Err(e) => return ChunkLoop::Failed(e),
            }
        }

        ChunkLoop::Complete
    }

    /// Returns `Some(resumed)` when the next chunk may be written, `None`
    /// when the utterance must stop.
    fn wait_until_writable(&self, epoch: u64) -> Option<bool> {
        let mut inner = self.shared.lock()?;
        let mut resumed = false;
        loop {
            if !inner.running
                || inner.state == PlaybackState::Discarding
                || self.shared.epoch() != epoch
            {
                return None;
            }
            if inner.state != PlaybackState::Paused {
                return Some(resumed);
            }
            if !resumed {
                debug!("Playback parked while paused");
            }
            resumed = true;
            inner = self.shared.wake.wait(inner).ok()?;
        }
    }

    /// Side effects after an utterance, then back to Idle.
    fn settle(&mut self, outcome: Outcome) {
        if let Outcome::Discarded { played } = outcome {
            if played {
                // Immediate silence: drop, never drain, then re-prepare.
                if let Err(e) = self.device.drop_pending() {
                    warn!(error = %e, "Playback drop failed");
                }
                if let Err(e) = self.device.recover(DeviceError::Underrun) {
                    warn!(error = %e, "Stream prepare after discard failed");
                }
                self.reference.clear_reference();
                self.abandon_calibration();
                self.reference.on_playback_stop();
            }
            info!(played, "Utterance discarded");
            emit(&self.shared.events, PlaybackEvent::Discarded);
        }

        let Some(mut inner) = self.shared.lock() else {
            return;
        };
        let purged = inner.purge_stale(self.shared.epoch());
        if purged > 0 {
            debug!(purged, "Dropped queued utterances");
        }
        inner.set_state(PlaybackState::Idle, &self.shared.events);
        inner.in_flight = false;
    }

    fn finish_calibration(&self) {
        if !self.calibrator.is_running() {
            return;
        }
        match self.calibrator.finish() {
            Ok(outcome) => {
                info!(
                    delay_ms = outcome.delay_ms,
                    correlation = outcome.correlation,
                    "Delay calibration succeeded"
                );
                self.reference.set_delay_hint_ms(outcome.delay_ms);
                self.metrics.record(metric_names::CALIBRATION_SUCCESS, 1.0);
                self.metrics
                    .record(metric_names::CALIBRATION_DELAY_MS, f64::from(outcome.delay_ms));
                self.metrics
                    .record(metric_names::CALIBRATION_CORRELATION, outcome.correlation);
            }
            Err(e) => {
                warn!(error = %e, "Delay calibration failed, keeping current delay hint");
                self.metrics.record(metric_names::CALIBRATION_SUCCESS, 0.0);
            }
        }
    }

    /// A measurement over a cut-short utterance is meaningless.
    fn abandon_calibration(&self) {
        if self.calibrator.is_running() {
            match self.calibrator.finish() {
                Ok(outcome) => debug!(
                    delay_ms = outcome.delay_ms,
                    "Delay calibration abandoned, measurement ignored"
                ),
                Err(e) => debug!(error = %e, "Delay calibration abandoned"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duplex_core::{CalibrationError, CalibrationOutcome, Synthesis};
    use mockall::{Sequence, mock};

    mock! {
        Cal {}
        impl Calibrator for Cal {
            fn request(&self);
            fn is_pending(&self) -> bool;
            fn start(&self);
            fn is_running(&self) -> bool;
            fn finish(&self) -> Result<CalibrationOutcome, CalibrationError>;
        }
    }

    const RATE: u32 = 16_000;

    #[derive(Default)]
    struct RecordedMetrics(Mutex<Vec<(&'static str, f64)>>);

    impl RecordedMetrics {
        fn named(&self, name: &str) -> Vec<f64> {
            self.0
                .lock()
                .unwrap()
                .iter()
                .filter(|(n, _)| *n == name)
                .map(|&(_, v)| v)
                .collect()
        }
    }

    impl MetricsSink for RecordedMetrics {
        fn record(&self, name: &'static str, value: f64) {
            self.0.lock().unwrap().push((name, value));
        }
    }

    #[derive(Default)]
    struct DelayHints(Mutex<Vec<u32>>);

    impl EchoReference for DelayHints {
        fn add_reference(&self, _samples: &[Sample]) {}
        fn clear_reference(&self) {}
        fn set_delay_hint_ms(&self, delay_ms: u32) {
            self.0.lock().unwrap().push(delay_ms);
        }
    }

    struct InstantDevice;

    impl PlaybackDevice for InstantDevice {
        fn write(&mut self, samples: &[Sample]) -> Result<usize, DeviceError> {
            Ok(samples.len())
        }
        fn recover(&mut self, _error: DeviceError) -> Result<(), DeviceError> {
            Ok(())
        }
        fn drop_pending(&mut self) -> Result<(), DeviceError> {
            Ok(())
        }
        fn drain(&mut self) -> Result<(), DeviceError> {
            Ok(())
        }
        fn period_frames(&self) -> usize {
            160
        }
    }

    struct BrokenDevice;

    impl PlaybackDevice for BrokenDevice {
        fn write(&mut self, _samples: &[Sample]) -> Result<usize, DeviceError> {
            Err(DeviceError::Io)
        }
        fn recover(&mut self, _error: DeviceError) -> Result<(), DeviceError> {
            Ok(())
        }
        fn drop_pending(&mut self) -> Result<(), DeviceError> {
            Ok(())
        }
        fn drain(&mut self) -> Result<(), DeviceError> {
            Ok(())
        }
        fn period_frames(&self) -> usize {
            160
        }
    }

    struct FixedSynth;

    impl SpeechSynthesizer for FixedSynth {
        fn synthesize(&mut self, _text: &str) -> Result<Synthesis, SynthesisError> {
            Ok(Synthesis {
                samples: vec![1000; 1600],
                sample_rate: RATE,
                synthesis_time: Duration::from_millis(20),
            })
        }
    }

    fn config() -> PlaybackConfig {
        PlaybackConfig {
            sample_rate: RATE,
            idle_poll_interval: Duration::from_millis(1),
        }
    }

    #[test]
    fn calibration_is_sequenced_around_the_utterance() {
        let mut seq = Sequence::new();
        let mut cal = MockCal::new();
        cal.expect_request()
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        cal.expect_is_pending()
            .times(1)
            .in_sequence(&mut seq)
            .return_const(true);
        cal.expect_start()
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        cal.expect_is_running()
            .times(1)
            .in_sequence(&mut seq)
            .return_const(true);
        cal.expect_finish()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| {
                Ok(CalibrationOutcome {
                    delay_ms: 90,
                    correlation: 0.75,
                })
            });

        let metrics = Arc::new(RecordedMetrics::default());
        let hints = Arc::new(DelayHints::default());
        let parts = PlaybackParts::new(Box::new(InstantDevice), Box::new(FixedSynth))
            .with_calibrator(Arc::new(cal))
            .with_metrics(Arc::clone(&metrics) as Arc<dyn MetricsSink>)
            .with_reference(Arc::clone(&hints) as Arc<dyn EchoReference>);
        let (controller, _events) = PlaybackController::spawn(config(), parts).unwrap();

        controller.enqueue_with_calibration("hello");
        assert_eq!(controller.wait_for_idle(Duration::from_secs(5)), IdleWait::Idle);

        assert_eq!(*hints.0.lock().unwrap(), vec![90]);
        assert_eq!(metrics.named(metric_names::CALIBRATION_SUCCESS), vec![1.0]);
        assert_eq!(metrics.named(metric_names::CALIBRATION_DELAY_MS), vec![90.0]);
        assert_eq!(metrics.named(metric_names::CALIBRATION_CORRELATION), vec![0.75]);
        assert_eq!(metrics.named(metric_names::SYNTHESIS_MS).len(), 1);
        assert_eq!(metrics.named(metric_names::SYNTHESIS_RTF).len(), 1);
    }

    #[test]
    fn failed_calibration_keeps_delay_hint() {
        let mut cal = MockCal::new();
        cal.expect_is_pending().times(1).return_const(true);
        cal.expect_start().times(1).return_const(());
        cal.expect_is_running().times(1).return_const(true);
        cal.expect_finish()
            .times(1)
            .returning(|| Err(CalibrationError::LowCorrelation(0.1)));

        let metrics = Arc::new(RecordedMetrics::default());
        let hints = Arc::new(DelayHints::default());
        let parts = PlaybackParts::new(Box::new(InstantDevice), Box::new(FixedSynth))
            .with_calibrator(Arc::new(cal))
            .with_metrics(Arc::clone(&metrics) as Arc<dyn MetricsSink>)
            .with_reference(Arc::clone(&hints) as Arc<dyn EchoReference>);
        let (controller, _events) = PlaybackController::spawn(config(), parts).unwrap();

        controller.enqueue("hello");
        assert_eq!(controller.wait_for_idle(Duration::from_secs(5)), IdleWait::Idle);

        assert!(hints.0.lock().unwrap().is_empty());
        assert_eq!(metrics.named(metric_names::CALIBRATION_SUCCESS), vec![0.0]);
        assert!(metrics.named(metric_names::CALIBRATION_DELAY_MS).is_empty());
    }

    #[test]
    fn calibration_over_a_failed_utterance_is_abandoned() {
        let mut cal = MockCal::new();
        cal.expect_is_pending().times(1).return_const(true);
        cal.expect_start().times(1).return_const(());
        cal.expect_is_running().times(1).return_const(true);
        cal.expect_finish()
            .times(1)
            .returning(|| Err(CalibrationError::LowCorrelation(0.2)));

        let metrics = Arc::new(RecordedMetrics::default());
        let hints = Arc::new(DelayHints::default());
        let parts = PlaybackParts::new(Box::new(BrokenDevice), Box::new(FixedSynth))
            .with_calibrator(Arc::new(cal))
            .with_metrics(Arc::clone(&metrics) as Arc<dyn MetricsSink>)
            .with_reference(Arc::clone(&hints) as Arc<dyn EchoReference>);
        let (controller, _events) = PlaybackController::spawn(config(), parts).unwrap();

        controller.enqueue("hello");
        assert_eq!(controller.wait_for_idle(Duration::from_secs(5)), IdleWait::Idle);

        assert!(hints.0.lock().unwrap().is_empty());
        assert!(metrics.named(metric_names::CALIBRATION_SUCCESS).is_empty());
        assert_eq!(metrics.named(metric_names::SYNTHESIS_MS).len(), 1);
    }

    #[test]
    fn unbounded_idle_wait_does_not_overflow() {
        let parts = PlaybackParts::new(Box::new(InstantDevice), Box::new(FixedSynth));
        let (controller, _events) = PlaybackController::spawn(config(), parts).unwrap();

        assert_eq!(controller.wait_for_idle(Duration::MAX), IdleWait::Idle);
        controller.enqueue("hello");
        assert_eq!(controller.wait_for_idle(Duration::MAX), IdleWait::Idle);
    }

    #[test]
    fn no_calibration_without_request() {
        let mut cal = MockCal::new();
        cal.expect_is_pending().times(2).return_const(false);
        cal.expect_is_running().times(2).return_const(false);

        let parts = PlaybackParts::new(Box::new(InstantDevice), Box::new(FixedSynth))
            .with_calibrator(Arc::new(cal));
        let (controller, _events) = PlaybackController::spawn(config(), parts).unwrap();

        controller.enqueue("one");
        controller.enqueue("two");
        assert_eq!(controller.wait_for_idle(Duration::from_secs(5)), IdleWait::Idle);
    }

    #[test]
    fn blank_text_is_ignored() {
        let parts = PlaybackParts::new(Box::new(InstantDevice), Box::new(FixedSynth));
        let (controller, _events) = PlaybackController::spawn(config(), parts).unwrap();

        controller.enqueue("   ");
        assert_eq!(controller.queue_len(), 0);
        assert_eq!(controller.wait_for_idle(Duration::ZERO), IdleWait::Idle);
    }

    #[test]
    fn pause_and_resume_require_matching_state() {
        let parts = PlaybackParts::new(Box::new(InstantDevice), Box::new(FixedSynth));
        let (controller, _events) = PlaybackController::spawn(config(), parts).unwrap();

        assert!(!controller.pause(), "cannot pause while idle");
        assert!(!controller.resume(), "cannot resume while idle");
        assert_eq!(controller.state(), PlaybackState::Idle);
    }

    #[test]
    fn shutdown_is_idempotent() {
        let parts = PlaybackParts::new(Box::new(InstantDevice), Box::new(FixedSynth));
        let (mut controller, _events) = PlaybackController::spawn(config(), parts).unwrap();

        controller.shutdown();
        controller.shutdown();
        controller.enqueue("ignored after shutdown");
        assert_eq!(controller.queue_len(), 0);
    }

    #[test]
    fn config_from_settings_clamps_poll_interval() {
        let mut settings = DuplexSettings::with_defaults();
        settings.playback.idle_poll_interval_ms = 0;
        let config = PlaybackConfig::from_settings(&settings);
        assert_eq!(config.idle_poll_interval, Duration::from_millis(1));
        assert_eq!(config.sample_rate, 48_000);
    }
}
