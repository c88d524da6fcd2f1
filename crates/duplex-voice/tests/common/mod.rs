//! Hand-written collaborators shared by the integration tests.
//!
//! No audio hardware, synthesis model or native echo canceller is needed;
//! everything here completes instantly unless a test asks it to block.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use duplex_core::{
    DeviceError, EchoReference, PlaybackDevice, Sample, SpeechSynthesizer, Synthesis,
    SynthesisError,
};
use duplex_voice::{
    NativeEchoEngine, NativeEngineConfig, NativeError, NativeStats, PlaybackController,
    PlaybackEvent, PlaybackState,
};

pub const RATE: u32 = 16_000;
pub const PERIOD: usize = 160;

// ── Device ─────────────────────────────────────────────────────────

/// Every call the controller made on the device, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCall {
    Write(usize),
    Recover(DeviceError),
    DropPending,
    Drain,
}

/// Blocks one write until the test releases it.
pub struct WriteBlock {
    /// Zero-based index of the write to block.
    pub at_write: usize,
    pub entered: mpsc::Sender<()>,
    pub release: mpsc::Receiver<()>,
}

/// Test-side handles for a [`WriteBlock`].
pub struct WriteBlockHandle {
    pub entered: mpsc::Receiver<()>,
    pub release: mpsc::Sender<()>,
}

pub fn write_block(at_write: usize) -> (WriteBlock, WriteBlockHandle) {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    (
        WriteBlock {
            at_write,
            entered: entered_tx,
            release: release_rx,
        },
        WriteBlockHandle {
            entered: entered_rx,
            release: release_tx,
        },
    )
}

/// Device double with a shared call log, optional pacing, scripted write
/// results and an optional blocking write.
pub struct ScriptedDevice {
    log: Arc<Mutex<Vec<DeviceCall>>>,
    write_delay: Duration,
    results: VecDeque<Option<DeviceError>>,
    block: Option<WriteBlock>,
    writes: usize,
}

impl ScriptedDevice {
    pub fn new() -> (Self, Arc<Mutex<Vec<DeviceCall>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                log: Arc::clone(&log),
                write_delay: Duration::ZERO,
                results: VecDeque::new(),
                block: None,
                writes: 0,
            },
            log,
        )
    }

    /// Sleep this long inside every write, like a real-time device.
    pub fn paced(mut self, delay: Duration) -> Self {
        self.write_delay = delay;
        self
    }

    /// Script the next writes: `None` succeeds, `Some(err)` fails.
    pub fn with_results(mut self, results: impl IntoIterator<Item = Option<DeviceError>>) -> Self {
        self.results = results.into_iter().collect();
        self
    }

    pub fn with_block(mut self, block: WriteBlock) -> Self {
        self.block = Some(block);
        self
    }

    fn push(&self, call: DeviceCall) {
        self.log.lock().unwrap().push(call);
    }
}

impl PlaybackDevice for ScriptedDevice {
    fn write(&mut self, samples: &[Sample]) -> Result<usize, DeviceError> {
        let index = self.writes;
        self.writes += 1;
        self.push(DeviceCall::Write(samples.len()));

        if let Some(block) = &self.block {
            if block.at_write == index {
                let _ = block.entered.send(());
                let _ = block.release.recv_timeout(Duration::from_secs(5));
            }
        }
        if !self.write_delay.is_zero() {
            std::thread::sleep(self.write_delay);
        }

        match self.results.pop_front().flatten() {
            Some(err) => Err(err),
            None => Ok(samples.len()),
        }
    }

    fn recover(&mut self, error: DeviceError) -> Result<(), DeviceError> {
        self.push(DeviceCall::Recover(error));
        Ok(())
    }

    fn drop_pending(&mut self) -> Result<(), DeviceError> {
        self.push(DeviceCall::DropPending);
        Ok(())
    }

    fn drain(&mut self) -> Result<(), DeviceError> {
        self.push(DeviceCall::Drain);
        Ok(())
    }

    fn period_frames(&self) -> usize {
        PERIOD
    }
}

pub fn writes(log: &Arc<Mutex<Vec<DeviceCall>>>) -> usize {
    log.lock()
        .unwrap()
        .iter()
        .filter(|c| matches!(c, DeviceCall::Write(_)))
        .count()
}

pub fn calls(log: &Arc<Mutex<Vec<DeviceCall>>>) -> Vec<DeviceCall> {
    log.lock().unwrap().clone()
}

// ── Synthesizer ────────────────────────────────────────────────────

/// Returns a square-ish tone of fixed length for any text. Text containing
/// "fail" produces a synthesis error.
pub struct ToneSynthesizer {
    samples: usize,
    sample_rate: u32,
    calls: Arc<AtomicUsize>,
}

impl ToneSynthesizer {
    pub fn new(duration: Duration) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                samples: duration.as_millis() as usize * RATE as usize / 1000,
                sample_rate: RATE,
                calls: Arc::clone(&calls),
            },
            calls,
        )
    }

    /// Report audio at another rate.
    pub fn at_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }
}

impl SpeechSynthesizer for ToneSynthesizer {
    fn synthesize(&mut self, text: &str) -> Result<Synthesis, SynthesisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if text.contains("fail") {
            return Err(SynthesisError::Failed(format!("cannot say {text:?}")));
        }
        let samples = (0..self.samples)
            .map(|i| if (i / 20) % 2 == 0 { 4000 } else { -4000 })
            .collect();
        Ok(Synthesis {
            samples,
            sample_rate: self.sample_rate,
            synthesis_time: Duration::from_millis(3),
        })
    }
}

// ── Echo reference ─────────────────────────────────────────────────

/// Records what the controller mirrored and when it cleared.
#[derive(Debug, Default)]
pub struct RecordingReference {
    pub chunks: Mutex<Vec<usize>>,
    pub clears: AtomicUsize,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub delay_hints: Mutex<Vec<u32>>,
}

impl RecordingReference {
    pub fn total_samples(&self) -> usize {
        self.chunks.lock().unwrap().iter().sum()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.lock().unwrap().len()
    }
}

impl EchoReference for RecordingReference {
    fn add_reference(&self, samples: &[Sample]) {
        self.chunks.lock().unwrap().push(samples.len());
    }

    fn clear_reference(&self) {
        self.clears.fetch_add(1, Ordering::SeqCst);
    }

    fn set_delay_hint_ms(&self, delay_ms: u32) {
        self.delay_hints.lock().unwrap().push(delay_ms);
    }

    fn on_playback_start(&self) {
        self.starts.fetch_add(1, Ordering::SeqCst);
    }

    fn on_playback_stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Native echo engine ─────────────────────────────────────────────

/// Controls shared with a [`ScriptedNativeEngine`] after it is boxed.
#[derive(Debug, Default)]
pub struct NativeControls {
    pub fail: AtomicBool,
    pub reject_config: AtomicBool,
    pub supports_reset: AtomicBool,
    pub resets: AtomicUsize,
    pub render_frames: AtomicUsize,
    pub capture_frames: AtomicUsize,
    pub last_delay_ms: Mutex<Option<u32>>,
    pub report_stats: AtomicBool,
}

/// Ideal canceller: subtracts the last render frame from the capture frame.
pub struct ScriptedNativeEngine {
    controls: Arc<NativeControls>,
    last_render: Vec<Sample>,
}

impl ScriptedNativeEngine {
    pub fn new() -> (Self, Arc<NativeControls>) {
        let controls = Arc::new(NativeControls::default());
        (
            Self {
                controls: Arc::clone(&controls),
                last_render: Vec::new(),
            },
            controls,
        )
    }
}

impl NativeEchoEngine for ScriptedNativeEngine {
    fn apply_config(&mut self, config: &NativeEngineConfig) -> Result<(), NativeError> {
        if self.controls.reject_config.load(Ordering::SeqCst) {
            return Err(NativeError::new(-6, "unsupported configuration"));
        }
        self.last_render = vec![0; config.frame_size];
        Ok(())
    }

    fn process_render(&mut self, frame: &mut [Sample]) -> Result<(), NativeError> {
        self.controls.render_frames.fetch_add(1, Ordering::SeqCst);
        self.last_render.copy_from_slice(frame);
        Ok(())
    }

    fn set_stream_delay_ms(&mut self, delay_ms: u32) {
        *self.controls.last_delay_ms.lock().unwrap() = Some(delay_ms);
    }

    fn process_capture(&mut self, frame: &mut [Sample]) -> Result<(), NativeError> {
        self.controls.capture_frames.fetch_add(1, Ordering::SeqCst);
        if self.controls.fail.load(Ordering::SeqCst) {
            return Err(NativeError::new(-11, "scripted failure"));
        }
        for (s, r) in frame.iter_mut().zip(&self.last_render) {
            *s = s.saturating_sub(*r);
        }
        Ok(())
    }

    fn statistics(&self) -> NativeStats {
        if !self.controls.report_stats.load(Ordering::SeqCst) {
            return NativeStats::default();
        }
        NativeStats {
            erle_db: Some(24.5),
            residual_echo_likelihood: Some(0.05),
            ..NativeStats::default()
        }
    }

    fn reset(&mut self) -> bool {
        if !self.controls.supports_reset.load(Ordering::SeqCst) {
            return false;
        }
        self.controls.resets.fetch_add(1, Ordering::SeqCst);
        self.last_render.fill(0);
        true
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// Drain all pending events from the event receiver and return them.
pub fn drain_events(
    rx: &mut tokio::sync::mpsc::UnboundedReceiver<PlaybackEvent>,
) -> Vec<PlaybackEvent> {
    let mut events = Vec::new();
    while let Ok(e) = rx.try_recv() {
        events.push(e);
    }
    events
}

/// Collect only the state values from `StateChanged` events.
pub fn states_from(events: &[PlaybackEvent]) -> Vec<PlaybackState> {
    events
        .iter()
        .filter_map(|e| {
            if let PlaybackEvent::StateChanged(s) = e {
                Some(*s)
            } else {
                None
            }
        })
        .collect()
}

/// Poll until the controller reports `state`, or panic after `timeout`.
pub fn wait_for_state(controller: &PlaybackController, state: PlaybackState, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while controller.state() != state {
        assert!(
            Instant::now() < deadline,
            "timed out waiting for {state:?}, still {:?}",
            controller.state()
        );
        std::thread::sleep(Duration::from_millis(1));
    }
}
