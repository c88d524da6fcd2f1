//! In-process barge-in simulation.
//!
//! Stand-ins for the speaker, the room and the native canceller, wired to
//! the real [`PlaybackController`] and [`EchoCancellationEngine`]:
//!
//! ```text
//!   ToneSynthesizer ─► PlaybackController ─► SimulatedDevice ──► EchoPath
//!                              │ add_reference        (paced)       │ ×gain
//!                              ▼                                    ▼
//!                    EchoCancellationEngine ◄── process() ◄── capture thread
//!                       (IdealCanceller)                      (+ near-end noise)
//! ```
//!
//! The capture thread only pulls echo the engine already has reference
//! audio for, so the two FIFOs stay sample-aligned and an ideal
//! subtractive canceller removes the echo exactly.

use std::collections::VecDeque;
use std::f32::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use duplex_core::{
    DeviceError, DuplexSettings, EchoReference, FRAME_DURATION_MS, PlaybackDevice, Sample,
    SpeechSynthesizer, Synthesis, SynthesisError, TracingMetrics, frame_samples,
};
use duplex_voice::{
    EchoCancellationEngine, EngineStats, IdleWait, NativeEchoEngine, NativeEngineConfig,
    NativeError, NativeStats, PlaybackConfig, PlaybackController, PlaybackEvent,
    PlaybackEventReceiver, PlaybackParts,
};
use tracing::{debug, info, warn};

/// Spoken length per word.
const WORD_MS: u64 = 250;

/// Longest utterance the tone synthesizer produces.
const MAX_UTTERANCE_MS: u64 = 8000;

/// Capture keeps running this long after playback settles so the echo tail
/// is processed.
const CAPTURE_TAIL: Duration = Duration::from_millis(100);

// ── Room ───────────────────────────────────────────────────────────

/// One speaker sample as heard by the microphone.
fn couple(sample: Sample, gain: f32) -> Sample {
    (f32::from(sample) * gain).round() as Sample
}

/// Speaker-to-microphone coupling: attenuated audio queued in play order.
#[derive(Debug)]
pub struct EchoPath {
    gain: f32,
    pending: Mutex<VecDeque<Sample>>,
}

impl EchoPath {
    #[must_use]
    pub fn new(gain: f32) -> Self {
        Self {
            gain: gain.clamp(0.0, 1.0),
            pending: Mutex::new(VecDeque::new()),
        }
    }

    fn push(&self, samples: &[Sample]) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.extend(samples.iter().map(|&s| couple(s, self.gain)));
        }
    }

    fn clear(&self) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.clear();
        }
    }

    /// Echo samples not yet heard by the microphone.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.lock().map_or(0, |p| p.len())
    }

    /// Move one frame of echo into `out` if a whole frame is queued.
    /// Otherwise `out` is silenced and nothing is consumed.
    pub fn pop_frame(&self, out: &mut [Sample]) -> bool {
        let Ok(mut pending) = self.pending.lock() else {
            out.fill(0);
            return false;
        };
        if pending.len() < out.len() {
            out.fill(0);
            return false;
        }
        let n = out.len();
        for (dst, src) in out.iter_mut().zip(pending.drain(..n)) {
            *dst = src;
        }
        true
    }
}

// ── Device ─────────────────────────────────────────────────────────

/// Playback device that takes real time to play each chunk and leaks
/// everything it plays into an [`EchoPath`].
#[derive(Debug)]
pub struct SimulatedDevice {
    sample_rate: u32,
    period: usize,
    path: Arc<EchoPath>,
}

impl SimulatedDevice {
    /// Period of two 10 ms frames.
    #[must_use]
    pub fn new(sample_rate: u32, path: Arc<EchoPath>) -> Self {
        Self {
            sample_rate,
            period: frame_samples(sample_rate) * 2,
            path,
        }
    }
}

impl PlaybackDevice for SimulatedDevice {
    fn write(&mut self, samples: &[Sample]) -> Result<usize, DeviceError> {
        let seconds = samples.len() as f64 / f64::from(self.sample_rate);
        std::thread::sleep(Duration::from_secs_f64(seconds));
        self.path.push(samples);
        Ok(samples.len())
    }

    fn recover(&mut self, error: DeviceError) -> Result<(), DeviceError> {
        debug!(%error, "Simulated device re-prepared");
        Ok(())
    }

    fn drop_pending(&mut self) -> Result<(), DeviceError> {
        self.path.clear();
        Ok(())
    }

    fn drain(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn period_frames(&self) -> usize {
        self.period
    }
}

// ── Synthesizer ────────────────────────────────────────────────────

/// Speaks each word as a short tone burst with a silent gap.
#[derive(Debug, Clone)]
pub struct ToneSynthesizer {
    sample_rate: u32,
}

impl ToneSynthesizer {
    #[must_use]
    pub const fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }
}

impl SpeechSynthesizer for ToneSynthesizer {
    fn synthesize(&mut self, text: &str) -> Result<Synthesis, SynthesisError> {
        let started = Instant::now();
        let words = text.split_whitespace().count();
        if words == 0 {
            return Err(SynthesisError::Failed("nothing to say".into()));
        }

        let duration_ms = (words as u64 * WORD_MS).min(MAX_UTTERANCE_MS);
        let len = (u64::from(self.sample_rate) * duration_ms / 1000) as usize;
        let word_len = (u64::from(self.sample_rate) * WORD_MS / 1000) as usize;
        let pitch = 180.0 + (text.len() % 7) as f32 * 30.0;
        let rate = self.sample_rate as f32;

        let samples = (0..len)
            .map(|i| {
                // Voiced for the first 80% of each word.
                let pos = (i % word_len) as f32 / word_len as f32;
                let envelope = if pos < 0.8 { (PI * pos / 0.8).sin() } else { 0.0 };
                let phase = 2.0 * PI * pitch * i as f32 / rate;
                (8000.0 * envelope * phase.sin()) as Sample
            })
            .collect();

        Ok(Synthesis {
            samples,
            sample_rate: self.sample_rate,
            synthesis_time: started.elapsed(),
        })
    }
}

// ── Native canceller ───────────────────────────────────────────────

/// Subtracts the render frame, scaled by the room coupling, from the
/// capture frame. Exact when the two are aligned, which the simulation
/// guarantees.
#[derive(Debug)]
pub struct IdealCanceller {
    coupling: f32,
    render: Vec<Sample>,
    delay_ms: u32,
    capture_energy: f64,
    residual_energy: f64,
}

fn energy(frame: &[Sample]) -> f64 {
    frame.iter().map(|&s| f64::from(s).powi(2)).sum()
}

impl IdealCanceller {
    #[must_use]
    pub fn new(coupling: f32) -> Self {
        Self {
            coupling: coupling.clamp(0.0, 1.0),
            render: Vec::new(),
            delay_ms: 0,
            capture_energy: 0.0,
            residual_energy: 0.0,
        }
    }
}

impl NativeEchoEngine for IdealCanceller {
    fn apply_config(&mut self, config: &NativeEngineConfig) -> Result<(), NativeError> {
        self.render = vec![0; config.frame_size];
        self.delay_ms = config.delay_hint_ms;
        Ok(())
    }

    fn process_render(&mut self, frame: &mut [Sample]) -> Result<(), NativeError> {
        if frame.len() != self.render.len() {
            return Err(NativeError::new(-1, "render frame size mismatch"));
        }
        self.render.copy_from_slice(frame);
        Ok(())
    }

    fn set_stream_delay_ms(&mut self, delay_ms: u32) {
        self.delay_ms = delay_ms;
    }

    fn process_capture(&mut self, frame: &mut [Sample]) -> Result<(), NativeError> {
        if frame.len() != self.render.len() {
            return Err(NativeError::new(-1, "capture frame size mismatch"));
        }
        self.capture_energy += energy(frame);
        for (s, &r) in frame.iter_mut().zip(&self.render) {
            *s = s.saturating_sub(couple(r, self.coupling));
        }
        self.residual_energy += energy(frame);
        Ok(())
    }

    fn statistics(&self) -> NativeStats {
        let erle_db = (self.capture_energy > 0.0 && self.residual_energy > 0.0)
            .then(|| 10.0 * (self.capture_energy / self.residual_energy).log10());
        NativeStats {
            erle_db,
            delay_ms: i32::try_from(self.delay_ms).ok(),
            ..NativeStats::default()
        }
    }

    fn reset(&mut self) -> bool {
        self.render.fill(0);
        self.capture_energy = 0.0;
        self.residual_energy = 0.0;
        true
    }
}

// ── Run ────────────────────────────────────────────────────────────

/// Knobs for one simulation run.
#[derive(Debug, Clone)]
pub struct SimulationOptions {
    pub texts: Vec<String>,

    /// Discard this long after the first enqueue. `None` plays everything.
    pub barge_in: Option<Duration>,

    /// Linear speaker-to-microphone coupling.
    pub echo_gain: f32,

    /// Peak amplitude of near-end noise added to every capture frame.
    pub noise_amplitude: i16,

    /// Budget for playback to settle.
    pub timeout: Duration,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            texts: vec![
                "The quick brown fox jumps over the lazy dog".into(),
                "Say something to interrupt me".into(),
            ],
            barge_in: None,
            echo_gain: 0.6,
            noise_amplitude: 40,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Playback events seen during a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventCounts {
    pub audio_ready: usize,
    pub finished: usize,
    pub discarded: usize,
    pub failed: usize,
    pub synthesis_failed: usize,
}

/// Capture-side energy totals over frames that carried echo.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CaptureTotals {
    pub frames: u64,
    pub echo_frames: u64,
    pub mic_energy: f64,
    pub output_energy: f64,
}

impl CaptureTotals {
    /// Microphone-to-output energy ratio over echo frames, in dB.
    #[must_use]
    pub fn attenuation_db(&self) -> Option<f64> {
        if self.echo_frames == 0 || self.mic_energy <= 0.0 {
            return None;
        }
        // Fully gated output has zero energy; report against one LSB.
        let floor = self.echo_frames as f64;
        Some(10.0 * (self.mic_energy / self.output_energy.max(floor)).log10())
    }
}

/// Outcome of [`run`].
#[derive(Debug, Clone)]
pub struct SimulationReport {
    pub settled: bool,
    /// Time from `discard()` until the controller was idle again.
    pub barge_in_latency: Option<Duration>,
    pub events: EventCounts,
    pub capture: CaptureTotals,
    pub engine: EngineStats,
    pub erle_db: Option<f64>,
    /// Echo still travelling when the run ended; zero after a discard.
    pub echo_pending: usize,
}

/// Run the full pipeline once against simulated hardware.
pub fn run(settings: &DuplexSettings, options: &SimulationOptions) -> Result<SimulationReport> {
    let sample_rate = settings.engine.sample_rate;
    let engine = Arc::new(
        EchoCancellationEngine::new(
            settings,
            Box::new(IdealCanceller::new(options.echo_gain)),
        )
            .context("Failed to build echo cancellation engine")?,
    );
    let path = Arc::new(EchoPath::new(options.echo_gain));

    let parts = PlaybackParts::new(
        Box::new(SimulatedDevice::new(sample_rate, Arc::clone(&path))),
        Box::new(ToneSynthesizer::new(sample_rate)),
    )
    .with_reference(Arc::clone(&engine) as Arc<dyn EchoReference>)
    .with_metrics(Arc::new(TracingMetrics));

    let (mut controller, events) =
        PlaybackController::spawn(PlaybackConfig::from_settings(settings), parts)
            .context("Failed to start playback")?;
    let event_thread = spawn_event_logger(events)?;

    let stop = Arc::new(AtomicBool::new(false));
    let capture_thread = {
        let engine = Arc::clone(&engine);
        let path = Arc::clone(&path);
        let stop = Arc::clone(&stop);
        let noise = options.noise_amplitude;
        std::thread::Builder::new()
            .name("duplex-capture".into())
            .spawn(move || capture_loop(&engine, &path, &stop, noise))
            .context("Failed to start capture thread")?
    };

    info!(utterances = options.texts.len(), sample_rate, "Simulation started");
    for text in &options.texts {
        controller.enqueue(text.as_str());
    }

    let (settled, barge_in_latency) = match options.barge_in {
        Some(after) => {
            std::thread::sleep(after);
            let started = Instant::now();
            controller.discard();
            let settled = controller.wait_for_idle(options.timeout) == IdleWait::Idle;
            (settled, settled.then(|| started.elapsed()))
        }
        None => (controller.wait_for_idle(options.timeout) == IdleWait::Idle, None),
    };
    if !settled {
        warn!(timeout = ?options.timeout, "Playback did not settle in time");
    }

    std::thread::sleep(CAPTURE_TAIL);
    stop.store(true, Ordering::Release);
    let capture = capture_thread
        .join()
        .map_err(|_| anyhow!("capture thread panicked"))?;

    controller.shutdown();
    drop(controller);
    let events = event_thread
        .join()
        .map_err(|_| anyhow!("event thread panicked"))?;

    Ok(SimulationReport {
        settled,
        barge_in_latency,
        events,
        capture,
        engine: engine.stats(),
        erle_db: engine.erle_db(),
        echo_pending: path.pending(),
    })
}

fn spawn_event_logger(mut events: PlaybackEventReceiver) -> Result<JoinHandle<EventCounts>> {
    std::thread::Builder::new()
        .name("duplex-events".into())
        .spawn(move || {
            let mut counts = EventCounts::default();
            while let Some(event) = events.blocking_recv() {
                match &event {
                    PlaybackEvent::StateChanged(state) => info!(?state, "Playback state"),
                    PlaybackEvent::AudioReady {
                        samples,
                        realtime_factor,
                        ..
                    } => {
                        counts.audio_ready += 1;
                        info!(samples, realtime_factor, "Audio ready");
                    }
                    PlaybackEvent::Finished => counts.finished += 1,
                    PlaybackEvent::Discarded => counts.discarded += 1,
                    PlaybackEvent::Failed { error } => {
                        counts.failed += 1;
                        warn!(%error, "Playback failed");
                    }
                    PlaybackEvent::SynthesisFailed { error } => {
                        counts.synthesis_failed += 1;
                        warn!(%error, "Synthesis failed");
                    }
                }
            }
            counts
        })
        .context("Failed to start event thread")
}

/// Feed echo plus noise through the engine every 10 ms until `stop`.
fn capture_loop(
    engine: &EchoCancellationEngine,
    path: &EchoPath,
    stop: &AtomicBool,
    noise_amplitude: i16,
) -> CaptureTotals {
    let frame = engine.frame_size();
    let period = Duration::from_millis(u64::from(FRAME_DURATION_MS));
    let mut mic = vec![0; frame];
    let mut out = vec![0; frame];
    let mut totals = CaptureTotals::default();
    let mut noise = NoiseSource::new(noise_amplitude);
    let mut next = Instant::now();

    while !stop.load(Ordering::Acquire) {
        next += period;
        if let Some(wait) = next.checked_duration_since(Instant::now()) {
            std::thread::sleep(wait);
        }

        // Only take echo the engine can already see in its reference.
        let echoed =
            engine.reference_buffer().available_frame_count() > 0 && path.pop_frame(&mut mic);
        if !echoed {
            mic.fill(0);
        }
        noise.add_to(&mut mic);

        if let Err(e) = engine.process(&mic, &mut out) {
            warn!(error = %e, "Capture processing failed, stopping capture");
            break;
        }

        totals.frames += 1;
        if echoed {
            totals.echo_frames += 1;
            totals.mic_energy += energy(&mic);
            totals.output_energy += energy(&out);
        }
    }

    debug!(frames = totals.frames, echo_frames = totals.echo_frames, "Capture stopped");
    totals
}

/// Seeded near-end noise, uniform in `[-amplitude, amplitude]`.
struct NoiseSource {
    rng: StdRng,
    amplitude: i16,
}

impl NoiseSource {
    const SEED: u64 = 0x9E37_79B9;

    fn new(amplitude: i16) -> Self {
        Self {
            rng: StdRng::seed_from_u64(Self::SEED),
            amplitude: amplitude.max(0),
        }
    }

    fn add_to(&mut self, frame: &mut [Sample]) {
        if self.amplitude == 0 {
            return;
        }
        let range = -self.amplitude..=self.amplitude;
        for s in frame {
            *s = s.saturating_add(self.rng.random_range(range.clone()));
        }
    }
}
