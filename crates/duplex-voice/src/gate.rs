//! Envelope gate that suppresses low-level residual echo between speech bursts.
//!
//! Applied strictly after echo cancellation, and only to frames the native
//! engine actually processed. Passthrough frames are never gated.
//!
//! ```text
//!            env > thr                 gain = 1.0
//!   Closed ───────────► Attack ─────────────────────► Open
//!     ▲                  │  ▲                          │
//!     │       env ≤ thr  │  │ env > thr                │ env ≤ thr
//!     │                  ▼  │                          ▼
//!     │                 Hold ◄─────────────────────────┘
//!     │                  │   ▲ env > thr (gain = 1.0 → Open)
//!     │   counter = 0    ▼   │
//!     └──────────────── Release ── env > thr ──► Attack
//!        gain = floor
//! ```
//!
//! The envelope is a peak follower with separate rise and fall
//! coefficients, `1 - exp(-2.2 / samples)` (about three time constants to
//! settle). Gain moves linearly: up by `1 / attack_samples` per sample in
//! Attack, down by `1 / release_samples` in Release, and holds still in
//! Hold. Gain never leaves `[floor, 1.0]`.

use duplex_core::{GateSettings, Sample, db_to_linear, ms_to_samples};

/// Gate state machine position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GateState {
    Closed,
    Attack,
    Open,
    Hold,
    Release,
}

/// Five-state envelope-following noise gate.
#[derive(Debug, Clone)]
pub struct EnvelopeGate {
    threshold: f32,
    floor: f32,
    attack_coeff: f32,
    release_coeff: f32,
    attack_step: f32,
    release_step: f32,
    hold_samples: usize,

    state: GateState,
    envelope: f32,
    gain: f32,
    hold_counter: usize,
}

fn time_to_coeff(samples: f32) -> f32 {
    1.0 - (-2.2 / samples).exp()
}

impl EnvelopeGate {
    /// Build a gate for `sample_rate`. Tuning values are clamped into range
    /// (with a warning) before coefficients are derived.
    #[must_use]
    pub fn new(settings: &GateSettings, sample_rate: u32) -> Self {
        let settings = settings.clone().clamped();

        let attack_samples = ms_to_samples(settings.attack_ms, sample_rate).max(1.0);
        let release_samples = ms_to_samples(settings.release_ms, sample_rate).max(1.0);
        let hold_samples = ms_to_samples(settings.hold_ms, sample_rate) as usize;
        let floor = db_to_linear(settings.floor_db).clamp(0.0, 1.0);

        tracing::debug!(
            threshold = settings.threshold,
            attack_samples,
            hold_samples,
            release_samples,
            floor,
            "Envelope gate configured"
        );

        Self {
            threshold: settings.threshold,
            floor,
            attack_coeff: time_to_coeff(attack_samples),
            release_coeff: time_to_coeff(release_samples),
            attack_step: 1.0 / attack_samples,
            release_step: 1.0 / release_samples,
            hold_samples,
            state: GateState::Closed,
            envelope: 0.0,
            gain: floor,
            hold_counter: 0,
        }
    }

    #[must_use]
    pub const fn state(&self) -> GateState {
        self.state
    }

    /// Current linear gain.
    #[must_use]
    pub const fn gain(&self) -> f32 {
        self.gain
    }

    /// Linear gain applied while fully closed.
    #[must_use]
    pub const fn floor(&self) -> f32 {
        self.floor
    }

    #[must_use]
    pub const fn envelope(&self) -> f32 {
        self.envelope
    }

    /// Back to Closed at floor gain with an empty envelope.
    pub fn reset(&mut self) {
        self.state = GateState::Closed;
        self.envelope = 0.0;
        self.gain = self.floor;
        self.hold_counter = 0;
    }

    /// Gate a frame in place.
    pub fn process(&mut self, frame: &mut [Sample]) {
        for sample in frame {
            let gain = self.advance(f32::from(*sample).abs());
            *sample = (f32::from(*sample) * gain)
                .round()
                .clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as Sample;
        }
    }

    /// Feed one rectified sample and return the gain to apply to it.
    fn advance(&mut self, level: f32) -> f32 {
        let coeff = if level > self.envelope {
            self.attack_coeff
        } else {
            self.release_coeff
        };
        self.envelope += coeff * (level - self.envelope);
        let above = self.envelope > self.threshold;

        match self.state {
            GateState::Closed => {
                if above {
                    self.state = GateState::Attack;
                    self.ramp_up();
                }
            }
            GateState::Attack => {
                if above {
                    self.ramp_up();
                } else {
                    self.enter_hold();
                }
            }
            GateState::Open => {
                if !above {
                    self.enter_hold();
                }
            }
            GateState::Hold => {
                if above {
                    // A hold entered mid-attack resumes the ramp.
                    self.state = if self.gain >= 1.0 {
                        GateState::Open
                    } else {
                        GateState::Attack
                    };
                } else if self.hold_counter == 0 {
                    self.state = GateState::Release;
                    self.ramp_down();
                } else {
                    self.hold_counter -= 1;
                }
            }
            GateState::Release => {
                if above {
                    self.state = GateState::Attack;
                    self.ramp_up();
                } else {
                    self.ramp_down();
                }
            }
        }

        self.gain
    }

    fn enter_hold(&mut self) {
        self.state = GateState::Hold;
        self.hold_counter = self.hold_samples;
    }

    fn ramp_up(&mut self) {
        self.gain += self.attack_step;
        if self.gain >= 1.0 {
            self.gain = 1.0;
            self.state = GateState::Open;
        }
    }

    fn ramp_down(&mut self) {
        self.gain -= self.release_step;
        if self.gain <= self.floor {
            self.gain = self.floor;
            self.state = GateState::Closed;
        }
    }
}
