//! Speech synthesis port.

use std::time::Duration;

use crate::audio::Sample;
use crate::error::SynthesisError;

/// One finished utterance handed over by the synthesizer.
#[derive(Debug, Clone, PartialEq)]
pub struct Synthesis {
    /// Mono PCM at `sample_rate`.
    pub samples: Vec<Sample>,
    pub sample_rate: u32,
    /// Wall-clock time spent synthesizing.
    pub synthesis_time: Duration,
}

impl Synthesis {
    /// Playback length of the audio.
    #[must_use]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }

    /// Synthesis time divided by audio duration. Below 1.0 is faster than
    /// real time. Zero for empty audio.
    #[must_use]
    pub fn realtime_factor(&self) -> f64 {
        let audio = self.duration().as_secs_f64();
        if audio <= 0.0 {
            return 0.0;
        }
        self.synthesis_time.as_secs_f64() / audio
    }
}

/// Text-to-speech engine producing a complete buffer per call.
pub trait SpeechSynthesizer: Send {
    /// Synthesize `text`. Blocks for the duration of synthesis.
    fn synthesize(&mut self, text: &str) -> Result<Synthesis, SynthesisError>;
}
