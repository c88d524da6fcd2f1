//! Collaborator ports.
//!
//! The real-time core never talks to hardware, a synthesizer or a metrics
//! backend directly. Each of those is a trait here, implemented by adapters
//! at the composition root and by hand-written doubles in tests.
//!
//! | Port | Owner | Receiver |
//! |---|---|---|
//! | [`PlaybackDevice`] | playback thread | `&mut self` |
//! | [`SpeechSynthesizer`] | playback thread | `&mut self` |
//! | [`Calibrator`] | shared | `&self` |
//! | [`MetricsSink`] | shared | `&self` |
//! | [`EchoReference`] | shared | `&self` |

mod calibration;
mod device;
mod metrics;
mod reference;
mod synthesis;

pub use calibration::{CalibrationOutcome, Calibrator, NoopCalibrator};
pub use device::PlaybackDevice;
pub use metrics::{MetricsSink, NoopMetrics, TracingMetrics, metric_names};
pub use reference::{EchoReference, NoopReference};
pub use synthesis::{SpeechSynthesizer, Synthesis};
