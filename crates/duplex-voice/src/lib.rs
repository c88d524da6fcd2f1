#![doc = include_str!(concat!(env!("OUT_DIR"), "/README_GENERATED.md"))]
#![deny(unused_crate_dependencies)]

// Only used by the integration tests
#[cfg(test)]
use proptest as _;

pub mod backend;
pub mod engine;
pub mod error;
pub mod gate;
pub mod health;
pub mod playback;
pub mod recorder;
pub mod reference;

// Re-export key types for convenience
pub use backend::{NativeEchoEngine, NativeEngineConfig, NativeError, NativeStats};
pub use engine::{EchoCancellationEngine, EngineStats};
pub use error::VoiceError;
pub use gate::{EnvelopeGate, GateState};
pub use health::{FailureMonitor, ProcessingSnapshot, ProcessingStats};
pub use playback::{
    IdleWait, PlaybackConfig, PlaybackController, PlaybackEvent, PlaybackEventReceiver,
    PlaybackParts, PlaybackState,
};
pub use recorder::{DebugRecorder, RecordStream, RecordingFiles};
pub use reference::{ReferenceDelayBuffer, ReferenceStats};
