//! Echo reference sink port.

use crate::audio::Sample;

/// Where the playback controller mirrors audio it has handed to the device.
///
/// Implemented by the echo-cancellation engine. Calls come from the
/// playback thread and must return promptly.
pub trait EchoReference: Send + Sync {
    /// Audio that was just written to the device.
    fn add_reference(&self, samples: &[Sample]);

    /// Forget all buffered reference audio (discard path).
    fn clear_reference(&self);

    /// Apply a calibrated stream delay.
    fn set_delay_hint_ms(&self, delay_ms: u32);

    /// An utterance entered Playing.
    fn on_playback_start(&self) {}

    /// An utterance finished, was discarded or failed.
    fn on_playback_stop(&self) {}
}

/// Reference sink for playback without echo cancellation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReference;

impl EchoReference for NoopReference {
    fn add_reference(&self, _samples: &[Sample]) {}

    fn clear_reference(&self) {}

    fn set_delay_hint_ms(&self, _delay_ms: u32) {}
}
