//! Audio output device port.

use crate::audio::Sample;
use crate::error::DeviceError;

/// Blocking PCM output device at the working rate.
///
/// Owned by the playback thread; nothing else calls it. Implementations
/// map every backend failure onto the closed [`DeviceError`] set.
pub trait PlaybackDevice: Send {
    /// Write interleaved mono samples, blocking until the device accepts
    /// them. Returns the number of samples written, which may be short.
    fn write(&mut self, samples: &[Sample]) -> Result<usize, DeviceError>;

    /// Re-prepare the stream after `error`. Called after recoverable write
    /// errors, after a discard flush and after resuming from pause.
    fn recover(&mut self, error: DeviceError) -> Result<(), DeviceError>;

    /// Drop buffered audio immediately (barge-in path).
    fn drop_pending(&mut self) -> Result<(), DeviceError>;

    /// Block until buffered audio has played out (natural end of utterance).
    fn drain(&mut self) -> Result<(), DeviceError>;

    /// Samples per write chunk.
    fn period_frames(&self) -> usize;
}
