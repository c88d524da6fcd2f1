//! Reference delay buffer. Holds audio already handed to the speaker.
//!
//! The playback thread writes every chunk it successfully wrote to the
//! device; the echo engine pulls one 10 ms frame per capture frame. Single
//! producer, single consumer, one short critical section per call.
//!
//! ```text
//!   playback thread ──write()──► [ ring, ~2 s ] ──read_frame()──► engine
//!                                  ▲
//!                     clear() on discard / engine reset
//! ```
//!
//! A frame is only released once `delay + frame` samples are unread. With
//! the default delay of zero the buffer is a plain FIFO and alignment is
//! left to the native engine's delay estimator.

use std::sync::Mutex;

use duplex_core::Sample;

/// Diagnostic snapshot of a [`ReferenceDelayBuffer`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReferenceStats {
    /// Capacity in samples.
    pub capacity: usize,
    /// Unread samples right now.
    pub available_samples: u64,
    /// Samples written since the last `clear()`.
    pub total_written: u64,
    /// Samples consumed since the last `clear()`.
    pub total_read: u64,
    /// Frames delivered to the engine (cumulative).
    pub frames_read: u64,
    /// Reads that found too little data (cumulative).
    pub frames_empty: u64,
    /// `write()` calls (cumulative).
    pub writes: u64,
    /// Unread samples discarded because the ring was full (cumulative).
    pub dropped_samples: u64,
}

/// Fixed-capacity ring of reference audio.
#[derive(Debug)]
pub struct ReferenceDelayBuffer {
    frame_size: usize,
    delay: usize,
    line: Mutex<DelayLine>,
}

#[derive(Debug)]
struct DelayLine {
    buf: Vec<Sample>,
    write_pos: usize,
    read_pos: usize,
    total_written: u64,
    total_read: u64,
    // Survive clear()
    frames_read: u64,
    frames_empty: u64,
    writes: u64,
    dropped: u64,
}

impl DelayLine {
    fn unread(&self) -> u64 {
        self.total_written.saturating_sub(self.total_read)
    }

    fn skip(&mut self, count: usize) {
        self.read_pos = (self.read_pos + count) % self.buf.len();
        self.total_read += count as u64;
    }
}

impl ReferenceDelayBuffer {
    /// Create a buffer holding `capacity` samples, releasing `frame_size`
    /// samples per read once `delay` further samples are queued behind them.
    ///
    /// Capacity is raised to fit at least `delay` plus two frames.
    #[must_use]
    pub fn new(capacity: usize, frame_size: usize, delay: usize) -> Self {
        let frame_size = frame_size.max(1);
        let capacity = capacity.max(delay.saturating_add(frame_size.saturating_mul(2)));
        Self {
            frame_size,
            delay,
            line: Mutex::new(DelayLine {
                buf: vec![0; capacity],
                write_pos: 0,
                read_pos: 0,
                total_written: 0,
                total_read: 0,
                frames_read: 0,
                frames_empty: 0,
                writes: 0,
                dropped: 0,
            }),
        }
    }

    /// Buffer sized for `duration_ms` of audio at `sample_rate`.
    #[must_use]
    pub fn with_duration(
        sample_rate: u32,
        duration_ms: u32,
        frame_size: usize,
        delay: usize,
    ) -> Self {
        let capacity = (u64::from(sample_rate) * u64::from(duration_ms) / 1000) as usize;
        Self::new(capacity, frame_size, delay)
    }

    /// Samples released per [`read_frame`](Self::read_frame).
    #[must_use]
    pub const fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Configured hold-back in samples.
    #[must_use]
    pub const fn delay(&self) -> usize {
        self.delay
    }

    /// Append reference audio. Never blocks on the reader beyond the copy.
    ///
    /// If the unread backlog would exceed capacity the oldest unread samples
    /// are dropped and counted.
    pub fn write(&self, samples: &[Sample]) {
        if samples.is_empty() {
            return;
        }
        let Ok(mut line) = self.line.lock() else {
            return;
        };
        let capacity = line.buf.len();
        line.writes += 1;

        // Only the newest `capacity` samples of an oversized chunk can survive.
        let (skipped, samples) = if samples.len() > capacity {
            let skipped = samples.len() - capacity;
            (skipped, &samples[skipped..])
        } else {
            (0, samples)
        };
        if skipped > 0 {
            line.total_written += skipped as u64;
            line.total_read += skipped as u64;
            line.dropped += skipped as u64;
        }

        let overflow = (line.unread() as usize + samples.len()).saturating_sub(capacity);
        if overflow > 0 {
            line.skip(overflow);
            line.dropped += overflow as u64;
        }

        let start = line.write_pos;
        let first = samples.len().min(capacity - start);
        line.buf[start..start + first].copy_from_slice(&samples[..first]);
        let rest = samples.len() - first;
        if rest > 0 {
            line.buf[..rest].copy_from_slice(&samples[first..]);
        }
        line.write_pos = (start + samples.len()) % capacity;
        line.total_written += samples.len() as u64;
    }

    /// Consume one frame into `out`.
    ///
    /// Returns `true` iff at least `delay + frame_size` samples were unread.
    /// Otherwise `out` is zero-filled and nothing is consumed. Only the first
    /// `frame_size` samples of `out` are touched.
    pub fn read_frame(&self, out: &mut [Sample]) -> bool {
        let n = self.frame_size.min(out.len());
        let out = &mut out[..n];

        let Ok(mut line) = self.line.lock() else {
            out.fill(0);
            return false;
        };

        if line.unread() < (self.delay + self.frame_size) as u64 || n < self.frame_size {
            line.frames_empty += 1;
            drop(line);
            out.fill(0);
            return false;
        }

        let capacity = line.buf.len();
        let start = line.read_pos;
        let first = n.min(capacity - start);
        out[..first].copy_from_slice(&line.buf[start..start + first]);
        if first < n {
            out[first..].copy_from_slice(&line.buf[..n - first]);
        }
        line.skip(n);
        line.frames_read += 1;
        true
    }

    /// Zero the ring and reset cursors and totals.
    ///
    /// Cumulative diagnostic counters are kept.
    pub fn clear(&self) {
        if let Ok(mut line) = self.line.lock() {
            line.buf.fill(0);
            line.write_pos = 0;
            line.read_pos = 0;
            line.total_written = 0;
            line.total_read = 0;
        }
    }

    /// Whole frames that [`read_frame`](Self::read_frame) could deliver now.
    #[must_use]
    pub fn available_frame_count(&self) -> usize {
        let Ok(line) = self.line.lock() else {
            return 0;
        };
        (line.unread().saturating_sub(self.delay as u64) / self.frame_size as u64) as usize
    }

    #[must_use]
    pub fn stats(&self) -> ReferenceStats {
        let Ok(line) = self.line.lock() else {
            return ReferenceStats::default();
        };
        ReferenceStats {
            capacity: line.buf.len(),
            available_samples: line.unread(),
            total_written: line.total_written,
            total_read: line.total_read,
            frames_read: line.frames_read,
            frames_empty: line.frames_empty,
            writes: line.writes,
            dropped_samples: line.dropped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(start: i16, len: usize) -> Vec<Sample> {
        (0..len).map(|i| start + i as i16).collect()
    }

    #[test]
    fn fifo_read_requires_a_full_frame() {
        let buffer = ReferenceDelayBuffer::new(64, 4, 0);
        let mut out = [7; 4];

        buffer.write(&[1, 2, 3]);
        assert!(!buffer.read_frame(&mut out));
        assert_eq!(out, [0; 4]);

        buffer.write(&[4]);
        assert!(buffer.read_frame(&mut out));
        assert_eq!(out, [1, 2, 3, 4]);
        assert!(!buffer.read_frame(&mut out));
    }

    #[test]
    fn read_gating_holds_for_every_delay() {
        for delay in [0, 1, 3, 4, 9, 17] {
            let frame = 4;
            let buffer = ReferenceDelayBuffer::new(256, frame, delay);
            let mut out = [0; 4];

            for written in 1..=(delay + frame + 2) {
                buffer.write(&[100]);
                let before = buffer.stats();
                let unread = before.total_written - before.total_read;
                let ok = buffer.read_frame(&mut out);
                assert_eq!(
                    ok,
                    unread >= (delay + frame) as u64,
                    "delay {delay}, written {written}"
                );
                if ok {
                    assert_eq!(out, [100; 4]);
                } else {
                    assert_eq!(out, [0; 4]);
                }
            }
        }
    }

    #[test]
    fn delay_holds_back_samples_but_reads_oldest_first() {
        let buffer = ReferenceDelayBuffer::new(64, 2, 3);
        let mut out = [0; 2];

        buffer.write(&ramp(1, 4));
        assert!(!buffer.read_frame(&mut out));
        buffer.write(&[5]);
        assert!(buffer.read_frame(&mut out));
        assert_eq!(out, [1, 2]);
        assert_eq!(buffer.available_frame_count(), 0);
    }

    #[test]
    fn wraps_around_the_ring() {
        let buffer = ReferenceDelayBuffer::new(8, 4, 0);
        let mut out = [0; 4];

        buffer.write(&ramp(1, 6));
        assert!(buffer.read_frame(&mut out));
        assert_eq!(out, [1, 2, 3, 4]);

        buffer.write(&ramp(7, 6));
        assert!(buffer.read_frame(&mut out));
        assert_eq!(out, [5, 6, 7, 8]);
        assert!(buffer.read_frame(&mut out));
        assert_eq!(out, [9, 10, 11, 12]);
    }

    #[test]
    fn overflow_drops_oldest_and_counts() {
        let buffer = ReferenceDelayBuffer::new(8, 4, 0);
        let mut out = [0; 4];

        buffer.write(&ramp(1, 6));
        buffer.write(&ramp(7, 6));
        let stats = buffer.stats();
        assert_eq!(stats.dropped_samples, 4);
        assert_eq!(stats.available_samples, 8);

        assert!(buffer.read_frame(&mut out));
        assert_eq!(out, [5, 6, 7, 8]);
    }

    #[test]
    fn oversized_write_keeps_newest_samples() {
        let buffer = ReferenceDelayBuffer::new(8, 4, 0);
        let mut out = [0; 4];

        buffer.write(&ramp(1, 20));
        assert_eq!(buffer.stats().dropped_samples, 12);
        assert!(buffer.read_frame(&mut out));
        assert_eq!(out, [13, 14, 15, 16]);
        assert!(buffer.read_frame(&mut out));
        assert_eq!(out, [17, 18, 19, 20]);
    }

    #[test]
    fn clear_resets_cursors_but_keeps_cumulative_counters() {
        let buffer = ReferenceDelayBuffer::new(64, 4, 0);
        let mut out = [0; 4];

        buffer.write(&ramp(1, 8));
        assert!(buffer.read_frame(&mut out));
        assert!(!buffer.read_frame(&mut [0; 2]));

        buffer.clear();
        let stats = buffer.stats();
        assert_eq!(stats.total_written, 0);
        assert_eq!(stats.total_read, 0);
        assert_eq!(stats.available_samples, 0);
        assert_eq!(stats.frames_read, 1);
        assert_eq!(stats.frames_empty, 1);
        assert_eq!(stats.writes, 1);
        assert_eq!(buffer.available_frame_count(), 0);
        assert!(!buffer.read_frame(&mut out));
    }

    #[test]
    fn available_frames_subtract_delay() {
        let buffer = ReferenceDelayBuffer::new(128, 4, 5);
        buffer.write(&[1; 3]);
        assert_eq!(buffer.available_frame_count(), 0);
        buffer.write(&[1; 14]);
        assert_eq!(buffer.available_frame_count(), 3);
    }

    #[test]
    fn capacity_covers_delay_and_frames() {
        let buffer = ReferenceDelayBuffer::new(4, 4, 10);
        assert_eq!(buffer.stats().capacity, 18);

        let sized = ReferenceDelayBuffer::with_duration(48_000, 2000, 480, 0);
        assert_eq!(sized.stats().capacity, 96_000);
    }
}
