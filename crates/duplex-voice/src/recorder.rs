//! Debug WAV recording of the three echo-cancellation streams.
//!
//! One session per playback: `aec_mic_*`, `aec_ref_*` and `aec_out_*`
//! files, mono 16-bit at the working rate, timestamped `%Y%m%d_%H%M%S`.
//! Loading the three into an editor side by side shows alignment and how
//! much echo survived.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

use duplex_core::Sample;
use hound::{SampleFormat, WavSpec, WavWriter};

use crate::error::VoiceError;

/// Which stream a block of samples belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStream {
    /// Raw microphone capture.
    Mic,
    /// Reference audio mirrored from playback.
    Reference,
    /// Engine output.
    Output,
}

/// Paths of one finished recording session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingFiles {
    pub mic: PathBuf,
    pub reference: PathBuf,
    pub output: PathBuf,
}

type Writer = WavWriter<BufWriter<File>>;

struct Session {
    files: RecordingFiles,
    mic: Writer,
    reference: Writer,
    output: Writer,
    started: Instant,
}

impl Session {
    const fn writer(&mut self, stream: RecordStream) -> &mut Writer {
        match stream {
            RecordStream::Mic => &mut self.mic,
            RecordStream::Reference => &mut self.reference,
            RecordStream::Output => &mut self.output,
        }
    }
}

/// Writes mic / reference / output WAV files while a session is open.
///
/// `session` is the only lock the capture path takes. Opening files happens
/// under `opening` so the capture thread never waits on the filesystem.
pub struct DebugRecorder {
    directory: PathBuf,
    sample_rate: u32,
    opening: Mutex<()>,
    session: Mutex<Option<Session>>,
}

impl std::fmt::Debug for DebugRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugRecorder")
            .field("directory", &self.directory)
            .field("sample_rate", &self.sample_rate)
            .field("recording", &self.is_recording())
            .finish()
    }
}

impl DebugRecorder {
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>, sample_rate: u32) -> Self {
        Self {
            directory: directory.into(),
            sample_rate,
            opening: Mutex::new(()),
            session: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.session.lock().is_ok_and(|s| s.is_some())
    }

    /// Open a session. Does nothing if one is already open.
    ///
    /// Returns the new session's file paths, or `None` if already recording.
    pub fn start(&self) -> Result<Option<RecordingFiles>, VoiceError> {
        let Ok(_opening) = self.opening.lock() else {
            return Ok(None);
        };
        if self.is_recording() {
            return Ok(None);
        }

        let session = self.open_session()?;
        let files = session.files.clone();
        match self.session.lock() {
            Ok(mut guard) => *guard = Some(session),
            Err(_) => return Ok(None),
        }

        tracing::info!(mic = %files.mic.display(), "Echo debug recording started");
        Ok(Some(files))
    }

    fn open_session(&self) -> Result<Session, VoiceError> {
        fs::create_dir_all(&self.directory)?;
        let files = self.next_files();
        let spec = WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };

        Ok(Session {
            mic: WavWriter::create(&files.mic, spec)?,
            reference: WavWriter::create(&files.reference, spec)?,
            output: WavWriter::create(&files.output, spec)?,
            files,
            started: Instant::now(),
        })
    }

    /// Append samples to one stream. Ignored while no session is open.
    ///
    /// A write failure closes the session.
    pub fn write(&self, stream: RecordStream, samples: &[Sample]) {
        let Ok(mut guard) = self.session.lock() else {
            return;
        };
        let Some(session) = guard.as_mut() else {
            return;
        };

        let writer = session.writer(stream);
        let result = samples.iter().try_for_each(|&s| writer.write_sample(s));
        if let Err(e) = result {
            tracing::warn!(
                ?stream,
                error = %e,
                "Echo debug recording write failed, closing session"
            );
            if let Some(session) = guard.take() {
                let _ = Self::finish(session);
            }
        }
    }

    /// Close the session, finalizing WAV headers.
    ///
    /// Returns the files written, or `None` if nothing was recording.
    pub fn stop(&self) -> Result<Option<RecordingFiles>, VoiceError> {
        let session = match self.session.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        session.map(Self::finish).transpose()
    }

    fn finish(session: Session) -> Result<RecordingFiles, VoiceError> {
        let rate = f64::from(session.mic.spec().sample_rate);
        let seconds = |w: &Writer| f64::from(w.len()) / rate;
        let (mic_s, ref_s, out_s) = (
            seconds(&session.mic),
            seconds(&session.reference),
            seconds(&session.output),
        );
        let wall_s = session.started.elapsed().as_secs_f64();

        session.mic.finalize()?;
        session.reference.finalize()?;
        session.output.finalize()?;

        tracing::info!(
            mic_s,
            ref_s,
            out_s,
            wall_s,
            "Echo debug recording stopped"
        );
        Ok(session.files)
    }

    fn next_files(&self) -> RecordingFiles {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
        let build = |suffix: &str| RecordingFiles {
            mic: self.directory.join(format!("aec_mic_{stamp}{suffix}.wav")),
            reference: self.directory.join(format!("aec_ref_{stamp}{suffix}.wav")),
            output: self.directory.join(format!("aec_out_{stamp}{suffix}.wav")),
        };

        let mut files = build("");
        let mut n = 1;
        while files.mic.exists() {
            files = build(&format!("_{n}"));
            n += 1;
        }
        files
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(path: &Path) -> Vec<i16> {
        hound::WavReader::open(path)
            .unwrap()
            .into_samples::<i16>()
            .map(Result::unwrap)
            .collect()
    }

    #[test]
    fn writes_three_mono_files_per_session() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = DebugRecorder::new(dir.path(), 16_000);

        let files = recorder.start().unwrap().expect("session opened");
        assert!(recorder.is_recording());

        recorder.write(RecordStream::Mic, &[1, 2, 3]);
        recorder.write(RecordStream::Reference, &[4, 5]);
        recorder.write(RecordStream::Output, &[6]);

        let stopped = recorder.stop().unwrap().expect("session closed");
        assert_eq!(stopped, files);
        assert!(!recorder.is_recording());

        assert_eq!(read_all(&files.mic), vec![1, 2, 3]);
        assert_eq!(read_all(&files.reference), vec![4, 5]);
        assert_eq!(read_all(&files.output), vec![6]);

        let spec = hound::WavReader::open(&files.mic).unwrap().spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 16_000);
        assert_eq!(spec.bits_per_sample, 16);

        let name = files.reference.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("aec_ref_") && name.ends_with(".wav"));
    }

    #[test]
    fn start_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = DebugRecorder::new(dir.path(), 48_000);

        assert!(recorder.start().unwrap().is_some());
        assert!(recorder.start().unwrap().is_none());
        recorder.stop().unwrap();
    }

    #[test]
    fn concurrent_starts_open_a_single_session() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = DebugRecorder::new(dir.path(), 16_000);
        let barrier = std::sync::Barrier::new(4);

        let opened = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        recorder.start().unwrap()
                    })
                })
                .collect();
            handles
                .into_iter()
                .filter_map(|h| h.join().unwrap())
                .count()
        });

        assert_eq!(opened, 1);
        recorder.write(RecordStream::Mic, &[7; 160]);
        let files = recorder.stop().unwrap().unwrap();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 3);
        assert_eq!(read_all(&files.mic), vec![7; 160]);
    }

    #[test]
    fn writes_without_session_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = DebugRecorder::new(dir.path(), 48_000);

        recorder.write(RecordStream::Mic, &[1, 2, 3]);
        assert!(recorder.stop().unwrap().is_none());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn back_to_back_sessions_get_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = DebugRecorder::new(dir.path().join("nested"), 48_000);

        let first = recorder.start().unwrap().unwrap();
        recorder.stop().unwrap();
        let second = recorder.start().unwrap().unwrap();
        recorder.stop().unwrap();

        assert_ne!(first.mic, second.mic);
        assert!(first.mic.exists() && second.mic.exists());
    }
}
