//! Output sinks
//!
//! A sink is an append-only byte destination for one recorder instance's
//! sessions: opened when a session starts, written once per drained slot,
//! closed with the reason the session ended. The capture core never looks
//! inside a sink; container formats, storage volumes and retry policies all
//! live behind this trait.
//!
//! Hosted implementations here: a raw byte-stream file, an in-memory sink
//! for tests and dry runs, and (behind the `wav-sink` feature) a WAV
//! container sink in [`wav`].

#[cfg(feature = "wav-sink")]
pub mod wav;

#[cfg(feature = "wav-sink")]
pub use wav::WavFileSink;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::recorder::{RecorderConfig, StopReason};

/// Error type for sink operations
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// I/O error from the underlying storage
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The sink cannot accept data in its current state
    #[error("{0}")]
    Unavailable(String),
}

/// Append-only output destination for one recorder instance.
///
/// `open` and `close` bracket a session; `write` appends one drained slot's
/// bytes. A failed `write` ends the session: the core closes the sink with
/// [`StopReason::IoError`] and will not write again until the next `open`.
pub trait RecorderSink {
    /// Opens the output for a new session of the instance at `index`.
    fn open(&mut self, index: usize, config: &RecorderConfig) -> Result<(), SinkError>;

    /// Appends raw sample bytes.
    fn write(&mut self, bytes: &[u8]) -> Result<(), SinkError>;

    /// Ends the session, flushing whatever the container format requires.
    fn close(&mut self, reason: StopReason) -> Result<(), SinkError>;
}

/// Headerless byte-stream sink writing to one file.
#[derive(Debug)]
pub struct RawFileSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl RawFileSink {
    /// Creates a sink that will write to `path`. The file is created (and
    /// truncated) when a session opens, not before.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        RawFileSink {
            path: path.into(),
            writer: None,
        }
    }
}

impl RecorderSink for RawFileSink {
    fn open(&mut self, _index: usize, config: &RecorderConfig) -> Result<(), SinkError> {
        let file = File::create(&self.path)?;
        self.writer = Some(BufWriter::new(file));
        log::info!(
            "raw sink: {} capturing to {}",
            config.name,
            self.path.display()
        );
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), SinkError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| SinkError::Unavailable("no session open".into()))?;
        writer.write_all(bytes)?;
        Ok(())
    }

    fn close(&mut self, reason: StopReason) -> Result<(), SinkError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        log::info!("raw sink: {} closed ({reason:?})", self.path.display());
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemorySinkState {
    data: Vec<u8>,
    open_calls: usize,
    write_calls: usize,
    last_close: Option<StopReason>,
    session_open: bool,
    fail_open: bool,
    fail_write_at: Option<usize>,
}

/// In-memory sink for tests and dry runs.
///
/// Clones share the same captured bytes and call counts, so a copy kept
/// outside the bank can inspect what the instance wrote. Failures can be
/// injected at open time or at an exact write call.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    state: Arc<Mutex<MemorySinkState>>,
}

impl MemorySink {
    /// Creates an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every `open` fail
    pub fn with_fail_open(self) -> Self {
        self.state.lock().fail_open = true;
        self
    }

    /// Makes the `n`-th `write` call fail (1-based, counted across sessions)
    pub fn with_fail_write_at(self, n: usize) -> Self {
        self.state.lock().fail_write_at = Some(n);
        self
    }

    /// Everything written so far
    pub fn bytes(&self) -> Vec<u8> {
        self.state.lock().data.clone()
    }

    /// Number of `open` calls, including failed ones
    pub fn open_calls(&self) -> usize {
        self.state.lock().open_calls
    }

    /// Number of `write` calls, including the failed one
    pub fn write_calls(&self) -> usize {
        self.state.lock().write_calls
    }

    /// Reason passed to the most recent `close`
    pub fn last_close(&self) -> Option<StopReason> {
        self.state.lock().last_close
    }
}

impl RecorderSink for MemorySink {
    fn open(&mut self, _index: usize, _config: &RecorderConfig) -> Result<(), SinkError> {
        let mut state = self.state.lock();
        state.open_calls += 1;
        if state.fail_open {
            return Err(SinkError::Unavailable("injected open failure".into()));
        }
        state.session_open = true;
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), SinkError> {
        let mut state = self.state.lock();
        if !state.session_open {
            return Err(SinkError::Unavailable("no session open".into()));
        }
        state.write_calls += 1;
        if state.fail_write_at == Some(state.write_calls) {
            return Err(SinkError::Unavailable("injected write failure".into()));
        }
        state.data.extend_from_slice(bytes);
        Ok(())
    }

    fn close(&mut self, reason: StopReason) -> Result<(), SinkError> {
        let mut state = self.state.lock();
        state.session_open = false;
        state.last_close = Some(reason);
        Ok(())
    }
}
