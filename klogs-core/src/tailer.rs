use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::provider::LogSourceProvider;
use crate::source::{LogEvent, SourceDescriptor, StreamOptions};

/// Why a tailer stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TailerExit {
    /// The source stream ended, e.g. the container stopped
    EndOfStream,
    /// Reading failed mid-stream. Handled like end of stream.
    ReadFailed(String),
    /// Cancelled by the session, or nobody is reading events anymore
    Cancelled,
    /// The stream could not be opened; the rest of the session carries on
    OpenFailed(String),
    /// Still waiting for a worker slot when the session ended
    NotStarted,
    /// Did not stop within the drain grace period, or panicked
    Aborted,
}

impl fmt::Display for TailerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TailerExit::EndOfStream => f.write_str("end of stream"),
            TailerExit::ReadFailed(e) => write!(f, "read failed: {}", e),
            TailerExit::Cancelled => f.write_str("cancelled"),
            TailerExit::OpenFailed(e) => write!(f, "open failed: {}", e),
            TailerExit::NotStarted => f.write_str("not started"),
            TailerExit::Aborted => f.write_str("aborted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailerReport {
    pub source: SourceDescriptor,
    pub exit: TailerExit,
    /// Lines published before stopping
    pub lines: u64,
}

impl TailerReport {
    pub fn new(source: SourceDescriptor, exit: TailerExit, lines: u64) -> Self {
        Self { source, exit, lines }
    }
}

/// Longest line published as a single event. Longer lines are split into
/// consecutive events of at most this many bytes.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Owns one source stream from open to end or cancellation
pub struct Tailer {
    source: Arc<SourceDescriptor>,
    options: StreamOptions,
    max_line_bytes: usize,
}

impl Tailer {
    pub fn new(source: SourceDescriptor, options: StreamOptions) -> Self {
        Self {
            source: Arc::new(source),
            options,
            max_line_bytes: MAX_LINE_BYTES,
        }
    }

    pub fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.max_line_bytes = max_line_bytes.max(1);
        self
    }

    pub fn source(&self) -> &SourceDescriptor {
        &self.source
    }

    /// Tail the source until it ends or `cancel` fires, publishing one event
    /// per line on `output`. Nothing is sent on `output` after this returns.
    pub async fn run(
        self,
        provider: &dyn LogSourceProvider,
        output: mpsc::Sender<LogEvent>,
        cancel: CancellationToken,
    ) -> TailerReport {
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return self.report(TailerExit::Cancelled, 0),
            opened = provider.open_log_stream(&self.source, &self.options) => opened,
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                warn!("[{}] Failed to open log stream: {}", self.source, e);
                return self.report(TailerExit::OpenFailed(e.to_string()), 0);
            }
        };
        debug!("[{}] Log stream opened", self.source);

        let mut seq = 0u64;
        let mut line = Vec::with_capacity(256);
        let exit = loop {
            line.clear();
            let mut bounded = (&mut stream).take(self.max_line_bytes as u64);
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => break TailerExit::Cancelled,
                read = bounded.read_until(b'\n', &mut line) => read,
            };
            match read {
                Ok(0) => break TailerExit::EndOfStream,
                Ok(n) if n == self.max_line_bytes && !line.ends_with(b"\n") => {
                    debug!("[{}] Splitting a line longer than {} bytes", self.source, n);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("[{}] Error reading log stream: {}", self.source, e);
                    break TailerExit::ReadFailed(e.to_string());
                }
            }

            let event = LogEvent::new(self.source.clone(), strip_delimiter(&line), seq);
            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => break TailerExit::Cancelled,
                sent = output.send(event) => sent,
            };
            if sent.is_err() {
                break TailerExit::Cancelled;
            }
            seq += 1;
        };

        drop(stream);
        debug!("[{}] Tailer stopped after {} line(s): {}", self.source, seq, exit);
        self.report(exit, seq)
    }

    fn report(&self, exit: TailerExit, lines: u64) -> TailerReport {
        TailerReport::new((*self.source).clone(), exit, lines)
    }
}

/// Strip one trailing `\n` and a `\r` right before it
fn strip_delimiter(line: &[u8]) -> Bytes {
    match line.strip_suffix(b"\n") {
        Some(line) => Bytes::copy_from_slice(line.strip_suffix(b"\r").unwrap_or(line)),
        None => Bytes::copy_from_slice(line),
    }
}
