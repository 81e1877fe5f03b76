//! Everything related to handing emitted lines to the observer.

use std::fmt;
use std::io::{self, Write};
use std::pin::Pin;
use std::sync::Mutex;
use std::task;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::stream::Stream as FuturesStream;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::service::{LogEvent, LogGroup, LogStream};

/// A single event emitted by a tailer, tagged with where it came from.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Line {
    group: LogGroup,
    stream: String,
    /// Milliseconds since the Unix epoch.
    timestamp: i64,
    message: String,
}

impl Line {
    pub fn new(group: &LogGroup, stream: &LogStream, event: LogEvent) -> Self {
        Line {
            group: group.clone(),
            stream: stream.name().to_string(),
            timestamp: event.timestamp,
            message: event.message,
        }
    }

    pub fn group(&self) -> &str {
        self.group.name()
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Human-readable origin: last segment of the group name, then the
    /// stream name.
    pub fn source_label(&self) -> String {
        format!("{} {}", self.group.short_name(), self.stream)
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// The timestamp as a point in time. Pre-epoch values clamp to the
    /// epoch.
    pub fn time(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(self.timestamp.max(0) as u64)
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the internal components that make up a `Line`. Hidden as the
    /// return signature may change.
    #[doc(hidden)]
    pub fn into_inner(self) -> (String, String, i64, String) {
        let Line {
            group,
            stream,
            timestamp,
            message,
        } = self;

        (group.name().to_string(), stream, timestamp, message)
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {}\n{}",
            self.source_label(),
            humantime::format_rfc3339_millis(self.time()),
            self.message
        )
    }
}

/// Destination for emitted lines.
///
/// One sink is shared by every tailer, so implementations must tolerate
/// concurrent calls. Lines from different streams may interleave in any
/// order; lines from one stream arrive in the order they were fetched.
pub trait LineSink: Send + Sync + 'static {
    fn emit(&self, line: Line) -> Result<()>;
}

/// Writes each line, followed by a blank line, to a [`Write`]r.
pub struct WriterSink<W> {
    inner: Mutex<W>,
}

impl<W> fmt::Debug for WriterSink<W> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("WriterSink").finish_non_exhaustive()
    }
}

impl<W: Write> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        WriterSink {
            inner: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        match self.inner.into_inner() {
            Ok(writer) => writer,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl WriterSink<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send + 'static> LineSink for WriterSink<W> {
    fn emit(&self, line: Line) -> Result<()> {
        // Still usable after a panic elsewhere; at worst one line is torn.
        let mut writer = match self.inner.lock() {
            Ok(writer) => writer,
            Err(poisoned) => poisoned.into_inner(),
        };
        writeln!(writer, "{}\n", line)?;
        writer.flush()?;

        Ok(())
    }
}

/// Sends lines over an unbounded channel, to be read back as [`TailedLines`].
#[derive(Clone, Debug)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Line>,
}

impl LineSink for ChannelSink {
    fn emit(&self, line: Line) -> Result<()> {
        self.tx.send(line).map_err(|_| Error::SinkClosed)
    }
}

/// Receiving side of a [`ChannelSink`].
///
/// `TailedLines` implements [`futures::Stream`], yielding lines from every
/// tailer feeding the paired sink. The stream ends once every sink clone
/// has been dropped.
///
/// [`futures::Stream`]: https://docs.rs/futures/0.3/futures/stream/trait.Stream.html
#[derive(Debug)]
pub struct TailedLines {
    rx: mpsc::UnboundedReceiver<Line>,
}

impl TailedLines {
    /// Waits for the next line, returning `None` once all senders are gone.
    pub async fn next_line(&mut self) -> Option<Line> {
        self.rx.recv().await
    }

    /// Drains lines that are already buffered without waiting.
    pub fn drain(&mut self) -> Vec<Line> {
        let mut lines = Vec::new();
        while let Ok(line) = self.rx.try_recv() {
            lines.push(line);
        }
        lines
    }
}

impl FuturesStream for TailedLines {
    type Item = Line;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Creates a connected [`ChannelSink`] and [`TailedLines`] pair.
pub fn channel() -> (ChannelSink, TailedLines) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelSink { tx }, TailedLines { rx })
}
