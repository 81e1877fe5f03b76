//! The remote log-storage service, as seen by the engine.
//!
//! The engine never talks to a storage backend directly; it only needs the
//! three calls of [`LogService`]. Backends shipped with the crate are
//! [`DirectoryService`] and [`MemoryService`].
//!
//! [`DirectoryService`]: crate::DirectoryService
//! [`MemoryService`]: crate::MemoryService

use std::fmt;
use std::io;

use async_trait::async_trait;

/// A named collection of log streams.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct LogGroup {
    name: String,
}

impl LogGroup {
    pub fn new(name: impl Into<String>) -> Self {
        LogGroup { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Last `/`-separated segment of the group name, used to label lines.
    pub fn short_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }
}

impl fmt::Display for LogGroup {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// A single sequence of events inside one [`LogGroup`].
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct LogStream {
    name: String,
}

impl LogStream {
    pub fn new(name: impl Into<String>) -> Self {
        LogStream { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for LogStream {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Opaque read position handed out by the service.
///
/// The engine only ever compares cursors and passes them back; it never
/// builds one itself.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(token: impl Into<String>) -> Self {
        Cursor(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LogEvent {
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub message: String,
}

impl LogEvent {
    pub fn new(timestamp: i64, message: impl Into<String>) -> Self {
        LogEvent {
            timestamp,
            message: message.into(),
        }
    }
}

/// Arguments of a single fetch call.
#[derive(Clone, Copy, Debug)]
pub struct FetchRequest<'a> {
    pub group: &'a LogGroup,
    pub stream: &'a LogStream,
    /// `None` asks for the newest events of the stream.
    pub cursor: Option<&'a Cursor>,
    /// Page-size cap. Only set for the first, cursor-less request.
    pub limit: Option<usize>,
}

/// One page of events plus the token to continue from.
///
/// When nothing new has arrived, `next_token` equals the cursor of the
/// request that produced the page.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Page {
    pub events: Vec<LogEvent>,
    pub next_token: Cursor,
}

/// Discovery and fetch calls of a log-storage service.
///
/// Implementations are shared read-only between every tailer, so all calls
/// take `&self`.
#[async_trait]
pub trait LogService: Send + Sync + 'static {
    async fn list_groups(&self) -> io::Result<Vec<LogGroup>>;

    async fn list_streams(&self, group: &LogGroup) -> io::Result<Vec<LogStream>>;

    async fn fetch_events(&self, request: FetchRequest<'_>) -> io::Result<Page>;
}
