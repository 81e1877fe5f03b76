//! Error type shared by every part of the engine.

use std::fmt;
use std::io;

use thiserror::Error;

/// Which of the two name patterns an error refers to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PatternKind {
    Group,
    Stream,
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PatternKind::Group => f.write_str("group"),
            PatternKind::Stream => f.write_str("stream"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid {kind} pattern `{pattern}`: {source}")]
    Pattern {
        kind: PatternKind,
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("Invalid start time `{input}`: {reason}")]
    StartTime { input: String, reason: String },
    #[error("Discovery failed while {what}: {source}")]
    Discovery {
        what: String,
        #[source]
        source: io::Error,
    },
    #[error("Fetch failed for group: '{group}', stream: '{stream}': {source}")]
    Fetch {
        group: String,
        stream: String,
        #[source]
        source: io::Error,
    },
    #[error("Output sink closed")]
    SinkClosed,
    #[error("Error writing line: {0}")]
    Sink(#[from] io::Error),
}

impl Error {
    /// Returns `true` for errors that must stop the whole run rather than a
    /// single tailer.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Pattern { .. } | Error::StartTime { .. } | Error::Discovery { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
