//! A library providing asynchronous, multiplexed tailing of remote log
//! streams, selected by name patterns.
//!
//! Log sources are organised as *groups* holding *streams*, behind the
//! [`LogService`] trait. An [`Orchestrator`] periodically discovers the
//! groups and streams whose names match two regular expressions, runs one
//! [`StreamTailer`] per selected stream, and hands every new event to a
//! shared [`LineSink`].
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use muxtail::{channel, CyclePolicy, DirectoryService, Orchestrator, TailConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Every directory below /var/log/apps holding files is a group.
//!     let service = Arc::new(DirectoryService::new("/var/log/apps"));
//!     let config = TailConfig::new("^web/", "\\.log$")
//!         .with_cycle_policy(CyclePolicy::Rediscover(Duration::from_secs(30)));
//!
//!     let (sink, mut lines) = channel();
//!     let orchestrator = Orchestrator::new(service, config, Arc::new(sink))?;
//!
//!     let shutdown = CancellationToken::new();
//!     tokio::spawn(async move { orchestrator.run(shutdown).await });
//!
//!     // Lines of different streams interleave; each one carries its source.
//!     while let Some(line) = lines.next_line().await {
//!         println!("({}) {}", line.source_label(), line.message());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Delivery
//!
//! Within one stream, events are emitted in the order the service returns
//! them, and a page is only emitted when the service's continuation token
//! moved. A tailer that fails is not retried; a later discovery cycle
//! starts a fresh one, which begins again from the newest page and may
//! repeat events the failed one already emitted.

mod catalog;
pub mod config;
mod dir;
mod error;
mod memory;
mod orchestrator;
mod selector;
mod service;
mod sink;
mod tailer;

pub use catalog::Catalog;
pub use config::{parse_start_time, CyclePolicy, TailConfig};
pub use dir::DirectoryService;
pub use error::{Error, PatternKind, Result};
pub use memory::MemoryService;
pub use orchestrator::Orchestrator;
pub use selector::{SelectionSet, Selector};
pub use service::{Cursor, FetchRequest, LogEvent, LogGroup, LogService, LogStream, Page};
pub use sink::{channel, ChannelSink, Line, LineSink, TailedLines, WriterSink};
pub use tailer::{PollOutcome, StreamTailer, TailOptions, TailSession, TailState};

#[cfg(doctest)]
doc_comment::doctest!("../README.md");
