//! Incremental fetching of a single (group, stream) pair.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::config::{TailConfig, DEFAULT_FIRST_PAGE_LIMIT, DEFAULT_POLL_INTERVAL};
use crate::error::{Error, Result};
use crate::service::{Cursor, FetchRequest, LogGroup, LogService, LogStream};
use crate::sink::{Line, LineSink};

/// Where a tailer is in its fetch loop.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TailState {
    /// Started, nothing fetched yet.
    Init,
    /// Waiting on, or about to issue, a fetch.
    Fetching,
    /// Handing a page's events to the sink.
    Emitting,
    /// The fetch loop is over, either on error or cancellation.
    Ended,
}

/// Per-tailer settings, derived from the run's [`TailConfig`].
#[derive(Clone)]
pub struct TailOptions {
    pub start_floor: Option<i64>,
    pub first_page_limit: usize,
    pub poll_interval: Duration,
    /// Shared bound on concurrent fetches, if any.
    pub limiter: Option<Arc<Semaphore>>,
}

impl fmt::Debug for TailOptions {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TailOptions")
            .field("start_floor", &self.start_floor)
            .field("first_page_limit", &self.first_page_limit)
            .field("poll_interval", &self.poll_interval)
            .field("limited", &self.limiter.is_some())
            .finish()
    }
}

impl Default for TailOptions {
    fn default() -> Self {
        TailOptions {
            start_floor: None,
            first_page_limit: DEFAULT_FIRST_PAGE_LIMIT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            limiter: None,
        }
    }
}

impl TailOptions {
    pub fn from_config(config: &TailConfig, limiter: Option<Arc<Semaphore>>) -> Self {
        TailOptions {
            start_floor: config.start_floor(),
            first_page_limit: config.first_page_limit,
            poll_interval: config.poll_interval,
            limiter,
        }
    }
}

/// Live state of one tailer.
#[derive(Clone, Debug)]
pub struct TailSession {
    group: LogGroup,
    stream: LogStream,
    cursor: Option<Cursor>,
    /// Fixed for the whole session.
    start_floor: Option<i64>,
    state: TailState,
}

impl TailSession {
    pub fn group(&self) -> &LogGroup {
        &self.group
    }

    pub fn stream(&self) -> &LogStream {
        &self.stream
    }

    pub fn cursor(&self) -> Option<&Cursor> {
        self.cursor.as_ref()
    }

    pub fn start_floor(&self) -> Option<i64> {
        self.start_floor
    }

    pub fn state(&self) -> TailState {
        self.state
    }

    fn admits(&self, timestamp: i64) -> bool {
        self.start_floor.map_or(true, |floor| timestamp > floor)
    }
}

/// Result of a single [`StreamTailer::poll`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PollOutcome {
    /// The service returned a token different from the one sent.
    pub progressed: bool,
    /// Events on the returned page.
    pub received: usize,
    /// Events handed to the sink.
    pub emitted: usize,
}

/// Follows one stream: fetches pages after its cursor, filters them by the
/// start floor and emits what survives.
pub struct StreamTailer<S> {
    service: Arc<S>,
    sink: Arc<dyn LineSink>,
    session: TailSession,
    options: TailOptions,
}

impl<S> fmt::Debug for StreamTailer<S> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("StreamTailer")
            .field("session", &self.session)
            .field("options", &self.options)
            .finish()
    }
}

impl<S: LogService> StreamTailer<S> {
    /// Creates a session for `group`/`stream` with no cursor.
    pub fn start(
        service: Arc<S>,
        sink: Arc<dyn LineSink>,
        group: LogGroup,
        stream: LogStream,
        options: TailOptions,
    ) -> Self {
        let session = TailSession {
            group,
            stream,
            cursor: None,
            start_floor: options.start_floor,
            state: TailState::Init,
        };

        StreamTailer {
            service,
            sink,
            session,
            options,
        }
    }

    pub fn session(&self) -> &TailSession {
        &self.session
    }

    /// Issues one fetch and emits whatever it brought that is new.
    ///
    /// A fetch or sink error ends the session; calling `poll` again after
    /// that keeps fetching from the last good cursor, but the orchestrator
    /// never does.
    pub async fn poll(&mut self) -> Result<PollOutcome> {
        self.session.state = TailState::Fetching;

        let page = {
            let _permit = match &self.options.limiter {
                Some(limiter) => limiter.acquire().await.ok(),
                None => None,
            };

            let request = FetchRequest {
                group: &self.session.group,
                stream: &self.session.stream,
                cursor: self.session.cursor.as_ref(),
                limit: match self.session.cursor {
                    None => Some(self.options.first_page_limit),
                    Some(_) => None,
                },
            };

            self.service.fetch_events(request).await
        };

        let page = match page {
            Ok(page) => page,
            Err(source) => {
                self.session.state = TailState::Ended;
                return Err(Error::Fetch {
                    group: self.session.group.name().to_string(),
                    stream: self.session.stream.name().to_string(),
                    source,
                });
            }
        };

        let mut outcome = PollOutcome {
            progressed: self.session.cursor.as_ref() != Some(&page.next_token),
            received: page.events.len(),
            emitted: 0,
        };

        if outcome.progressed {
            self.session.state = TailState::Emitting;

            for event in page.events {
                if !self.session.admits(event.timestamp) {
                    trace!(
                        group = %self.session.group,
                        stream = %self.session.stream,
                        timestamp = event.timestamp,
                        "skipping event at or before start time"
                    );
                    continue;
                }

                let line = Line::new(&self.session.group, &self.session.stream, event);
                if let Err(e) = self.sink.emit(line) {
                    self.session.state = TailState::Ended;
                    return Err(e);
                }
                outcome.emitted += 1;
            }
        }

        self.session.cursor = Some(page.next_token);
        self.session.state = TailState::Fetching;

        Ok(outcome)
    }

    /// Polls until cancelled or until a poll fails, sleeping
    /// `poll_interval` after every poll.
    ///
    /// Returns `Ok` only when `cancel` fired.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        info!(
            group = %self.session.group,
            stream = %self.session.stream,
            "Starting watching of stream"
        );

        let result = loop {
            let polled = tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ok(()),
                polled = self.poll() => polled,
            };

            match polled {
                Ok(outcome) => debug!(
                    group = %self.session.group,
                    stream = %self.session.stream,
                    progressed = outcome.progressed,
                    received = outcome.received,
                    emitted = outcome.emitted,
                    "polled stream"
                ),
                Err(e) => break Err(e),
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ok(()),
                _ = tokio::time::sleep(self.options.poll_interval) => {}
            }
        };

        self.session.state = TailState::Ended;

        result
    }
}
