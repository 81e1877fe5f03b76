//! In-memory [`LogService`], handy for tests and for embedding the engine
//! in front of a custom producer.
//!
//! Tokens have the form `f/<n>`, where `n` is the number of events of the
//! stream that precede the next unread one. A cursor-less fetch returns the
//! newest events of the stream.

use std::collections::HashMap;
use std::io;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::service::{Cursor, FetchRequest, LogEvent, LogGroup, LogService, LogStream, Page};

pub const DEFAULT_PAGE_SIZE: usize = 10_000;

type StreamKey = (String, String);

#[derive(Debug, Default)]
struct StreamData {
    events: Vec<LogEvent>,
    fetches: usize,
    fail_at: Vec<usize>,
    requests: Vec<(Option<String>, Option<usize>)>,
    issued: Vec<String>,
}

#[derive(Debug)]
struct Inner {
    /// Group names in insertion order, each with its stream names.
    groups: Vec<(String, Vec<String>)>,
    streams: HashMap<StreamKey, StreamData>,
    page_size: usize,
    repeat_stale: bool,
    fail_discovery: bool,
    group_listings: usize,
}

/// Scriptable in-memory log service.
#[derive(Debug)]
pub struct MemoryService {
    inner: Mutex<Inner>,
}

impl Default for MemoryService {
    fn default() -> Self {
        Self::new()
    }
}

fn key(group: &str, stream: &str) -> StreamKey {
    (group.to_string(), stream.to_string())
}

impl MemoryService {
    pub fn new() -> Self {
        MemoryService {
            inner: Mutex::new(Inner {
                groups: Vec::new(),
                streams: HashMap::new(),
                page_size: DEFAULT_PAGE_SIZE,
                repeat_stale: false,
                fail_discovery: false,
                group_listings: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Registers a group without streams, if it does not exist yet.
    pub fn add_group(&self, group: &str) {
        let mut inner = self.lock();
        if !inner.groups.iter().any(|(name, _)| name == group) {
            inner.groups.push((group.to_string(), Vec::new()));
        }
    }

    /// Registers a stream (and its group) if it does not exist yet.
    pub fn add_stream(&self, group: &str, stream: &str) {
        self.add_group(group);

        let mut inner = self.lock();
        if let Some((_, streams)) = inner.groups.iter_mut().find(|(name, _)| name == group) {
            if !streams.iter().any(|name| name == stream) {
                streams.push(stream.to_string());
            }
        }
        inner.streams.entry(key(group, stream)).or_default();
    }

    /// Removes a stream from discovery. Its events stay fetchable.
    pub fn remove_stream(&self, group: &str, stream: &str) {
        let mut inner = self.lock();
        if let Some((_, streams)) = inner.groups.iter_mut().find(|(name, _)| name == group) {
            streams.retain(|name| name != stream);
        }
    }

    /// Appends events to a stream, creating it if needed.
    pub fn push_events(&self, group: &str, stream: &str, events: Vec<LogEvent>) {
        self.add_stream(group, stream);

        let mut inner = self.lock();
        if let Some(data) = inner.streams.get_mut(&key(group, stream)) {
            data.events.extend(events);
        }
    }

    /// Maximum number of events returned per page.
    pub fn set_page_size(&self, page_size: usize) {
        self.lock().page_size = page_size.max(1);
    }

    /// When set, a fetch with nothing new returns the events just before
    /// the cursor again, together with the unchanged token.
    pub fn repeat_last_page(&self, repeat: bool) {
        self.lock().repeat_stale = repeat;
    }

    /// Makes the `call`-th fetch (1-based) of the stream fail.
    pub fn fail_fetch_at(&self, group: &str, stream: &str, call: usize) {
        self.add_stream(group, stream);

        let mut inner = self.lock();
        if let Some(data) = inner.streams.get_mut(&key(group, stream)) {
            data.fail_at.push(call);
        }
    }

    /// Makes every discovery call fail while set.
    pub fn fail_discovery(&self, fail: bool) {
        self.lock().fail_discovery = fail;
    }

    /// Number of `list_groups` calls served so far.
    pub fn group_listings(&self) -> usize {
        self.lock().group_listings
    }

    /// Number of fetches issued against a stream so far.
    pub fn fetch_count(&self, group: &str, stream: &str) -> usize {
        self.lock()
            .streams
            .get(&key(group, stream))
            .map_or(0, |data| data.fetches)
    }

    /// Cursor and limit of every fetch against a stream, in call order.
    pub fn requests(&self, group: &str, stream: &str) -> Vec<(Option<String>, Option<usize>)> {
        self.lock()
            .streams
            .get(&key(group, stream))
            .map_or_else(Vec::new, |data| data.requests.clone())
    }

    /// Tokens returned by every successful fetch against a stream.
    pub fn issued_tokens(&self, group: &str, stream: &str) -> Vec<String> {
        self.lock()
            .streams
            .get(&key(group, stream))
            .map_or_else(Vec::new, |data| data.issued.clone())
    }
}

fn parse_token(cursor: &Cursor) -> io::Result<usize> {
    cursor
        .as_str()
        .strip_prefix("f/")
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Invalid token: {}", cursor),
            )
        })
}

#[async_trait]
impl LogService for MemoryService {
    async fn list_groups(&self) -> io::Result<Vec<LogGroup>> {
        let mut inner = self.lock();
        inner.group_listings += 1;
        if inner.fail_discovery {
            return Err(io::Error::new(io::ErrorKind::Other, "Discovery unavailable"));
        }

        Ok(inner
            .groups
            .iter()
            .map(|(name, _)| LogGroup::new(name.as_str()))
            .collect())
    }

    async fn list_streams(&self, group: &LogGroup) -> io::Result<Vec<LogStream>> {
        let inner = self.lock();
        if inner.fail_discovery {
            return Err(io::Error::new(io::ErrorKind::Other, "Discovery unavailable"));
        }

        inner
            .groups
            .iter()
            .find(|(name, _)| name == group.name())
            .map(|(_, streams)| streams.iter().map(|s| LogStream::new(s.as_str())).collect())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("No such log group: {}", group),
                )
            })
    }

    async fn fetch_events(&self, request: FetchRequest<'_>) -> io::Result<Page> {
        let mut inner = self.lock();
        let page_size = inner.page_size;
        let repeat_stale = inner.repeat_stale;

        let data = inner
            .streams
            .get_mut(&key(request.group.name(), request.stream.name()))
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("No such log stream: {}/{}", request.group, request.stream),
                )
            })?;

        data.fetches += 1;
        data.requests
            .push((request.cursor.map(|c| c.to_string()), request.limit));
        if data.fail_at.contains(&data.fetches) {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("Injected failure on fetch {}", data.fetches),
            ));
        }

        let len = data.events.len();
        let (start, end) = match request.cursor {
            None => {
                let limit = request.limit.unwrap_or(page_size).min(page_size);
                (len.saturating_sub(limit), len)
            }
            Some(cursor) => {
                let pos = parse_token(cursor)?.min(len);
                (pos, (pos + page_size).min(len))
            }
        };

        let events = if start == end && repeat_stale {
            data.events[start.saturating_sub(page_size)..start].to_vec()
        } else {
            data.events[start..end].to_vec()
        };

        let token = format!("f/{}", end);
        data.issued.push(token.clone());

        Ok(Page {
            events,
            next_token: Cursor::new(token),
        })
    }
}
