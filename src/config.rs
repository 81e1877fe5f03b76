//! Run configuration, built once and shared read-only.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};

/// Number of events requested by a tailer's first, cursor-less fetch.
pub const DEFAULT_FIRST_PAGE_LIMIT: usize = 100;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_CYCLE_DELAY: Duration = Duration::from_secs(10);

/// When the orchestrator moves on to the next discovery cycle.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CyclePolicy {
    /// Wait until every tailer of the cycle has ended (which only happens
    /// on fetch errors), then sleep `cycle_delay` and rediscover.
    UntilAllEnded,
    /// Rediscover on a fixed period. Tailers of pairs that are no longer
    /// selected are cancelled, newly selected pairs get a tailer, and
    /// tailers still selected keep their cursor.
    Rediscover(Duration),
}

impl Default for CyclePolicy {
    fn default() -> Self {
        CyclePolicy::UntilAllEnded
    }
}

#[derive(Clone, Debug)]
pub struct TailConfig {
    /// Regex applied to group names. Empty selects all groups.
    pub group_pattern: String,
    /// Regex applied to stream names. Empty selects all streams.
    pub stream_pattern: String,
    /// Only events strictly after this instant are emitted.
    pub start_time: Option<SystemTime>,
    /// Idle time between two fetches of one tailer.
    pub poll_interval: Duration,
    pub cycle_policy: CyclePolicy,
    /// Pause between cycles under [`CyclePolicy::UntilAllEnded`].
    pub cycle_delay: Duration,
    pub first_page_limit: usize,
    /// Upper bound on fetch calls in flight across all tailers.
    pub max_concurrent_fetches: Option<usize>,
}

impl Default for TailConfig {
    fn default() -> Self {
        TailConfig {
            group_pattern: String::new(),
            stream_pattern: String::new(),
            start_time: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            cycle_policy: CyclePolicy::default(),
            cycle_delay: DEFAULT_CYCLE_DELAY,
            first_page_limit: DEFAULT_FIRST_PAGE_LIMIT,
            max_concurrent_fetches: None,
        }
    }
}

impl TailConfig {
    pub fn new(group_pattern: impl Into<String>, stream_pattern: impl Into<String>) -> Self {
        TailConfig {
            group_pattern: group_pattern.into(),
            stream_pattern: stream_pattern.into(),
            ..Self::default()
        }
    }

    pub fn with_start_time(mut self, start_time: Option<SystemTime>) -> Self {
        self.start_time = start_time;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_cycle_policy(mut self, policy: CyclePolicy) -> Self {
        self.cycle_policy = policy;
        self
    }

    pub fn with_cycle_delay(mut self, delay: Duration) -> Self {
        self.cycle_delay = delay;
        self
    }

    pub fn with_first_page_limit(mut self, limit: usize) -> Self {
        self.first_page_limit = limit;
        self
    }

    pub fn with_max_concurrent_fetches(mut self, max: Option<usize>) -> Self {
        self.max_concurrent_fetches = max;
        self
    }

    /// The start time as epoch milliseconds, the unit event timestamps use.
    pub fn start_floor(&self) -> Option<i64> {
        self.start_time.map(epoch_millis)
    }
}

pub(crate) fn epoch_millis(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => after.as_millis() as i64,
        Err(before) => -(before.duration().as_millis() as i64),
    }
}

/// Parses a user supplied start time relative to `now`.
///
/// Accepted forms:
/// - empty: no start time
/// - `now`
/// - a duration before `now`, e.g. `15m`, `2h 30m`, `1day ago`
/// - an RFC 3339 timestamp, e.g. `2024-03-01T12:00:00Z` (`T` and `Z` optional)
/// - epoch milliseconds, e.g. `1709294400000`
pub fn parse_start_time(input: &str, now: SystemTime) -> Result<Option<SystemTime>> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.eq_ignore_ascii_case("now") {
        return Ok(Some(now));
    }

    let invalid = |reason: String| Error::StartTime {
        input: input.to_string(),
        reason,
    };

    if trimmed.bytes().all(|b| b.is_ascii_digit()) {
        let millis: u64 = trimmed
            .parse()
            .map_err(|e: std::num::ParseIntError| invalid(e.to_string()))?;
        return Ok(Some(UNIX_EPOCH + Duration::from_millis(millis)));
    }

    let relative = trimmed
        .strip_suffix("ago")
        .map(str::trim_end)
        .unwrap_or(trimmed);
    if let Ok(ago) = humantime::parse_duration(relative) {
        return now
            .checked_sub(ago)
            .filter(|t| t.duration_since(UNIX_EPOCH).is_ok())
            .map(Some)
            .ok_or_else(|| invalid("duration reaches before the epoch".to_string()));
    }

    humantime::parse_rfc3339_weak(trimmed)
        .map(Some)
        .map_err(|e| invalid(e.to_string()))
}
