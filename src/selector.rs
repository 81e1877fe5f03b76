//! Pattern-based selection of (group, stream) pairs.

use std::slice::Iter;

use regex::Regex;
use tracing::debug;

use crate::catalog::Catalog;
use crate::error::{Error, PatternKind, Result};
use crate::service::{LogGroup, LogService, LogStream};

/// Streams selected for one discovery cycle, grouped by log group.
///
/// Group and stream order follow the order the catalog returned them in.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SelectionSet {
    groups: Vec<(LogGroup, Vec<LogStream>)>,
}

impl SelectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, group: LogGroup, streams: Vec<LogStream>) {
        self.groups.push((group, streams));
    }

    /// Iterates over the selected groups and their streams.
    pub fn iter(&self) -> Iter<'_, (LogGroup, Vec<LogStream>)> {
        self.groups.iter()
    }

    /// Iterates over every selected (group, stream) pair.
    pub fn pairs(&self) -> impl Iterator<Item = (&LogGroup, &LogStream)> {
        self.groups
            .iter()
            .flat_map(|(group, streams)| streams.iter().map(move |stream| (group, stream)))
    }

    pub fn contains(&self, group: &LogGroup, stream: &LogStream) -> bool {
        self.pairs().any(|(g, s)| g == group && s == stream)
    }

    /// Number of matched groups, including those without matching streams.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Number of (group, stream) pairs.
    pub fn len(&self) -> usize {
        self.groups.iter().map(|(_, streams)| streams.len()).sum()
    }

    /// Returns `true` if there is nothing to tail.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_inner(self) -> Vec<(LogGroup, Vec<LogStream>)> {
        self.groups
    }
}

/// Compiled group and stream patterns.
///
/// Patterns are unanchored regular expressions: a name is selected when the
/// pattern matches anywhere in it. An empty pattern selects every name.
#[derive(Clone, Debug)]
pub struct Selector {
    group: Regex,
    stream: Regex,
}

fn compile(kind: PatternKind, pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|source| Error::Pattern {
        kind,
        pattern: pattern.to_string(),
        source,
    })
}

impl Selector {
    pub fn new(group_pattern: &str, stream_pattern: &str) -> Result<Self> {
        Ok(Selector {
            group: compile(PatternKind::Group, group_pattern)?,
            stream: compile(PatternKind::Stream, stream_pattern)?,
        })
    }

    pub fn matches_group(&self, name: &str) -> bool {
        self.group.is_match(name)
    }

    pub fn matches_stream(&self, name: &str) -> bool {
        self.stream.is_match(name)
    }

    /// Lists the catalog and builds this cycle's [`SelectionSet`].
    pub async fn select<S: LogService>(&self, catalog: &Catalog<S>) -> Result<SelectionSet> {
        let mut selection = SelectionSet::new();

        for group in catalog.groups().await? {
            if !self.matches_group(group.name()) {
                continue;
            }
            debug!(group = %group, "matched group");

            let mut matched = Vec::new();
            for stream in catalog.streams(&group).await? {
                if self.matches_stream(stream.name()) {
                    debug!(group = %group, stream = %stream, "matched stream");
                    matched.push(stream);
                }
            }
            selection.push(group, matched);
        }

        Ok(selection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryService;
    use std::sync::Arc;

    /// Every group holds the streams `web-1` and `worker-1`.
    fn catalog(group_names: &[&str]) -> Catalog<MemoryService> {
        let service = Arc::new(MemoryService::new());
        for group in group_names {
            service.add_stream(group, "web-1");
            service.add_stream(group, "worker-1");
        }
        Catalog::new(service)
    }

    fn selected_groups(selection: &SelectionSet) -> Vec<&str> {
        selection.iter().map(|(group, _)| group.name()).collect()
    }

    #[tokio::test]
    async fn test_anchored_group_pattern() {
        let selector = Selector::new("^app/", "").unwrap();
        let selection = selector
            .select(&catalog(&["app/api", "app/web", "infra/db"]))
            .await
            .unwrap();

        assert_eq!(selected_groups(&selection), vec!["app/api", "app/web"]);
        assert_eq!(selection.len(), 4);
    }

    #[tokio::test]
    async fn test_empty_patterns_select_everything() {
        let selector = Selector::new("", "").unwrap();
        let selection = selector.select(&catalog(&["a", "b/c"])).await.unwrap();

        assert_eq!(selected_groups(&selection), vec!["a", "b/c"]);
        assert_eq!(selection.len(), 4);
    }

    #[tokio::test]
    async fn test_unanchored_and_case_sensitive() {
        let selector = Selector::new("api", "worker").unwrap();
        assert!(selector.matches_group("/aws/lambda/api-prod"));
        assert!(!selector.matches_group("/aws/lambda/API-prod"));

        let selection = selector
            .select(&catalog(&["svc/api", "svc/web"]))
            .await
            .unwrap();
        let pairs: Vec<_> = selection
            .pairs()
            .map(|(g, s)| (g.name(), s.name()))
            .collect();
        assert_eq!(pairs, vec![("svc/api", "worker-1")]);
    }

    #[test]
    fn test_regex_not_glob() {
        let selector = Selector::new("app.*", "").unwrap();
        assert!(selector.matches_group("myapp"));
        assert!(!selector.matches_group("ap"));

        // In glob syntax `*.log` would be valid; as a regex it is not.
        assert!(Selector::new("*.log", "").is_err());
    }

    #[test]
    fn test_invalid_pattern_reports_kind() {
        match Selector::new("", "(unclosed") {
            Err(Error::Pattern { kind, pattern, .. }) => {
                assert_eq!(kind, PatternKind::Stream);
                assert_eq!(pattern, "(unclosed");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_no_match_is_empty_not_error() {
        let selector = Selector::new("^nothing$", "").unwrap();
        let selection = selector.select(&catalog(&["app/api"])).await.unwrap();
        assert!(selection.is_empty());
        assert_eq!(selection.group_count(), 0);
    }

    #[tokio::test]
    async fn test_matching_group_without_matching_streams() {
        let selector = Selector::new("app", "^db-").unwrap();
        let selection = selector.select(&catalog(&["app/api"])).await.unwrap();
        assert_eq!(selection.group_count(), 1);
        assert!(selection.is_empty());
    }

    #[tokio::test]
    async fn test_selection_is_exact_for_every_name() {
        let names = ["alpha", "beta", "alphabet", "gamma/alpha", "ALPHA", "al-pha"];
        let selector = Selector::new("alpha", "").unwrap();
        let selection = selector.select(&catalog(&names)).await.unwrap();

        let expected: Vec<&str> = names
            .iter()
            .copied()
            .filter(|name| name.contains("alpha"))
            .collect();
        assert_eq!(selected_groups(&selection), expected);
    }

    #[tokio::test]
    async fn test_select_against_catalog() {
        let service = Arc::new(MemoryService::new());
        service.add_stream("app/api", "i-1");
        service.add_stream("app/api", "db-1");
        service.add_stream("infra/db", "i-2");

        let selector = Selector::new("^app/", "^i-").unwrap();
        let selection = selector.select(&Catalog::new(service)).await.unwrap();

        assert!(selection.contains(&LogGroup::new("app/api"), &LogStream::new("i-1")));
        assert!(!selection.contains(&LogGroup::new("app/api"), &LogStream::new("db-1")));
        assert!(!selection.contains(&LogGroup::new("infra/db"), &LogStream::new("i-2")));
        assert_eq!(selection.len(), 1);
    }
}
