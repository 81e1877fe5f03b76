//! A [`LogService`] backed by a directory tree.
//!
//! Every directory below the root that contains regular files is a log
//! group, named by its `/`-separated path relative to the root. The files
//! directly inside it are its streams, and each complete line of a file is
//! an event.
//!
//! Tokens are byte offsets of the first unread byte. A trailing line
//! without its newline is left unread until it is completed. If a file
//! shrinks below the offset (truncation or copy-truncate rotation), the
//! next fetch resets the token to `0` and reading restarts from the top.

use std::io::{self, SeekFrom};
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use tokio::fs::{self, File};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, BufReader};
use tracing::trace;

use crate::config::epoch_millis;
use crate::service::{Cursor, FetchRequest, LogEvent, LogGroup, LogService, LogStream, Page};

/// Maximum number of lines returned by a fetch that continues from a token.
pub const DEFAULT_MAX_PAGE: usize = 10_000;

/// Bytes read per requested line when fetching the tail of a file.
const TAIL_BYTES_PER_LINE: u64 = 1024;

#[derive(Clone, Debug)]
pub struct DirectoryService {
    root: PathBuf,
    max_page: usize,
}

impl DirectoryService {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirectoryService {
            root: root.into(),
            max_page: DEFAULT_MAX_PAGE,
        }
    }

    pub fn with_max_page(mut self, max_page: usize) -> Self {
        self.max_page = max_page.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn group_name(&self, dir: &Path) -> Option<String> {
        let relative = dir.strip_prefix(&self.root).ok()?;
        let segments: Option<Vec<&str>> = relative
            .components()
            .map(|component| match component {
                Component::Normal(segment) => segment.to_str(),
                _ => None,
            })
            .collect();

        segments
            .filter(|segments| !segments.is_empty())
            .map(|segments| segments.join("/"))
    }

    fn group_dir(&self, group: &LogGroup) -> io::Result<PathBuf> {
        let mut dir = self.root.clone();
        for segment in group.name().split('/') {
            if !is_plain_segment(segment) {
                return Err(invalid_name(group.name()));
            }
            dir.push(segment);
        }

        Ok(dir)
    }

    fn stream_path(&self, group: &LogGroup, stream: &LogStream) -> io::Result<PathBuf> {
        if !is_plain_segment(stream.name()) {
            return Err(invalid_name(stream.name()));
        }

        Ok(self.group_dir(group)?.join(stream.name()))
    }
}

fn is_plain_segment(segment: &str) -> bool {
    !segment.is_empty() && segment != "." && segment != ".." && !segment.contains(['/', '\\'])
}

fn invalid_name(name: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("Invalid log name: {}", name),
    )
}

fn parse_offset(cursor: &Cursor) -> io::Result<u64> {
    cursor.as_str().parse().map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Invalid token: {}", cursor),
        )
    })
}

fn line_text(line: &[u8]) -> String {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}

/// Splits `buf` into complete lines. Returns the lines and the number of
/// bytes they span, newlines included.
fn complete_lines(buf: &[u8]) -> (Vec<String>, usize) {
    let mut lines = Vec::new();
    let mut consumed = 0;

    while let Some(newline) = buf[consumed..].iter().position(|b| *b == b'\n') {
        lines.push(line_text(&buf[consumed..consumed + newline]));
        consumed += newline + 1;
    }

    (lines, consumed)
}

/// Uses a leading RFC 3339 timestamp when the line has one.
fn to_event(line: String, fallback: i64) -> LogEvent {
    let timestamp = line
        .split_whitespace()
        .next()
        .and_then(|word| humantime::parse_rfc3339_weak(word).ok())
        .map_or(fallback, epoch_millis);

    LogEvent::new(timestamp, line)
}

#[async_trait]
impl LogService for DirectoryService {
    async fn list_groups(&self) -> io::Result<Vec<LogGroup>> {
        let mut groups = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            let mut has_files = false;

            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push(entry.path());
                } else if file_type.is_file() {
                    has_files = true;
                }
            }

            if has_files {
                if let Some(name) = self.group_name(&dir) {
                    groups.push(LogGroup::new(name));
                }
            }
        }
        groups.sort();

        Ok(groups)
    }

    async fn list_streams(&self, group: &LogGroup) -> io::Result<Vec<LogStream>> {
        let mut entries = fs::read_dir(self.group_dir(group)?).await?;
        let mut streams = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Ok(name) = entry.file_name().into_string() {
                streams.push(LogStream::new(name));
            }
        }
        streams.sort();

        Ok(streams)
    }

    async fn fetch_events(&self, request: FetchRequest<'_>) -> io::Result<Page> {
        let path = self.stream_path(request.group, request.stream)?;
        let mut file = File::open(&path).await?;
        let metadata = file.metadata().await?;
        let size = metadata.len();
        let modified = epoch_millis(metadata.modified().unwrap_or_else(|_| SystemTime::now()));

        let (lines, next) = match request.cursor {
            None => {
                let limit = request.limit.unwrap_or(self.max_page).min(self.max_page);
                let window = (limit as u64).saturating_mul(TAIL_BYTES_PER_LINE);
                let start = size.saturating_sub(window);

                // Read one byte early to tell whether the window starts on a
                // line boundary.
                let read_from = start.saturating_sub(1);
                let mut buf = Vec::new();
                file.seek(SeekFrom::Start(read_from)).await?;
                file.read_to_end(&mut buf).await?;

                // Drop the partial line the window starts in.
                let skip = if start > 0 {
                    buf.iter().position(|b| *b == b'\n').map_or(buf.len(), |n| n + 1)
                } else {
                    0
                };
                let (mut lines, consumed) = complete_lines(&buf[skip..]);
                if lines.len() > limit {
                    lines = lines.split_off(lines.len() - limit);
                }

                (lines, read_from + (skip + consumed) as u64)
            }
            Some(cursor) => {
                let offset = parse_offset(cursor)?;
                if offset > size {
                    trace!(path = %path.display(), offset, size, "file shrank, resetting token");
                    return Ok(Page {
                        events: Vec::new(),
                        next_token: Cursor::new("0"),
                    });
                }

                file.seek(SeekFrom::Start(offset)).await?;
                let mut reader = BufReader::new(file.take(size - offset));
                let mut lines = Vec::new();
                let mut consumed = 0;
                let mut buf = Vec::new();

                while lines.len() < self.max_page {
                    buf.clear();
                    let read = reader.read_until(b'\n', &mut buf).await?;
                    if buf.last() != Some(&b'\n') {
                        break;
                    }
                    consumed += read as u64;
                    lines.push(line_text(&buf));
                }

                (lines, offset + consumed)
            }
        };

        Ok(Page {
            events: lines
                .into_iter()
                .map(|line| to_event(line, modified))
                .collect(),
            next_token: Cursor::new(next.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn append(path: &Path, data: &str) {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .expect("Failed to open file");
        file.write_all(data.as_bytes()).expect("Failed to write");
    }

    async fn fetch(
        service: &DirectoryService,
        group: &str,
        stream: &str,
        cursor: Option<&Cursor>,
        limit: Option<usize>,
    ) -> io::Result<Page> {
        let (group, stream) = (LogGroup::new(group), LogStream::new(stream));
        service
            .fetch_events(FetchRequest {
                group: &group,
                stream: &stream,
                cursor,
                limit,
            })
            .await
    }

    fn messages(page: &Page) -> Vec<&str> {
        page.events.iter().map(|e| e.message.as_str()).collect()
    }

    #[tokio::test]
    async fn test_discovery() {
        let tmp_dir = TempDir::new().expect("Failed to create tempdir");
        let root = tmp_dir.path();
        std::fs::create_dir_all(root.join("app/api")).unwrap();
        std::fs::create_dir_all(root.join("app/web")).unwrap();
        std::fs::create_dir_all(root.join("infra/db")).unwrap();
        std::fs::create_dir_all(root.join("empty")).unwrap();
        append(&root.join("top.log"), "ignored\n");
        append(&root.join("app/api/b.log"), "");
        append(&root.join("app/api/a.log"), "");
        append(&root.join("app/web/w.log"), "");
        append(&root.join("infra/db/d.log"), "");

        let service = DirectoryService::new(root);
        let groups = service.list_groups().await.unwrap();
        assert_eq!(
            groups,
            vec![
                LogGroup::new("app/api"),
                LogGroup::new("app/web"),
                LogGroup::new("infra/db"),
            ]
        );

        let streams = service.list_streams(&LogGroup::new("app/api")).await.unwrap();
        assert_eq!(streams, vec![LogStream::new("a.log"), LogStream::new("b.log")]);
    }

    #[tokio::test]
    async fn test_rejects_escaping_names() {
        let tmp_dir = TempDir::new().expect("Failed to create tempdir");
        let service = DirectoryService::new(tmp_dir.path());

        let err = service
            .list_streams(&LogGroup::new("app/../.."))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);

        let err = fetch(&service, "app", "..", None, Some(1)).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_first_page_is_the_tail() {
        let tmp_dir = TempDir::new().expect("Failed to create tempdir");
        std::fs::create_dir_all(tmp_dir.path().join("g")).unwrap();
        let log = tmp_dir.path().join("g/s.log");
        append(&log, "one\ntwo\nthree\npartial");

        let service = DirectoryService::new(tmp_dir.path());
        let page = fetch(&service, "g", "s.log", None, Some(2)).await.unwrap();

        assert_eq!(messages(&page), vec!["two", "three"]);
        assert_eq!(page.next_token.as_str(), "14");
    }

    #[tokio::test]
    async fn test_first_page_window_on_line_boundary() {
        let tmp_dir = TempDir::new().expect("Failed to create tempdir");
        std::fs::create_dir_all(tmp_dir.path().join("g")).unwrap();
        let long = "B".repeat(1023);
        append(&tmp_dir.path().join("g/s"), &format!("a\n{}\n", long));

        // A one-line window starts right after "a\n".
        let service = DirectoryService::new(tmp_dir.path());
        let page = fetch(&service, "g", "s", None, Some(1)).await.unwrap();

        assert_eq!(messages(&page), vec![long.as_str()]);
        assert_eq!(page.next_token.as_str(), "1026");
    }

    #[tokio::test]
    async fn test_first_page_window_inside_a_line() {
        let tmp_dir = TempDir::new().expect("Failed to create tempdir");
        std::fs::create_dir_all(tmp_dir.path().join("g")).unwrap();
        let long = "x".repeat(1030);
        append(&tmp_dir.path().join("g/s"), &format!("{}\ntail\n", long));

        let service = DirectoryService::new(tmp_dir.path());
        let page = fetch(&service, "g", "s", None, Some(1)).await.unwrap();

        assert_eq!(messages(&page), vec!["tail"]);
        assert_eq!(page.next_token.as_str(), "1036");
    }

    #[tokio::test]
    async fn test_follow_and_no_progress() {
        let tmp_dir = TempDir::new().expect("Failed to create tempdir");
        std::fs::create_dir_all(tmp_dir.path().join("g")).unwrap();
        let log = tmp_dir.path().join("g/s.log");
        append(&log, "one\n");

        let service = DirectoryService::new(tmp_dir.path());
        let page = fetch(&service, "g", "s.log", None, Some(100)).await.unwrap();
        assert_eq!(messages(&page), vec!["one"]);
        let token = page.next_token;

        let page = fetch(&service, "g", "s.log", Some(&token), None).await.unwrap();
        assert!(page.events.is_empty());
        assert_eq!(page.next_token, token);

        append(&log, "two\r\nthr");
        let page = fetch(&service, "g", "s.log", Some(&token), None).await.unwrap();
        assert_eq!(messages(&page), vec!["two"]);
        let token = page.next_token;

        append(&log, "ee\n");
        let page = fetch(&service, "g", "s.log", Some(&token), None).await.unwrap();
        assert_eq!(messages(&page), vec!["three"]);
    }

    #[tokio::test]
    async fn test_page_cap() {
        let tmp_dir = TempDir::new().expect("Failed to create tempdir");
        std::fs::create_dir_all(tmp_dir.path().join("g")).unwrap();
        append(&tmp_dir.path().join("g/s"), "1\n2\n3\n");

        let service = DirectoryService::new(tmp_dir.path()).with_max_page(2);
        let start = Cursor::new("0");
        let page = fetch(&service, "g", "s", Some(&start), None).await.unwrap();
        assert_eq!(messages(&page), vec!["1", "2"]);
        assert_eq!(page.next_token.as_str(), "4");

        let page = fetch(&service, "g", "s", Some(&page.next_token), None)
            .await
            .unwrap();
        assert_eq!(messages(&page), vec!["3"]);
    }

    #[tokio::test]
    async fn test_backlog_is_paged() {
        let tmp_dir = TempDir::new().expect("Failed to create tempdir");
        std::fs::create_dir_all(tmp_dir.path().join("g")).unwrap();
        let backlog: String = (0..25_000).map(|i| format!("{}\n", i)).collect();
        append(&tmp_dir.path().join("g/s"), &backlog);
        append(&tmp_dir.path().join("g/s"), "partial");

        let service = DirectoryService::new(tmp_dir.path());
        let mut token = Cursor::new("0");
        let mut sizes = Vec::new();
        let mut last = String::new();
        loop {
            let page = fetch(&service, "g", "s", Some(&token), None).await.unwrap();
            if page.events.is_empty() {
                break;
            }
            sizes.push(page.events.len());
            last = page.events[page.events.len() - 1].message.clone();
            token = page.next_token;
        }

        assert_eq!(sizes, vec![DEFAULT_MAX_PAGE, DEFAULT_MAX_PAGE, 5_000]);
        assert_eq!(last, "24999");
        assert_eq!(token.as_str(), backlog.len().to_string());
    }

    #[tokio::test]
    async fn test_truncation_resets_token() {
        let tmp_dir = TempDir::new().expect("Failed to create tempdir");
        std::fs::create_dir_all(tmp_dir.path().join("g")).unwrap();
        let log = tmp_dir.path().join("g/s");
        append(&log, "before rotation\n");

        let service = DirectoryService::new(tmp_dir.path());
        let page = fetch(&service, "g", "s", None, Some(10)).await.unwrap();
        let token = page.next_token;

        std::fs::write(&log, "new\n").unwrap();
        let page = fetch(&service, "g", "s", Some(&token), None).await.unwrap();
        assert!(page.events.is_empty());
        assert_eq!(page.next_token.as_str(), "0");

        let page = fetch(&service, "g", "s", Some(&page.next_token), None)
            .await
            .unwrap();
        assert_eq!(messages(&page), vec!["new"]);
    }

    #[tokio::test]
    async fn test_leading_timestamp() {
        let tmp_dir = TempDir::new().expect("Failed to create tempdir");
        std::fs::create_dir_all(tmp_dir.path().join("g")).unwrap();
        append(
            &tmp_dir.path().join("g/s"),
            "1970-01-01T00:00:02Z started\nno timestamp here\n",
        );

        let service = DirectoryService::new(tmp_dir.path());
        let page = fetch(&service, "g", "s", None, Some(10)).await.unwrap();

        assert_eq!(page.events[0].timestamp, 2_000);
        assert_eq!(page.events[0].message, "1970-01-01T00:00:02Z started");
        assert!(page.events[1].timestamp > 2_000);
    }
}
