// SPDX-License-Identifier: Apache-2.0

//! Follow-mode reader for a single log file (`tail -F` semantics).

use async_trait::async_trait;
use std::collections::VecDeque;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;

use super::SourceReader;
use super::error::TailError;
use super::file_id::FileId;
use super::line::RawLine;
use crate::registry::StartAt;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);
pub const DEFAULT_MAX_LINE_SIZE: usize = 1024 * 1024;

const READ_CHUNK: usize = 16 * 1024;

pub struct FileTail {
    path: PathBuf,
    file: File,
    file_id: Option<FileId>,
    offset: u64,
    /// Bytes of a line whose terminator has not been written yet.
    partial: Vec<u8>,
    ready: VecDeque<String>,
    poll_interval: Duration,
    max_line_size: usize,
}

impl FileTail {
    pub async fn open(path: impl AsRef<Path>, start_at: StartAt) -> Result<Self, TailError> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path).await.map_err(|e| TailError::Open {
            path: path.clone(),
            source: e,
        })?;

        let metadata = file.metadata().await?;
        let offset = match start_at {
            StartAt::End => metadata.len(),
            StartAt::Beginning => 0,
        };
        file.seek(SeekFrom::Start(offset)).await?;

        Ok(Self {
            path,
            file,
            file_id: FileId::from_metadata(&metadata),
            offset,
            partial: Vec::new(),
            ready: VecDeque::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_line_size: DEFAULT_MAX_LINE_SIZE,
        })
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_max_line_size(mut self, max_line_size: usize) -> Self {
        self.max_line_size = max_line_size.max(1);
        self
    }

    #[cfg(test)]
    fn offset(&self) -> u64 {
        self.offset
    }

    /// Read what is currently available, returning the number of bytes read.
    async fn fill(&mut self) -> Result<usize, TailError> {
        let mut chunk = [0u8; READ_CHUNK];
        let n = self.file.read(&mut chunk).await?;
        if n == 0 {
            return Ok(0);
        }
        self.offset += n as u64;

        let mut rest = &chunk[..n];
        loop {
            match rest.iter().position(|b| *b == b'\n') {
                Some(pos) => {
                    self.push_partial(&rest[..pos]);
                    self.complete_line();
                    rest = &rest[pos + 1..];
                }
                None => {
                    self.push_partial(rest);
                    break;
                }
            }
        }

        Ok(n)
    }

    /// Oversized lines are emitted in `max_line_size` pieces.
    fn push_partial(&mut self, mut bytes: &[u8]) {
        while self.partial.len() + bytes.len() > self.max_line_size {
            let take = self.max_line_size.saturating_sub(self.partial.len());
            self.partial.extend_from_slice(&bytes[..take]);
            self.complete_line();
            bytes = &bytes[take..];
        }
        self.partial.extend_from_slice(bytes);
    }

    fn complete_line(&mut self) {
        let mut bytes = std::mem::take(&mut self.partial);
        if bytes.last() == Some(&b'\r') {
            bytes.pop();
        }
        if bytes.is_empty() {
            return;
        }
        self.ready
            .push_back(String::from_utf8_lossy(&bytes).into_owned());
    }

    /// Reopen if the path now names a different file or was truncated.
    /// Returns true when reading should resume immediately.
    async fn follow_path(&mut self) -> Result<bool, TailError> {
        let metadata = match tokio::fs::metadata(&self.path).await {
            Ok(metadata) => metadata,
            // rotated away and not recreated yet
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        let file_id = FileId::from_metadata(&metadata);
        if file_id != self.file_id {
            debug!(path = %self.path.display(), "File rotated, reopening");
            self.file = match File::open(&self.path).await {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
                Err(e) => return Err(e.into()),
            };
            self.file_id = file_id;
            self.reset();
            return Ok(true);
        }

        if metadata.len() < self.offset {
            debug!(path = %self.path.display(), "File truncated, reading from start");
            self.file.seek(SeekFrom::Start(0)).await?;
            self.reset();
            return Ok(true);
        }

        Ok(false)
    }

    fn reset(&mut self) {
        self.offset = 0;
        self.partial.clear();
    }
}

#[async_trait]
impl SourceReader for FileTail {
    async fn next_line(&mut self) -> Result<Option<RawLine>, TailError> {
        loop {
            if let Some(line) = self.ready.pop_front() {
                return Ok(Some(RawLine::Text(line)));
            }

            if self.fill().await? > 0 {
                continue;
            }
            if self.follow_path().await? {
                continue;
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const POLL: Duration = Duration::from_millis(10);
    const WAIT: Duration = Duration::from_secs(5);

    fn append(path: &Path, content: &str) {
        let mut f = std::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f.flush().unwrap();
    }

    async fn next_text(tail: &mut FileTail) -> String {
        match tokio::time::timeout(WAIT, tail.next_line()).await {
            Ok(Ok(Some(RawLine::Text(line)))) => line,
            other => panic!("expected a text line, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn start_at_beginning_reads_existing_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "line 1\nline 2\r\n\n");

        let mut tail = FileTail::open(&path, StartAt::Beginning)
            .await
            .unwrap()
            .with_poll_interval(POLL);

        assert_eq!("line 1", next_text(&mut tail).await);
        assert_eq!("line 2", next_text(&mut tail).await);
    }

    #[tokio::test]
    async fn start_at_end_skips_existing_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "old\n");

        let mut tail = FileTail::open(&path, StartAt::End)
            .await
            .unwrap()
            .with_poll_interval(POLL);
        assert_eq!(4, tail.offset());

        append(&path, "new\n");
        assert_eq!("new", next_text(&mut tail).await);
    }

    #[tokio::test]
    async fn partial_lines_wait_for_terminator() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "");

        let mut tail = FileTail::open(&path, StartAt::Beginning)
            .await
            .unwrap()
            .with_poll_interval(POLL);

        append(&path, "hel");
        assert!(
            tokio::time::timeout(Duration::from_millis(100), tail.next_line())
                .await
                .is_err()
        );

        append(&path, "lo\n");
        assert_eq!("hello", next_text(&mut tail).await);
    }

    #[tokio::test]
    async fn follows_truncation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "first line that is long\n");

        let mut tail = FileTail::open(&path, StartAt::Beginning)
            .await
            .unwrap()
            .with_poll_interval(POLL);
        assert_eq!("first line that is long", next_text(&mut tail).await);

        std::fs::write(&path, "short\n").unwrap();
        assert_eq!("short", next_text(&mut tail).await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn follows_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "before\n");

        let mut tail = FileTail::open(&path, StartAt::Beginning)
            .await
            .unwrap()
            .with_poll_interval(POLL);
        assert_eq!("before", next_text(&mut tail).await);

        std::fs::rename(&path, dir.path().join("app.log.1")).unwrap();
        append(&path, "after\n");
        assert_eq!("after", next_text(&mut tail).await);
    }

    #[tokio::test]
    async fn oversized_lines_are_split() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "abcdefgh\n");

        let mut tail = FileTail::open(&path, StartAt::Beginning)
            .await
            .unwrap()
            .with_poll_interval(POLL)
            .with_max_line_size(5);

        assert_eq!("abcde", next_text(&mut tail).await);
        assert_eq!("fgh", next_text(&mut tail).await);
    }

    #[tokio::test]
    async fn open_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileTail::open(dir.path().join("missing.log"), StartAt::End)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TailError::Open { .. }));
    }
}
