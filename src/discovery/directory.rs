// SPDX-License-Identifier: Apache-2.0

//! Directory-scan discovery over a tree of `<root>/<source>/<file>.log` files.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::DiscoveryError;
use super::finder::LogFileFinder;
use super::watcher::{DirEvent, DirEventKind, WatcherConfig, WatcherError, create_watcher};
use super::{DiscoveryEvent, DiscoverySource};
use crate::bounded_channel::{BoundedSender, bounded};
use crate::init::config::SourcesConfig;
use crate::registry::{SourceCandidate, SourceLocation, StartAt};
use crate::tailer::file::{DEFAULT_MAX_LINE_SIZE, DEFAULT_POLL_INTERVAL, FileTail};
use crate::tailer::{SourceOpener, SourceReader, TailError};

/// How long a new source directory may take to get its log file.
pub const DEFAULT_CREATE_GRACE: Duration = Duration::from_secs(2);

const WATCH_TICK: Duration = Duration::from_millis(250);
const WATCH_QUEUE_SIZE: usize = 64;
const CREATE_CHECK_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct DirectoryOptions {
    /// Subscribe to creation/removal of source directories.
    pub watch: bool,
    pub watcher: WatcherConfig,
    pub create_grace: Duration,
    pub tail_poll_interval: Duration,
    /// Longer lines are delivered in pieces of this size.
    pub max_line_size: usize,
}

impl Default for DirectoryOptions {
    fn default() -> Self {
        Self {
            watch: false,
            watcher: WatcherConfig::default(),
            create_grace: DEFAULT_CREATE_GRACE,
            tail_poll_interval: DEFAULT_POLL_INTERVAL,
            max_line_size: DEFAULT_MAX_LINE_SIZE,
        }
    }
}

pub struct DirectoryDiscovery {
    root: PathBuf,
    config: SourcesConfig,
    options: DirectoryOptions,
    finder: LogFileFinder,
}

impl DirectoryDiscovery {
    pub fn new(
        root: impl Into<PathBuf>,
        config: SourcesConfig,
        options: DirectoryOptions,
    ) -> Result<Self, DiscoveryError> {
        let root = root.into();
        if !root.is_dir() {
            return Err(DiscoveryError::NotADirectory(root));
        }

        Ok(Self {
            finder: LogFileFinder::new(&root),
            root,
            config,
            options,
        })
    }

    /// ID for a log file: the longest configured ID prefixing its directory or
    /// file name, otherwise the directory name.
    pub fn source_id(&self, log_file: &Path) -> Option<String> {
        let dir = log_file.parent()?.file_name()?.to_str()?;
        let file = log_file.file_name()?.to_str()?;

        Some(
            self.config
                .match_prefix(&[dir, file])
                .unwrap_or(dir)
                .to_string(),
        )
    }

    /// ID for a source directory directly under the root.
    fn dir_source_id(&self, dir: &Path) -> Option<String> {
        let name = dir.file_name()?.to_str()?;
        Some(self.config.match_prefix(&[name]).unwrap_or(name).to_string())
    }

    /// The runtime names a container's log file after its directory.
    fn expected_log_file(dir: &Path) -> Option<PathBuf> {
        let name = dir.file_name()?.to_str()?;
        Some(dir.join(format!("{}-json.log", name)))
    }

    fn on_created(&self, dir: PathBuf, pending: &mut JoinSet<Option<SourceCandidate>>) {
        if !dir.is_dir() {
            return;
        }
        let (Some(id), Some(log_file)) = (self.dir_source_id(&dir), Self::expected_log_file(&dir))
        else {
            return;
        };

        debug!(path = %dir.display(), "Source directory created");
        pending.spawn(await_log_file(id, log_file, self.options.create_grace));
    }
}

/// Wait for a freshly created source directory to get its log file.
async fn await_log_file(id: String, log_file: PathBuf, grace: Duration) -> Option<SourceCandidate> {
    let deadline = tokio::time::Instant::now() + grace;

    loop {
        if tokio::fs::try_exists(&log_file).await.unwrap_or(false) {
            return Some(
                SourceCandidate::new(id, SourceLocation::File(log_file))
                    .starting_at(StartAt::Beginning),
            );
        }
        if tokio::time::Instant::now() >= deadline {
            warn!(
                source_id = %id,
                path = %log_file.display(),
                "Log file did not appear in new source directory"
            );
            return None;
        }
        tokio::time::sleep(CREATE_CHECK_INTERVAL).await;
    }
}

/// Drives the blocking watcher until cancelled or until nobody listens.
fn run_watcher(
    config: &WatcherConfig,
    root: &Path,
    events: BoundedSender<DirEvent>,
    cancel: &CancellationToken,
) -> Result<(), WatcherError> {
    let mut watcher = create_watcher(config, &[root])?;
    watcher.watch(root)?;
    info!(
        path = %root.display(),
        backend = watcher.backend_name(),
        "Watching log directory"
    );

    while !cancel.is_cancelled() {
        let batch = match watcher.recv_timeout(WATCH_TICK) {
            Ok(batch) => batch,
            Err(WatcherError::Disconnected) => return Err(WatcherError::Disconnected),
            Err(e) => {
                warn!(error = %e, "Directory watcher error");
                continue;
            }
        };

        for event in batch {
            if events.send_blocking(event).is_err() {
                return Ok(());
            }
        }
    }

    if let Err(e) = watcher.unwatch(root) {
        debug!(error = %e, "Failed to unwatch log directory");
    }
    Ok(())
}

#[async_trait]
impl SourceOpener for DirectoryDiscovery {
    async fn open(
        &self,
        location: &SourceLocation,
        start_at: StartAt,
    ) -> Result<Box<dyn SourceReader>, TailError> {
        match location {
            SourceLocation::File(path) => {
                let tail = FileTail::open(path, start_at)
                    .await?
                    .with_poll_interval(self.options.tail_poll_interval)
                    .with_max_line_size(self.options.max_line_size);
                Ok(Box::new(tail))
            }
            other => Err(TailError::UnsupportedLocation(other.to_string())),
        }
    }
}

#[async_trait]
impl DiscoverySource for DirectoryDiscovery {
    fn name(&self) -> &'static str {
        "directory"
    }

    async fn enumerate(&self) -> Result<Vec<SourceCandidate>, DiscoveryError> {
        let files = self.finder.find_files()?;

        let candidates = files
            .into_iter()
            .filter_map(|path| match self.source_id(&path) {
                Some(id) => Some(
                    SourceCandidate::new(id, SourceLocation::File(path)).starting_at(StartAt::End),
                ),
                None => {
                    warn!(path = %path.display(), "Unable to derive source ID, skipping");
                    None
                }
            })
            .collect();

        Ok(candidates)
    }

    async fn watch(
        &self,
        events: BoundedSender<DiscoveryEvent>,
        cancel: CancellationToken,
    ) -> Result<(), DiscoveryError> {
        if !self.options.watch {
            return Ok(());
        }

        let (raw_tx, mut raw_rx) = bounded::<DirEvent>(WATCH_QUEUE_SIZE);
        let root = self.root.clone();
        let watcher_config = self.options.watcher.clone();
        let watcher_cancel = cancel.clone();
        let watcher_thread = tokio::task::spawn_blocking(move || {
            run_watcher(&watcher_config, &root, raw_tx, &watcher_cancel)
        });

        let mut pending: JoinSet<Option<SourceCandidate>> = JoinSet::new();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                raw = raw_rx.next() => {
                    let Some(event) = raw else {
                        break;
                    };
                    match event.kind {
                        DirEventKind::Created => self.on_created(event.path, &mut pending),
                        DirEventKind::Removed => {
                            let Some(id) = self.dir_source_id(&event.path) else {
                                continue;
                            };
                            debug!(source_id = %id, "Source directory removed");
                            if events.send(DiscoveryEvent::Removed(id)).await.is_err() {
                                break;
                            }
                        }
                    }
                },
                Some(joined) = pending.join_next() => {
                    if let Ok(Some(candidate)) = joined {
                        if events.send(DiscoveryEvent::Added(candidate)).await.is_err() {
                            break;
                        }
                    }
                },
            }
        }

        // unblocks a watcher thread parked on a full queue
        drop(raw_rx);
        pending.abort_all();

        match watcher_thread.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(e) => Err(DiscoveryError::Task(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::watcher::WatchMode;
    use crate::tailer::RawLine;
    use std::fs;
    use tempfile::TempDir;

    fn config() -> SourcesConfig {
        SourcesConfig::from_toml_str(
            r#"
[container.abc123]
key = "TOKEN-A"
"#,
        )
        .unwrap()
    }

    fn make_source(root: &Path, dir: &str, file: &str) -> PathBuf {
        fs::create_dir_all(root.join(dir)).unwrap();
        let path = root.join(dir).join(file);
        fs::write(&path, "").unwrap();
        path
    }

    #[test]
    fn root_must_be_a_directory() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("file");
        fs::write(&file, "").unwrap();

        assert!(matches!(
            DirectoryDiscovery::new(&file, config(), DirectoryOptions::default()),
            Err(DiscoveryError::NotADirectory(_))
        ));
        assert!(matches!(
            DirectoryDiscovery::new(dir.path().join("missing"), config(), DirectoryOptions::default()),
            Err(DiscoveryError::NotADirectory(_))
        ));
    }

    #[test]
    fn source_id_prefix_rule() {
        let dir = TempDir::new().unwrap();
        let discovery =
            DirectoryDiscovery::new(dir.path(), config(), DirectoryOptions::default()).unwrap();

        assert_eq!(
            Some("abc123".to_string()),
            discovery.source_id(&dir.path().join("abc123ffee").join("abc123ffee-json.log"))
        );
        assert_eq!(
            Some("abc123".to_string()),
            discovery.source_id(&dir.path().join("other").join("abc123-json.log"))
        );
        assert_eq!(
            Some("def456".to_string()),
            discovery.source_id(&dir.path().join("def456").join("app-json.log"))
        );
    }

    #[tokio::test]
    async fn enumerate_reports_files_from_end() {
        let dir = TempDir::new().unwrap();
        let abc = make_source(dir.path(), "abc123", "app-json.log");
        let def = make_source(dir.path(), "def456", "app-json.log");

        let discovery =
            DirectoryDiscovery::new(dir.path(), config(), DirectoryOptions::default()).unwrap();
        let candidates = discovery.enumerate().await.unwrap();

        assert_eq!(
            vec![
                SourceCandidate::new("abc123", SourceLocation::File(abc)),
                SourceCandidate::new("def456", SourceLocation::File(def)),
            ],
            candidates
        );
        assert!(candidates.iter().all(|c| c.start_at == StartAt::End));
    }

    #[tokio::test]
    async fn watch_disabled_returns_immediately() {
        let dir = TempDir::new().unwrap();
        let discovery =
            DirectoryDiscovery::new(dir.path(), config(), DirectoryOptions::default()).unwrap();
        let (tx, _rx) = bounded(0);

        discovery.watch(tx, CancellationToken::new()).await.unwrap();
    }

    #[tokio::test]
    async fn watch_reports_created_and_removed_directories() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let discovery = std::sync::Arc::new(
            DirectoryDiscovery::new(
                &root,
                config(),
                DirectoryOptions {
                    watch: true,
                    watcher: WatcherConfig {
                        mode: WatchMode::Poll,
                        poll_interval: Duration::from_millis(20),
                    },
                    ..Default::default()
                },
            )
            .unwrap(),
        );

        let (tx, mut rx) = bounded(0);
        let cancel = CancellationToken::new();
        let watch = {
            let discovery = discovery.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { discovery.watch(tx, cancel).await })
        };

        // give the poll watcher its baseline scan
        tokio::time::sleep(Duration::from_millis(100)).await;
        let log_file = make_source(&root, "def456", "def456-json.log");

        let added = tokio::time::timeout(Duration::from_secs(5), rx.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            DiscoveryEvent::Added(
                SourceCandidate::new("def456", SourceLocation::File(log_file))
                    .starting_at(StartAt::Beginning)
            ),
            added
        );

        fs::remove_dir_all(root.join("def456")).unwrap();
        let removed = tokio::time::timeout(Duration::from_secs(5), rx.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(DiscoveryEvent::Removed("def456".to_string()), removed);

        cancel.cancel();
        watch.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn missing_log_file_in_new_directory_is_skipped() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("empty")).unwrap();

        let candidate = await_log_file(
            "empty".to_string(),
            dir.path().join("empty").join("empty-json.log"),
            Duration::from_millis(60),
        )
        .await;
        assert!(candidate.is_none());
    }

    #[tokio::test]
    async fn open_splits_lines_longer_than_the_limit() {
        let dir = TempDir::new().unwrap();
        let path = make_source(dir.path(), "abc123", "abc123-json.log");
        fs::write(&path, "0123456789\n").unwrap();
        let options = DirectoryOptions {
            max_line_size: 4,
            ..Default::default()
        };
        let discovery = DirectoryDiscovery::new(dir.path(), config(), options).unwrap();

        let mut reader = discovery
            .open(&SourceLocation::File(path), StartAt::Beginning)
            .await
            .unwrap();
        let mut pieces = Vec::new();
        for _ in 0..3 {
            match reader.next_line().await.unwrap() {
                Some(RawLine::Text(piece)) => pieces.push(piece),
                other => panic!("expected a text line, got {:?}", other),
            }
        }
        assert_eq!(vec!["0123", "4567", "89"], pieces);
    }

    #[tokio::test]
    async fn open_rejects_container_locations() {
        let dir = TempDir::new().unwrap();
        let discovery =
            DirectoryDiscovery::new(dir.path(), config(), DirectoryOptions::default()).unwrap();

        let result = discovery
            .open(&SourceLocation::Container("x".to_string()), StartAt::End)
            .await;
        assert!(matches!(result, Err(TailError::UnsupportedLocation(_))));
    }
}
