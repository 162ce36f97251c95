// SPDX-License-Identifier: Apache-2.0

//! Polling directory watcher, the fallback where native notifications are
//! unavailable or unreliable (e.g. NFS).

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use super::traits::{DirEvent, DirWatcher, WatcherError};

/// Periodically lists the watched directories and diffs their entries.
pub struct PollWatcher {
    watched_dirs: Vec<PathBuf>,
    /// Entries seen on the last scan
    entries: BTreeSet<PathBuf>,
    poll_interval: Duration,
    last_poll: Instant,
    pending_events: Vec<DirEvent>,
}

impl PollWatcher {
    pub fn new(directories: &[&Path], poll_interval: Duration) -> Result<Self, WatcherError> {
        let mut watcher = Self {
            watched_dirs: directories.iter().map(|p| p.to_path_buf()).collect(),
            entries: BTreeSet::new(),
            poll_interval,
            last_poll: Instant::now(),
            pending_events: Vec::new(),
        };

        // baseline: entries present before watching are not reported
        watcher.entries = watcher.list_entries();
        Ok(watcher)
    }

    fn list_entries(&self) -> BTreeSet<PathBuf> {
        let mut entries = BTreeSet::new();
        for dir in &self.watched_dirs {
            match fs::read_dir(dir) {
                Ok(read_dir) => entries.extend(read_dir.flatten().map(|entry| entry.path())),
                Err(e) => tracing::debug!("Error scanning directory {:?}: {}", dir, e),
            }
        }
        entries
    }

    fn scan(&mut self) {
        let current = self.list_entries();

        for created in current.difference(&self.entries) {
            self.pending_events.push(DirEvent::created(created.clone()));
        }
        for removed in self.entries.difference(&current) {
            self.pending_events.push(DirEvent::removed(removed.clone()));
        }

        self.entries = current;
        self.last_poll = Instant::now();
    }

    fn time_until_poll(&self) -> Duration {
        self.poll_interval.saturating_sub(self.last_poll.elapsed())
    }
}

impl DirWatcher for PollWatcher {
    fn watch(&mut self, path: &Path) -> Result<(), WatcherError> {
        let path = path.to_path_buf();
        if !fs::metadata(&path)?.is_dir() {
            return Err(WatcherError::Watch(format!(
                "{} is not a directory",
                path.display()
            )));
        }

        if !self.watched_dirs.contains(&path) {
            // existing entries of a newly watched directory are baseline too
            if let Ok(read_dir) = fs::read_dir(&path) {
                self.entries
                    .extend(read_dir.flatten().map(|entry| entry.path()));
            }
            self.watched_dirs.push(path);
        }
        Ok(())
    }

    fn unwatch(&mut self, path: &Path) -> Result<(), WatcherError> {
        self.watched_dirs.retain(|p| p != path);
        self.entries.retain(|p| p.parent() != Some(path));
        Ok(())
    }

    fn recv_timeout(&mut self, timeout: Duration) -> Result<Vec<DirEvent>, WatcherError> {
        let deadline = Instant::now() + timeout;

        loop {
            if !self.pending_events.is_empty() {
                return Ok(std::mem::take(&mut self.pending_events));
            }

            let wait = self.time_until_poll();
            let remaining = deadline.saturating_duration_since(Instant::now());
            if wait > remaining {
                std::thread::sleep(remaining);
                return Ok(Vec::new());
            }

            std::thread::sleep(wait);
            self.scan();
        }
    }

    fn is_native(&self) -> bool {
        false
    }

    fn backend_name(&self) -> &'static str {
        "poll"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const POLL: Duration = Duration::from_millis(10);

    #[test]
    fn existing_entries_are_baseline() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir(temp_dir.path().join("abc123")).unwrap();

        let mut watcher = PollWatcher::new(&[temp_dir.path()], POLL).unwrap();
        let events = watcher.recv_timeout(Duration::from_millis(50)).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn reports_created_and_removed_entries() {
        let temp_dir = TempDir::new().unwrap();
        let gone = temp_dir.path().join("gone");
        fs::create_dir(&gone).unwrap();

        let mut watcher = PollWatcher::new(&[temp_dir.path()], POLL).unwrap();

        let new = temp_dir.path().join("def456");
        fs::create_dir(&new).unwrap();
        fs::remove_dir(&gone).unwrap();

        let events = watcher.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(events.contains(&DirEvent::created(new)));
        assert!(events.contains(&DirEvent::removed(gone)));
    }

    #[test]
    fn times_out_without_changes() {
        let temp_dir = TempDir::new().unwrap();
        let mut watcher = PollWatcher::new(&[temp_dir.path()], POLL).unwrap();

        let start = Instant::now();
        assert!(watcher.recv_timeout(Duration::from_millis(30)).unwrap().is_empty());
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn watch_rejects_files() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("x.log");
        fs::write(&file, "x").unwrap();

        let mut watcher = PollWatcher::new(&[], POLL).unwrap();
        assert!(watcher.watch(&file).is_err());
        assert!(watcher.watch(temp_dir.path()).is_ok());
        assert!(!watcher.is_native());
    }
}
