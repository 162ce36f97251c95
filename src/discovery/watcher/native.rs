// SPDX-License-Identifier: Apache-2.0

//! Native directory watcher using the `notify` crate (inotify, FSEvents,
//! ReadDirectoryChangesW).

use std::path::Path;
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError, channel};
use std::time::Duration;

use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use super::traits::{DirEvent, DirWatcher, WatcherError};

pub struct NativeWatcher {
    watcher: RecommendedWatcher,
    receiver: Receiver<Result<Event, notify::Error>>,
}

impl NativeWatcher {
    pub fn new() -> Result<Self, WatcherError> {
        let (tx, rx) = channel();

        let watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            Config::default(),
        )
        .map_err(|e| WatcherError::Init(e.to_string()))?;

        Ok(Self {
            watcher,
            receiver: rx,
        })
    }

    /// Only topology changes matter; content modifications are dropped.
    fn convert_event(event: Event) -> Vec<DirEvent> {
        let created = match event.kind {
            EventKind::Create(_) => true,
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => true,
            EventKind::Remove(_) => false,
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => false,
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                // paths are [from, to]
                let mut paths = event.paths.into_iter();
                return paths
                    .next()
                    .map(DirEvent::removed)
                    .into_iter()
                    .chain(paths.next().map(DirEvent::created))
                    .collect();
            }
            _ => return Vec::new(),
        };

        event
            .paths
            .into_iter()
            .map(|path| {
                if created {
                    DirEvent::created(path)
                } else {
                    DirEvent::removed(path)
                }
            })
            .collect()
    }

    fn drain(&self, events: &mut Vec<DirEvent>) -> Result<(), WatcherError> {
        loop {
            match self.receiver.try_recv() {
                Ok(Ok(event)) => events.extend(Self::convert_event(event)),
                Ok(Err(e)) => tracing::warn!("Directory watcher error: {}", e),
                Err(TryRecvError::Empty) => return Ok(()),
                Err(TryRecvError::Disconnected) => return Err(WatcherError::Disconnected),
            }
        }
    }
}

impl DirWatcher for NativeWatcher {
    fn watch(&mut self, path: &Path) -> Result<(), WatcherError> {
        self.watcher
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(|e| WatcherError::Watch(e.to_string()))
    }

    fn unwatch(&mut self, path: &Path) -> Result<(), WatcherError> {
        self.watcher
            .unwatch(path)
            .map_err(|e| WatcherError::Watch(e.to_string()))
    }

    fn recv_timeout(&mut self, timeout: Duration) -> Result<Vec<DirEvent>, WatcherError> {
        let mut events = Vec::new();

        match self.receiver.recv_timeout(timeout) {
            Ok(Ok(event)) => events.extend(Self::convert_event(event)),
            Ok(Err(e)) => tracing::warn!("Directory watcher error: {}", e),
            Err(RecvTimeoutError::Timeout) => return Ok(events),
            Err(RecvTimeoutError::Disconnected) => return Err(WatcherError::Disconnected),
        }

        self.drain(&mut events)?;
        Ok(events)
    }

    fn is_native(&self) -> bool {
        true
    }

    fn backend_name(&self) -> &'static str {
        #[cfg(target_os = "linux")]
        {
            "inotify"
        }
        #[cfg(target_os = "macos")]
        {
            "FSEvents"
        }
        #[cfg(target_os = "windows")]
        {
            "ReadDirectoryChangesW"
        }
        #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
        {
            "native"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::watcher::DirEventKind;
    use notify::event::{CreateKind, DataChange, RemoveKind};
    use std::fs;
    use std::path::PathBuf;
    use std::time::Instant;
    use tempfile::TempDir;

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        let mut event = Event::new(kind);
        for p in paths {
            event = event.add_path(PathBuf::from(p));
        }
        event
    }

    #[test]
    fn converts_topology_events() {
        assert_eq!(
            vec![DirEvent::created(PathBuf::from("/logs/a"))],
            NativeWatcher::convert_event(event(EventKind::Create(CreateKind::Folder), &["/logs/a"]))
        );
        assert_eq!(
            vec![DirEvent::removed(PathBuf::from("/logs/a"))],
            NativeWatcher::convert_event(event(EventKind::Remove(RemoveKind::Any), &["/logs/a"]))
        );
        assert_eq!(
            vec![
                DirEvent::removed(PathBuf::from("/logs/a")),
                DirEvent::created(PathBuf::from("/logs/b"))
            ],
            NativeWatcher::convert_event(event(
                EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
                &["/logs/a", "/logs/b"]
            ))
        );
        assert!(
            NativeWatcher::convert_event(event(
                EventKind::Modify(ModifyKind::Data(DataChange::Content)),
                &["/logs/a/a-json.log"]
            ))
            .is_empty()
        );
    }

    #[test]
    fn detects_directory_create_and_remove() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().canonicalize().unwrap();
        let mut watcher = NativeWatcher::new().unwrap();
        watcher.watch(&root).unwrap();

        let sub = root.join("abc123");
        fs::create_dir(&sub).unwrap();
        fs::remove_dir(&sub).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut events = Vec::new();
        while Instant::now() < deadline
            && !events.iter().any(|e: &DirEvent| e.kind == DirEventKind::Removed)
        {
            events.extend(watcher.recv_timeout(Duration::from_millis(100)).unwrap());
        }

        assert!(events.contains(&DirEvent::created(sub.clone())));
        assert!(events.contains(&DirEvent::removed(sub)));
    }

    #[test]
    fn is_native() {
        let watcher = NativeWatcher::new().unwrap();
        assert!(watcher.is_native());
        assert!(!watcher.backend_name().is_empty());
    }
}
