// SPDX-License-Identifier: Apache-2.0

//! Traits and types for log directory watchers.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Error type for watcher operations
#[derive(Debug)]
pub enum WatcherError {
    /// Failed to initialize the watcher
    Init(String),
    /// Failed to watch a path
    Watch(String),
    /// IO error
    Io(std::io::Error),
    /// The backend stopped delivering events
    Disconnected,
}

impl fmt::Display for WatcherError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatcherError::Init(msg) => write!(f, "watcher initialization failed: {}", msg),
            WatcherError::Watch(msg) => write!(f, "watch failed: {}", msg),
            WatcherError::Io(e) => write!(f, "IO error: {}", e),
            WatcherError::Disconnected => write!(f, "watcher channel disconnected"),
        }
    }
}

impl std::error::Error for WatcherError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WatcherError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for WatcherError {
    fn from(e: std::io::Error) -> Self {
        WatcherError::Io(e)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirEventKind {
    /// An entry appeared under the watched directory
    Created,
    /// An entry disappeared from the watched directory
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEvent {
    pub kind: DirEventKind,
    pub path: PathBuf,
}

impl DirEvent {
    pub fn created(path: PathBuf) -> Self {
        Self {
            kind: DirEventKind::Created,
            path,
        }
    }

    pub fn removed(path: PathBuf) -> Self {
        Self {
            kind: DirEventKind::Removed,
            path,
        }
    }
}

/// Watches a directory for entries being created or removed (non-recursive).
///
/// Implementations block in `recv_timeout`; they are driven from a dedicated
/// blocking thread.
pub trait DirWatcher: Send {
    fn watch(&mut self, path: &Path) -> Result<(), WatcherError>;

    fn unwatch(&mut self, path: &Path) -> Result<(), WatcherError>;

    /// Blocks until events are available or the timeout expires.
    /// Returns an empty vector if the timeout expires with no events.
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Vec<DirEvent>, WatcherError>;

    fn is_native(&self) -> bool;

    /// Name of the watcher backend for logging.
    fn backend_name(&self) -> &'static str;
}
