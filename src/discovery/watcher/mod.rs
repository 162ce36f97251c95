// SPDX-License-Identifier: Apache-2.0

//! Log directory watchers.
//!
//! - **Native watching** uses OS-level notifications for immediate detection.
//! - **Poll watching** periodically lists the directory, for environments
//!   where native watching isn't available or reliable (e.g. NFS).
//!
//! `auto` mode attempts native watching first and falls back to polling.

mod native;
mod poll;
mod traits;

pub use native::NativeWatcher;
pub use poll::PollWatcher;
pub use traits::{DirEvent, DirEventKind, DirWatcher, WatcherError};

use clap::ValueEnum;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum WatchMode {
    /// Try native watching, fall back to polling
    #[default]
    Auto,
    /// Force native file system watching (inotify/kqueue/FSEvents)
    Native,
    /// Force polling (NFS or unreliable native watching)
    Poll,
}

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub mode: WatchMode,
    /// Scan interval in poll mode
    pub poll_interval: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            mode: WatchMode::Auto,
            poll_interval: Duration::from_millis(250),
        }
    }
}

/// Create a watcher according to `config.mode`.
pub fn create_watcher(
    config: &WatcherConfig,
    directories: &[&Path],
) -> Result<Box<dyn DirWatcher>, WatcherError> {
    match config.mode {
        WatchMode::Native => Ok(Box::new(NativeWatcher::new()?)),
        WatchMode::Poll => Ok(Box::new(PollWatcher::new(
            directories,
            config.poll_interval,
        )?)),
        WatchMode::Auto => match NativeWatcher::new() {
            Ok(watcher) => {
                tracing::info!("Using native file system watcher");
                Ok(Box::new(watcher))
            }
            Err(e) => {
                tracing::warn!(
                    "Native file watching unavailable ({}), falling back to polling",
                    e
                );
                Ok(Box::new(PollWatcher::new(
                    directories,
                    config.poll_interval,
                )?))
            }
        },
    }
}
