// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use thiserror::Error;

use super::watcher::WatcherError;

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("log directory {0} is not a directory")]
    NotADirectory(PathBuf),

    #[error("invalid glob pattern: {0}")]
    InvalidGlob(String),

    #[error("watcher error: {0}")]
    Watcher(#[from] WatcherError),

    #[error("container runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("discovery task failed: {0}")]
    Task(String),
}

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("unable to connect to container runtime at {host}: {reason}")]
    Connect { host: String, reason: String },

    #[error("unsupported container runtime host {0:?}")]
    UnsupportedHost(String),

    #[error("listing containers failed: {0}")]
    List(String),

    #[error("inspecting container {id} failed: {reason}")]
    Inspect { id: String, reason: String },

    #[error("container event stream failed: {0}")]
    Events(String),

    #[error("attaching to logs of {id} failed: {reason}")]
    Logs { id: String, reason: String },
}
