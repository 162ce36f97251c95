// SPDX-License-Identifier: Apache-2.0

use glob::{Pattern, glob};
use std::path::{Path, PathBuf};
use tracing::warn;

use super::error::DiscoveryError;

/// Finds container log files laid out as `<root>/<source>/<file>.log`.
#[derive(Debug, Clone)]
pub struct LogFileFinder {
    pattern: String,
}

impl LogFileFinder {
    pub fn new(root: &Path) -> Self {
        let root = Pattern::escape(&root.to_string_lossy());
        Self {
            pattern: format!("{}/*/*.log", root.trim_end_matches('/')),
        }
    }

    /// Matching regular files, sorted. Entries that cannot be read are skipped.
    pub fn find_files(&self) -> Result<Vec<PathBuf>, DiscoveryError> {
        let matches =
            glob(&self.pattern).map_err(|e| DiscoveryError::InvalidGlob(e.to_string()))?;

        let mut paths = Vec::new();
        for entry in matches {
            match entry {
                Ok(path) if path.is_file() => paths.push(path),
                Ok(_) => {}
                Err(e) => warn!(path = %e.path().display(), error = %e.error(), "Skipping unreadable log path"),
            }
        }
        paths.sort();

        Ok(paths)
    }
}
