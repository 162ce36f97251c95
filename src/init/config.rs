// SPDX-License-Identifier: Apache-2.0

//! Per-source configuration file: tokens, display names and the ignore list.

use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Environment overrides for config file keys, e.g. `DLE_SOURCES_IGNORE=[a,b]`
/// or `DLE_SOURCES_CONTAINER__ABC123__KEY=...`.
const ENV_PREFIX: &str = "DLE_SOURCES_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to parse configuration file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: Box<figment::Error>,
    },
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct SourceEntry {
    /// Delivery token for this source.
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct SourcesConfig {
    #[serde(default, rename = "container")]
    pub sources: BTreeMap<String, SourceEntry>,
    #[serde(default)]
    pub ignore: Vec<String>,
}

impl SourcesConfig {
    /// Load the configuration file. A file that does not exist is an empty
    /// configuration, a file that does not parse is an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut figment = Figment::new();
        if path.exists() {
            figment = figment.merge(Toml::file(path));
        } else {
            info!(path = %path.display(), "Configuration file not found, using defaults");
        }

        figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                source: Box::new(e),
            })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Figment::from(Toml::string(content))
            .extract()
            .map_err(|e| ConfigError::Parse {
                path: PathBuf::from("<inline>"),
                source: Box::new(e),
            })
    }

    pub fn entry(&self, id: &str) -> Option<&SourceEntry> {
        self.sources.get(id)
    }

    /// Configured token for `id`, ignoring empty values.
    pub fn token(&self, id: &str) -> Option<&str> {
        self.entry(id)
            .and_then(|e| e.key.as_deref())
            .filter(|k| !k.is_empty())
    }

    pub fn name(&self, id: &str) -> Option<&str> {
        self.entry(id)
            .and_then(|e| e.name.as_deref())
            .filter(|n| !n.is_empty())
    }

    pub fn ignore_set(&self) -> HashSet<String> {
        self.ignore
            .iter()
            .filter(|id| !id.is_empty())
            .cloned()
            .collect()
    }

    /// Longest configured ID that prefixes any of `names`. Lets several files
    /// (e.g. a full container ID directory and its short ID) share one entry.
    pub fn match_prefix(&self, names: &[&str]) -> Option<&str> {
        self.sources
            .keys()
            .filter(|id| !id.is_empty())
            .filter(|id| names.iter().any(|name| name.starts_with(id.as_str())))
            .max_by_key(|id| id.len())
            .map(String::as_str)
    }
}
