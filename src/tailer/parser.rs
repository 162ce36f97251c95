// SPDX-License-Identifier: Apache-2.0

//! Decoder for the container runtime's JSON log-file format:
//! `{"log":"hello\n","stream":"stdout","time":"..."}`.

use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("invalid structured log line: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct DockerLogEntry {
    #[serde(default)]
    pub log: String,
    #[serde(default)]
    pub stream: String,
    #[serde(default)]
    pub time: Option<String>,
}

pub fn decode(line: &str) -> Result<DockerLogEntry, DecodeError> {
    Ok(serde_json::from_str(line)?)
}
