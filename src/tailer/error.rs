// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use thiserror::Error;
use tower::BoxError;

#[derive(Error, Debug)]
pub enum TailError {
    #[error("unable to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("runtime log stream error: {0}")]
    Stream(BoxError),

    #[error("source location not supported by this discovery: {0}")]
    UnsupportedLocation(String),
}
