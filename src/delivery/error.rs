// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TlsError {
    #[error("unable to load trust material from {path}: {source}")]
    TrustMaterial {
        path: PathBuf,
        #[source]
        source: rustls_pki_types::pem::Error,
    },

    #[error("no usable certificates in {0}")]
    NoCertificates(PathBuf),

    #[error("invalid endpoint {0:?}, expected host:port")]
    InvalidEndpoint(String),

    #[error("invalid server name {0:?}")]
    InvalidServerName(String),

    #[error("failed to initialize crypto library: {0}")]
    CryptoProvider(String),

    #[error("unable to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("TLS handshake with {endpoint} failed: {source}")]
    Handshake {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("unable to establish delivery connection: {0}")]
    Connect(#[source] TlsError),

    #[error("reconnect after write failure ({write}) failed: {source}")]
    Reconnect {
        write: std::io::Error,
        #[source]
        source: TlsError,
    },

    #[error("write failed again after reconnect: {0}")]
    Retry(#[source] std::io::Error),
}
