// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::io::{DuplexStream, duplex};

use dle::delivery::{DeliveryStream, Dialer, TlsError};

pub const ENDPOINT: &str = "memory:1";

/// Hands out in-memory pipes, one per dial; refuses once they run out.
pub struct DuplexDialer {
    streams: Mutex<VecDeque<DuplexStream>>,
}

impl DuplexDialer {
    /// A dialer with `connections` pipes, plus the remote end of each.
    pub fn new(connections: usize) -> (Self, Vec<DuplexStream>) {
        let (local, remote): (VecDeque<_>, Vec<_>) =
            (0..connections).map(|_| duplex(64 * 1024)).unzip();

        (
            Self {
                streams: Mutex::new(local),
            },
            remote,
        )
    }
}

#[async_trait]
impl Dialer for DuplexDialer {
    fn endpoint(&self) -> &str {
        ENDPOINT
    }

    async fn dial(&self) -> Result<DeliveryStream, TlsError> {
        match self.streams.lock().unwrap().pop_front() {
            Some(stream) => Ok(Box::new(stream)),
            None => Err(TlsError::Connect {
                endpoint: ENDPOINT.to_string(),
                source: std::io::ErrorKind::ConnectionRefused.into(),
            }),
        }
    }
}
