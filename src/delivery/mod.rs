// SPDX-License-Identifier: Apache-2.0

//! Delivery Connection: the single consumer of the fan-in channel, writing
//! every rendered line to one persistent TLS connection.
//!
//! A failed write is treated as a lost connection: dial once more and write the
//! same line once more. Anything failing after that is fatal for the process.

pub mod error;
pub mod tls;

pub use error::{DeliveryError, TlsError};
pub use tls::{TlsDialer, init_crypto_provider};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bounded_channel::BoundedReceiver;
use crate::tailer::LogLine;

pub type DeliveryStream = Box<dyn AsyncWrite + Send + Unpin>;

#[async_trait]
pub trait Dialer: Send + Sync {
    fn endpoint(&self) -> &str;

    /// Establish a fresh transport, reloading trust material.
    async fn dial(&self) -> Result<DeliveryStream, TlsError>;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryStats {
    pub lines: u64,
    pub bytes: u64,
    pub reconnects: u64,
}

pub struct DeliveryConnection<D> {
    dialer: D,
    stream: DeliveryStream,
    stats: DeliveryStats,
}

impl<D: Dialer> DeliveryConnection<D> {
    /// Dial the endpoint. Failure here is a startup error.
    pub async fn connect(dialer: D) -> Result<Self, DeliveryError> {
        let stream = dialer.dial().await.map_err(DeliveryError::Connect)?;
        info!(endpoint = dialer.endpoint(), "Connected to log endpoint");

        Ok(Self {
            dialer,
            stream,
            stats: DeliveryStats::default(),
        })
    }

    pub fn stats(&self) -> DeliveryStats {
        self.stats
    }

    /// Drain `lines` until every sender is gone or `cancel` fires.
    pub async fn run(
        mut self,
        mut lines: BoundedReceiver<LogLine>,
        cancel: CancellationToken,
    ) -> Result<DeliveryStats, DeliveryError> {
        loop {
            let line = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                line = lines.next() => match line {
                    Some(line) => line,
                    None => break,
                },
            };

            self.deliver(line.render()).await?;
        }

        if let Err(e) = self.stream.shutdown().await {
            debug!(error = %e, "Error closing delivery connection");
        }
        debug!(
            lines = self.stats.lines,
            bytes = self.stats.bytes,
            reconnects = self.stats.reconnects,
            "Delivery connection finished"
        );

        Ok(self.stats)
    }

    /// Write one payload, reconnecting and retrying once on failure.
    pub async fn deliver(&mut self, payload: Bytes) -> Result<(), DeliveryError> {
        if let Err(write) = write_payload(&mut self.stream, &payload).await {
            warn!(
                endpoint = self.dialer.endpoint(),
                error = %write,
                "Lost connection to log endpoint, reconnecting"
            );

            // the old transport is replaced, never repaired
            self.stream = match self.dialer.dial().await {
                Ok(stream) => stream,
                Err(source) => return Err(DeliveryError::Reconnect { write, source }),
            };
            self.stats.reconnects += 1;
            info!(endpoint = self.dialer.endpoint(), "Reconnected to log endpoint");

            write_payload(&mut self.stream, &payload)
                .await
                .map_err(DeliveryError::Retry)?;
        }

        self.stats.lines += 1;
        self.stats.bytes += payload.len() as u64;
        Ok(())
    }
}

async fn write_payload(stream: &mut DeliveryStream, payload: &[u8]) -> std::io::Result<()> {
    stream.write_all(payload).await?;
    stream.flush().await
}
