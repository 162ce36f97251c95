// SPDX-License-Identifier: Apache-2.0

//! Event-stream discovery against a container runtime: enumerate running
//! containers, then follow "started" events. A container stopping ends its log
//! stream, which is how removal shows up.

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::{DiscoveryError, RuntimeError};
use super::{DiscoveryEvent, DiscoverySource};
use crate::bounded_channel::BoundedSender;
use crate::init::config::SourcesConfig;
use crate::registry::{SourceCandidate, SourceLocation, SourceOverrides, StartAt};
use crate::tailer::stream::{ByteStream, StreamTail};
use crate::tailer::{SourceOpener, SourceReader, TailError};

/// Container environment variable that disables shipping when non-empty.
pub const ENV_IGNORE: &str = "DLE_IGNORE";
/// Container environment variable carrying a delivery token.
pub const ENV_TOKEN: &str = "DLE_TOKEN";

pub type ContainerIdStream = BoxStream<'static, Result<String, RuntimeError>>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerInfo {
    pub id: String,
    /// Runtime name, usually with a leading `/`.
    pub name: Option<String>,
    /// `KEY=value` entries.
    pub env: Vec<String>,
}

impl ContainerInfo {
    fn env_value(&self, key: &str) -> Option<&str> {
        self.env.iter().find_map(|entry| {
            let (k, v) = entry.split_once('=')?;
            (k == key).then_some(v)
        })
    }

    pub fn overrides(&self) -> SourceOverrides {
        SourceOverrides {
            token: self
                .env_value(ENV_TOKEN)
                .filter(|t| !t.is_empty())
                .map(str::to_string),
            name: self
                .name
                .as_deref()
                .map(|n| n.trim_start_matches('/'))
                .filter(|n| !n.is_empty())
                .map(str::to_string),
            ignore: self.env_value(ENV_IGNORE).is_some_and(|v| !v.is_empty()),
        }
    }
}

#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// IDs of running containers.
    async fn list_running(&self) -> Result<Vec<String>, RuntimeError>;

    async fn inspect(&self, id: &str) -> Result<ContainerInfo, RuntimeError>;

    /// IDs of containers as they start.
    async fn started_events(&self) -> Result<ContainerIdStream, RuntimeError>;

    /// Follow stdout and stderr of a container. `StartAt::End` skips output
    /// produced before attaching.
    async fn logs(&self, id: &str, start_at: StartAt) -> Result<ByteStream, RuntimeError>;
}

pub struct RuntimeDiscovery<C> {
    client: C,
    config: SourcesConfig,
}

impl<C: RuntimeClient> RuntimeDiscovery<C> {
    pub fn new(client: C, config: SourcesConfig) -> Self {
        Self { client, config }
    }

    async fn candidate(&self, id: &str, start_at: StartAt) -> Result<SourceCandidate, RuntimeError> {
        let info = self.client.inspect(id).await?;
        let source_id = self
            .config
            .match_prefix(&[info.id.as_str()])
            .unwrap_or(&info.id)
            .to_string();

        Ok(
            SourceCandidate::new(source_id, SourceLocation::Container(info.id.clone()))
                .starting_at(start_at)
                .with_overrides(info.overrides()),
        )
    }
}

#[async_trait]
impl<C: RuntimeClient> SourceOpener for RuntimeDiscovery<C> {
    async fn open(
        &self,
        location: &SourceLocation,
        start_at: StartAt,
    ) -> Result<Box<dyn SourceReader>, TailError> {
        match location {
            SourceLocation::Container(id) => {
                let stream = self
                    .client
                    .logs(id, start_at)
                    .await
                    .map_err(|e| TailError::Stream(Box::new(e)))?;
                Ok(Box::new(StreamTail::new(stream)))
            }
            other => Err(TailError::UnsupportedLocation(other.to_string())),
        }
    }
}

#[async_trait]
impl<C: RuntimeClient> DiscoverySource for RuntimeDiscovery<C> {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn enumerate(&self) -> Result<Vec<SourceCandidate>, DiscoveryError> {
        let ids = self.client.list_running().await?;

        let mut candidates = Vec::with_capacity(ids.len());
        for id in ids {
            match self.candidate(&id, StartAt::End).await {
                Ok(candidate) => candidates.push(candidate),
                Err(e) => warn!(container_id = %id, error = %e, "Skipping container"),
            }
        }

        Ok(candidates)
    }

    async fn watch(
        &self,
        events: BoundedSender<DiscoveryEvent>,
        cancel: CancellationToken,
    ) -> Result<(), DiscoveryError> {
        let mut started = self.client.started_events().await?;
        info!("Watching container start events");

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                next = started.next() => next,
            };

            let id = match next {
                Some(Ok(id)) => id,
                Some(Err(e)) => {
                    warn!(error = %e, "Container event error");
                    continue;
                }
                None => {
                    return Err(RuntimeError::Events("event stream ended".to_string()).into());
                }
            };

            // a restarted container keeps its earlier output, attach at the end
            debug!(container_id = %id, "Container started");
            let candidate = match self.candidate(&id, StartAt::End).await {
                Ok(candidate) => candidate,
                Err(e) => {
                    warn!(container_id = %id, error = %e, "Skipping container");
                    continue;
                }
            };

            if events.send(DiscoveryEvent::Added(candidate)).await.is_err() {
                return Ok(());
            }
        }
    }
}
