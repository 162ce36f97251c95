// SPDX-License-Identifier: Apache-2.0

//! Source discovery.
//!
//! A `DiscoverySource` lists the sources that exist at startup, optionally
//! reports sources appearing and disappearing afterwards, and knows how to
//! open the live output of the locations it hands out.

pub mod directory;
pub mod docker;
pub mod error;
pub mod finder;
pub mod runtime;
pub mod watcher;

pub use directory::{DirectoryDiscovery, DirectoryOptions};
pub use error::{DiscoveryError, RuntimeError};
pub use runtime::{RuntimeClient, RuntimeDiscovery};

use async_trait::async_trait;
use clap::ValueEnum;
use tokio_util::sync::CancellationToken;

use crate::bounded_channel::BoundedSender;
use crate::registry::SourceCandidate;
use crate::tailer::SourceOpener;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    Added(SourceCandidate),
    /// Source ID that went away.
    Removed(String),
}

#[async_trait]
pub trait DiscoverySource: SourceOpener {
    fn name(&self) -> &'static str;

    /// Sources present right now.
    async fn enumerate(&self) -> Result<Vec<SourceCandidate>, DiscoveryError>;

    /// Report changes until `cancel` fires or `events` is closed. Strategies
    /// without change notification return immediately.
    async fn watch(
        &self,
        events: BoundedSender<DiscoveryEvent>,
        cancel: CancellationToken,
    ) -> Result<(), DiscoveryError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum DiscoveryKind {
    /// Scan a log directory tree
    #[default]
    Directory,
    /// Query the container runtime
    Docker,
}
