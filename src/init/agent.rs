// SPDX-License-Identifier: Apache-2.0

//! Root coordinator: owns the source registry, the discovery strategy and
//! every tailer task, and moves between running, reloading and shutting down.

use futures::future::join_all;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{AbortHandle, Id, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::{debug, error, info, warn};

use crate::bounded_channel::{BoundedReceiver, BoundedSender, TrySendError, bounded};
use crate::discovery::{DiscoveryError, DiscoveryEvent, DiscoverySource};
use crate::init::config::SourcesConfig;
use crate::registry::{AddOutcome, SourceCandidate, SourceDescriptor, SourceRegistry};
use crate::tailer::{LogLine, TailerExit, TailerOptions, run_tailer};

const DISCOVERY_QUEUE_SIZE: usize = 64;

/// Builds the discovery strategy for a (re)loaded configuration.
pub type DiscoveryFactory =
    Box<dyn Fn(&SourcesConfig) -> Result<Arc<dyn DiscoverySource>, DiscoveryError> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Running,
    Reloading,
    ShuttingDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentCommand {
    Reload,
    Shutdown,
}

/// Queue a reload without waiting. Returns `false` when one is already
/// pending (the queued reload will pick up the latest configuration) or the
/// agent has exited.
pub fn request_reload(commands: &BoundedSender<AgentCommand>) -> bool {
    match commands.try_send(AgentCommand::Reload) {
        Ok(()) => true,
        Err(TrySendError::Full) => {
            debug!("Reload already pending");
            false
        }
        Err(TrySendError::Disconnected) => false,
    }
}

#[derive(Debug, Clone)]
pub struct AgentOptions {
    pub default_token: String,
    pub config_path: PathBuf,
    pub quit_timeout: Duration,
    pub tailer: TailerOptions,
}

struct WatchTask {
    cancel: CancellationToken,
    events: Option<BoundedReceiver<DiscoveryEvent>>,
    handle: JoinHandle<Result<(), DiscoveryError>>,
}

pub struct Agent {
    options: AgentOptions,
    factory: DiscoveryFactory,
    config: SourcesConfig,
    lifecycle: Lifecycle,
    registry: SourceRegistry,
    discovery: Arc<dyn DiscoverySource>,
    lines: BoundedSender<LogLine>,
    tailers: JoinSet<(Arc<SourceDescriptor>, TailerExit)>,
    aborts: HashMap<String, AbortHandle>,
    watch: Option<WatchTask>,
}

impl Agent {
    /// Load the configuration and build discovery. Both failing are startup errors.
    pub fn new(
        options: AgentOptions,
        factory: DiscoveryFactory,
        lines: BoundedSender<LogLine>,
    ) -> Result<Self, BoxError> {
        let config = SourcesConfig::load(&options.config_path)?;
        Self::with_config(options, config, factory, lines)
    }

    pub fn with_config(
        options: AgentOptions,
        config: SourcesConfig,
        factory: DiscoveryFactory,
        lines: BoundedSender<LogLine>,
    ) -> Result<Self, BoxError> {
        let discovery = factory(&config)?;
        let registry = SourceRegistry::new(options.default_token.clone(), config.clone());

        Ok(Self {
            options,
            factory,
            config,
            lifecycle: Lifecycle::Running,
            registry,
            discovery,
            lines,
            tailers: JoinSet::new(),
            aborts: HashMap::new(),
            watch: None,
        })
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    /// Run until a shutdown command arrives or the command channel closes. The
    /// fan-in sender is dropped on return so delivery can drain and finish.
    pub async fn run(mut self, mut commands: BoundedReceiver<AgentCommand>) -> Result<(), BoxError> {
        info!(discovery = self.discovery.name(), "Starting log shipper");
        self.start().await?;

        loop {
            tokio::select! {
                command = commands.next() => match command {
                    Some(AgentCommand::Reload) => self.reload().await?,
                    Some(AgentCommand::Shutdown) | None => break,
                },
                event = next_event(&mut self.watch) => match event {
                    Some(event) => self.on_discovery_event(event).await,
                    None => {
                        if let Err(e) = self.finish_watch().await {
                            self.shutdown().await;
                            return Err(e);
                        }
                    }
                },
                Some(joined) = self.tailers.join_next_with_id() => match joined {
                    Ok((id, (descriptor, exit))) => self.on_tailer_exit(id, descriptor, exit),
                    Err(e) => {
                        debug!(error = %e, "Tailer task failed");
                        self.aborts.retain(|_, handle| handle.id() != e.id());
                    }
                },
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Enumerate, start a tailer per source, then start watching for changes.
    pub async fn start(&mut self) -> Result<(), DiscoveryError> {
        let candidates = self.discovery.enumerate().await?;
        info!(
            discovery = self.discovery.name(),
            count = candidates.len(),
            "Discovered sources"
        );

        for candidate in candidates {
            self.add_source(candidate).await;
        }
        self.registry.report_unmatched();

        self.start_watch();
        self.lifecycle = Lifecycle::Running;
        Ok(())
    }

    /// Full teardown, then rebuild from a freshly read configuration. A
    /// configuration that fails to load leaves the previous one in effect.
    pub async fn reload(&mut self) -> Result<(), BoxError> {
        if self.lifecycle == Lifecycle::ShuttingDown {
            debug!("Ignoring reload during shutdown");
            return Ok(());
        }

        info!("Reloading configuration");
        self.lifecycle = Lifecycle::Reloading;
        self.teardown().await;

        match SourcesConfig::load(&self.options.config_path) {
            Ok(config) => self.config = config,
            Err(e) => warn!(error = %e, "Failed to reload configuration, keeping previous"),
        }

        self.discovery = (self.factory)(&self.config)?;
        self.registry = SourceRegistry::new(self.options.default_token.clone(), self.config.clone());
        self.start().await?;

        info!(sources = self.registry.len(), "Reload complete");
        Ok(())
    }

    pub async fn shutdown(&mut self) {
        info!("Shutting down");
        self.lifecycle = Lifecycle::ShuttingDown;
        self.teardown().await;
    }

    /// Stop the watch, quit every tailer and wait for all of them to be gone.
    async fn teardown(&mut self) {
        if let Some(watch) = self.watch.take() {
            stop_watch(watch).await;
        }

        let descriptors = self.registry.drain();
        let timeout = self.options.quit_timeout;
        let quits = descriptors.iter().map(|descriptor| async move {
            if let Err(e) = descriptor.quit_signal().quit(timeout).await {
                warn!(source_id = descriptor.id(), error = %e, "Tailer did not acknowledge quit");
            }
        });
        join_all(quits).await;

        // every tailer has acknowledged or timed out; abort whatever is left
        self.tailers.shutdown().await;
        self.aborts.clear();
        debug!(count = descriptors.len(), "Stopped all tailers");
    }

    async fn add_source(&mut self, candidate: SourceCandidate) {
        let AddOutcome::Added {
            descriptor,
            replaced,
        } = self.registry.add(candidate)
        else {
            return;
        };

        if let Some(replaced) = replaced {
            self.stop_tailer(&replaced).await;
        }
        self.spawn_tailer(descriptor);
    }

    fn spawn_tailer(&mut self, descriptor: Arc<SourceDescriptor>) {
        let opener = self.discovery.clone();
        let lines = self.lines.clone();
        let options = self.options.tailer;
        let id = descriptor.id().to_string();

        let handle = self.tailers.spawn(async move {
            let exit = run_tailer(descriptor.clone(), opener, lines, options).await;
            (descriptor, exit)
        });
        self.aborts.insert(id, handle);
    }

    /// Quit a descriptor that is no longer in the registry, aborting its task
    /// when the acknowledgment does not come in time.
    async fn stop_tailer(&mut self, descriptor: &Arc<SourceDescriptor>) {
        if let Err(e) = descriptor
            .quit_signal()
            .quit(self.options.quit_timeout)
            .await
        {
            warn!(source_id = descriptor.id(), error = %e, "Aborting tailer");
            if let Some(handle) = self.aborts.remove(descriptor.id()) {
                handle.abort();
            }
        }
    }

    async fn on_discovery_event(&mut self, event: DiscoveryEvent) {
        match event {
            DiscoveryEvent::Added(candidate) => {
                debug!(source_id = %candidate.id, "Source appeared");
                self.add_source(candidate).await;
            }
            DiscoveryEvent::Removed(id) => match self.registry.remove(&id) {
                Some(descriptor) => {
                    info!(source_id = %id, "Source removed");
                    self.stop_tailer(&descriptor).await;
                }
                None => debug!(source_id = %id, "Removed source was not tracked"),
            },
        }
    }

    fn on_tailer_exit(&mut self, id: Id, descriptor: Arc<SourceDescriptor>, exit: TailerExit) {
        if self
            .aborts
            .get(descriptor.id())
            .is_some_and(|handle| handle.id() == id)
        {
            self.aborts.remove(descriptor.id());
        }

        if exit.is_self_initiated() && self.registry.remove_if_current(&descriptor) {
            info!(source_id = descriptor.id(), exit = ?exit, "Source no longer tailed");
        }
    }

    fn start_watch(&mut self) {
        let (tx, rx) = bounded(DISCOVERY_QUEUE_SIZE);
        let cancel = CancellationToken::new();
        let discovery = self.discovery.clone();
        let watch_cancel = cancel.clone();

        let handle = tokio::spawn(async move { discovery.watch(tx, watch_cancel).await });

        self.watch = Some(WatchTask {
            cancel,
            events: Some(rx),
            handle,
        });
    }

    /// The watch stopped on its own. A clean finish keeps tailing what is
    /// known; a failed watch means new sources would go unnoticed, so it is
    /// returned as fatal.
    async fn finish_watch(&mut self) -> Result<(), BoxError> {
        let Some(watch) = self.watch.take() else {
            return Ok(());
        };

        match watch.handle.await {
            Ok(Ok(())) => {
                debug!("Discovery watch finished");
                Ok(())
            }
            Ok(Err(e)) => {
                error!(error = %e, "Discovery watch failed");
                Err(e.into())
            }
            Err(e) => {
                error!(error = %e, "Discovery watch task failed");
                Err(DiscoveryError::Task(e.to_string()).into())
            }
        }
    }
}

async fn next_event(watch: &mut Option<WatchTask>) -> Option<DiscoveryEvent> {
    match watch.as_mut().and_then(|w| w.events.as_mut()) {
        Some(events) => events.next().await,
        None => std::future::pending().await,
    }
}

async fn stop_watch(mut watch: WatchTask) {
    watch.cancel.cancel();
    // unblocks a watch parked on a full queue
    watch.events.take();

    match watch.handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Discovery watch failed"),
        Err(e) => debug!(error = %e, "Discovery watch task failed"),
    }
}
