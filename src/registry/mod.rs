// SPDX-License-Identifier: Apache-2.0

//! Source Descriptor Store: the current set of watched sources keyed by ID.
//!
//! The lock only guards the map itself. Resolution of tokens and names happens
//! before it is taken, and callers quit replaced or removed descriptors after it
//! has been released.

mod descriptor;
mod quit;

pub use descriptor::{
    SourceCandidate, SourceDescriptor, SourceLocation, SourceOverrides, StartAt,
};
pub use quit::{QuitError, QuitListener, QuitSignal};

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

use crate::init::config::SourcesConfig;

#[derive(Debug)]
pub enum AddOutcome {
    Added {
        descriptor: Arc<SourceDescriptor>,
        /// Earlier descriptor for the same ID; its tailer must be quit.
        replaced: Option<Arc<SourceDescriptor>>,
    },
    Ignored,
    Unresolved,
}

impl AddOutcome {
    pub fn descriptor(&self) -> Option<&Arc<SourceDescriptor>> {
        match self {
            AddOutcome::Added { descriptor, .. } => Some(descriptor),
            _ => None,
        }
    }
}

pub struct SourceRegistry {
    default_token: String,
    config: SourcesConfig,
    ignore: HashSet<String>,
    sources: RwLock<HashMap<String, Arc<SourceDescriptor>>>,
}

impl SourceRegistry {
    pub fn new(default_token: impl Into<String>, config: SourcesConfig) -> Self {
        Self {
            default_token: default_token.into(),
            ignore: config.ignore_set(),
            config,
            sources: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &SourcesConfig {
        &self.config
    }

    pub fn is_ignored(&self, id: &str) -> bool {
        self.ignore.contains(id)
    }

    pub fn add(&self, candidate: SourceCandidate) -> AddOutcome {
        let SourceCandidate {
            id,
            location,
            start_at,
            overrides,
        } = candidate;

        if self.is_ignored(&id) || overrides.ignore {
            info!(source_id = %id, "Ignoring source");
            return AddOutcome::Ignored;
        }
        if id.is_empty() || location.is_empty() {
            info!(source_id = %id, "Dropping source with unresolved location");
            return AddOutcome::Unresolved;
        }

        let token = overrides
            .token
            .filter(|t| !t.is_empty())
            .or_else(|| self.config.token(&id).map(str::to_string))
            .unwrap_or_else(|| self.default_token.clone());
        let name = self
            .config
            .name(&id)
            .map(str::to_string)
            .or(overrides.name.filter(|n| !n.is_empty()));

        let descriptor = Arc::new(SourceDescriptor::new(
            id.clone(),
            token,
            name,
            location,
            start_at,
        ));

        let replaced = self.write().insert(id, descriptor.clone());
        debug!(
            source_id = descriptor.id(),
            location = %descriptor.location(),
            replaced = replaced.is_some(),
            "Registered source"
        );

        AddOutcome::Added {
            descriptor,
            replaced,
        }
    }

    /// Remove `id`; absent IDs are a no-op.
    pub fn remove(&self, id: &str) -> Option<Arc<SourceDescriptor>> {
        self.write().remove(id)
    }

    /// Remove `descriptor` only if it is still the one registered for its ID.
    pub fn remove_if_current(&self, descriptor: &Arc<SourceDescriptor>) -> bool {
        let mut sources = self.write();
        match sources.get(descriptor.id()) {
            Some(current) if Arc::ptr_eq(current, descriptor) => {
                sources.remove(descriptor.id());
                true
            }
            _ => false,
        }
    }

    pub fn lookup(&self, id: &str) -> Option<Arc<SourceDescriptor>> {
        self.read().get(id).cloned()
    }

    /// Visit every descriptor under the read lock. `f` must not block.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&Arc<SourceDescriptor>),
    {
        for descriptor in self.read().values() {
            f(descriptor)
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Take every descriptor out of the store, for teardown.
    pub fn drain(&self) -> Vec<Arc<SourceDescriptor>> {
        self.write().drain().map(|(_, d)| d).collect()
    }

    /// Log configuration entries that no discovered source matched.
    pub fn report_unmatched(&self) {
        let sources = self.read();
        for id in self.config.sources.keys() {
            if !sources.contains_key(id) && !self.ignore.contains(id) {
                info!(source_id = %id, "Configured source not found");
            }
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<SourceDescriptor>>> {
        self.sources.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<SourceDescriptor>>> {
        self.sources.write().unwrap_or_else(PoisonError::into_inner)
    }
}
