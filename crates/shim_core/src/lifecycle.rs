//! The aggregate: everything that lives from the first pipe to the last.
//!
//! A context builds an aggregate when a pipe is created while none exists
//! and retires it when the last pipe is released. Retiring stops the
//! keepalive thread and shuts the server subsystem down; every adapter
//! handed out during the aggregate's life is dropped with it.

use crate::collaborators::{PeriodicRegistry, ServerSubsystem, SubsystemFactory, Transport};
use crate::config::ShimConfig;
use crate::dispatch::EventStore;
use crate::keepalive::Keepalive;
use crate::registry::PipeRegistry;
use crate::resolver::{AdapterCache, Capabilities};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Login state of the two roles.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionFlags {
    pub user_logged_in: bool,
    pub server_initialized: bool,
}

pub(crate) struct Aggregate {
    pub(crate) id: Uuid,
    pub(crate) registry: PipeRegistry,
    pub(crate) session: SessionFlags,
    pub(crate) events: EventStore,
    pub(crate) adapters: AdapterCache,
    pub(crate) capabilities: Capabilities,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) server: Arc<dyn ServerSubsystem>,
    pub(crate) periodic: PeriodicRegistry,
    pub(crate) keepalive: Keepalive,
}

impl Aggregate {
    pub(crate) fn build(config: &ShimConfig, factory: &dyn SubsystemFactory) -> Self {
        let mut periodic = PeriodicRegistry::default();
        factory.periodic(&mut periodic);

        let aggregate = Self {
            id: Uuid::new_v4(),
            registry: PipeRegistry::new(),
            session: SessionFlags::default(),
            events: EventStore::new(),
            adapters: AdapterCache::default(),
            capabilities: Capabilities::empty(),
            transport: factory.transport(),
            server: factory.server_subsystem(),
            periodic,
            keepalive: Keepalive::new(config.keepalive.clone()),
        };
        info!("🏗️ Built session aggregate {}", aggregate.id);
        aggregate
    }

    /// Stops owned threads and subsystems. Must run without a state borrow.
    pub(crate) fn retire(mut self) {
        self.keepalive.stop();
        self.server.shutdown();
        self.adapters.clear();
        info!("🧹 Destroyed session aggregate {}", self.id);
    }
}

/// A caller-owned block that is rebuilt whenever the context generation moves.
#[derive(Debug)]
pub struct ContextBlock<T> {
    generation: u64,
    value: Option<T>,
}

impl<T> Default for ContextBlock<T> {
    fn default() -> Self {
        Self {
            generation: 0,
            value: None,
        }
    }
}

impl<T> ContextBlock<T> {
    /// Returns the value, rebuilding it first if `generation` differs from the stored one.
    pub fn get_or_init(&mut self, generation: u64, init: impl FnOnce() -> T) -> &T {
        if self.generation != generation {
            self.value = None;
            self.generation = generation;
        }
        self.value.get_or_insert_with(init)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}
