//! Contracts of the feature subsystems the core drives but does not own.

use crate::resolver::{Family, FeatureStub, Interface};
use crate::types::Role;
use std::sync::Arc;

/// The network transport. Drained first in every dispatch cycle.
pub trait Transport: Send + Sync {
    fn drain(&self);
}

/// The server role's own subsystem with its internal callback queue.
pub trait ServerSubsystem: Send + Sync {
    fn run_callbacks(&self);

    fn shutdown(&self) {}
}

#[derive(Debug, Default)]
pub struct NullTransport;

impl Transport for NullTransport {
    fn drain(&self) {}
}

#[derive(Debug, Default)]
pub struct NullServer;

impl ServerSubsystem for NullServer {
    fn run_callbacks(&self) {}
}

pub type PeriodicAction = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeriodicId(pub u64);

/// Callables invoked once per dispatch cycle, in registration order.
#[derive(Default)]
pub struct PeriodicRegistry {
    next: u64,
    actions: Vec<(PeriodicId, PeriodicAction)>,
}

impl PeriodicRegistry {
    pub fn add(&mut self, action: PeriodicAction) -> PeriodicId {
        self.next += 1;
        let id = PeriodicId(self.next);
        self.actions.push((id, action));
        id
    }

    pub fn remove(&mut self, id: PeriodicId) -> bool {
        let before = self.actions.len();
        self.actions.retain(|(existing, _)| *existing != id);
        self.actions.len() != before
    }

    /// Copies the current actions so they can run without holding the registry.
    pub fn snapshot(&self) -> Vec<PeriodicAction> {
        self.actions.iter().map(|(_, action)| action.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Builds the collaborators of each new aggregate.
///
/// Called while the context lock is held; implementations must not call
/// back into the context.
pub trait SubsystemFactory: Send + Sync {
    fn transport(&self) -> Arc<dyn Transport> {
        Arc::new(NullTransport)
    }

    fn server_subsystem(&self) -> Arc<dyn ServerSubsystem> {
        Arc::new(NullServer)
    }

    fn feature(&self, family: Family, role: Role) -> Arc<dyn Interface> {
        Arc::new(FeatureStub::new(family, role))
    }

    /// Registers the periodic actions of a freshly built aggregate.
    fn periodic(&self, _registry: &mut PeriodicRegistry) {}
}

/// Factory producing inert collaborators.
#[derive(Debug, Default)]
pub struct DefaultSubsystems;

impl SubsystemFactory for DefaultSubsystems {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_periodic_registry_order_and_removal() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut registry = PeriodicRegistry::default();

        let first = {
            let hits = hits.clone();
            registry.add(Arc::new(move || {
                hits.fetch_add(1, Ordering::SeqCst);
            }))
        };
        let _second = {
            let hits = hits.clone();
            registry.add(Arc::new(move || {
                hits.fetch_add(10, Ordering::SeqCst);
            }))
        };

        for action in registry.snapshot() {
            action();
        }
        assert_eq!(hits.load(Ordering::SeqCst), 11);

        assert!(registry.remove(first));
        assert!(!registry.remove(first));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_default_factory_builds_stubs() {
        let factory = DefaultSubsystems;
        let feature = factory.feature(Family::Friends, Role::Client);
        assert_eq!(feature.family(), Family::Friends);
        assert_eq!(feature.role(), Role::Client);
    }
}
