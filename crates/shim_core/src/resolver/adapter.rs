//! Per-version adapters and the cache that keeps them alive.
//!
//! One shared implementation exists per (role, family). Every historical
//! shape of that family is an [`InterfaceAdapter`] forwarding to it, and
//! each adapter is created once and handed out by pointer until the
//! aggregate that owns the cache is torn down.

use super::table::{AdapterShape, Family};
use crate::types::Role;
use std::collections::HashMap;
use std::ffi::c_void;
use std::fmt;
use std::sync::Arc;

/// The shared implementation behind every version of one family.
pub trait Interface: Send + Sync + fmt::Debug {
    fn family(&self) -> Family;

    fn role(&self) -> Role;
}

/// Inert implementation used when no feature subsystem is plugged in.
#[derive(Debug)]
pub struct FeatureStub {
    family: Family,
    role: Role,
}

impl FeatureStub {
    pub fn new(family: Family, role: Role) -> Self {
        Self { family, role }
    }
}

impl Interface for FeatureStub {
    fn family(&self) -> Family {
        self.family
    }

    fn role(&self) -> Role {
        self.role
    }
}

/// A historical call shape forwarding to a shared implementation.
#[derive(Debug)]
pub struct InterfaceAdapter {
    shape: AdapterShape,
    role: Role,
    target: Arc<dyn Interface>,
}

impl InterfaceAdapter {
    pub fn new(shape: AdapterShape, role: Role, target: Arc<dyn Interface>) -> Self {
        Self {
            shape,
            role,
            target,
        }
    }

    pub fn shape(&self) -> AdapterShape {
        self.shape
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn target(&self) -> &Arc<dyn Interface> {
        &self.target
    }

    /// Stable address handed across the C boundary.
    pub fn as_raw(self: &Arc<Self>) -> *mut c_void {
        Arc::as_ptr(self) as *mut c_void
    }
}

/// Feature implementations and adapters owned by one aggregate.
#[derive(Debug, Default)]
pub struct AdapterCache {
    features: HashMap<(Role, Family), Arc<dyn Interface>>,
    adapters: HashMap<(Role, AdapterShape), Arc<InterfaceAdapter>>,
}

impl AdapterCache {
    pub fn feature(&self, role: Role, family: Family) -> Option<Arc<dyn Interface>> {
        self.features.get(&(role, family)).cloned()
    }

    /// Stores `feature` unless one is already present, returning the kept one.
    pub fn insert_feature(
        &mut self,
        role: Role,
        family: Family,
        feature: Arc<dyn Interface>,
    ) -> Arc<dyn Interface> {
        self.features
            .entry((role, family))
            .or_insert(feature)
            .clone()
    }

    /// Returns the adapter for `shape`, creating it over `target` on first use.
    pub fn adapter(
        &mut self,
        role: Role,
        shape: AdapterShape,
        target: Arc<dyn Interface>,
    ) -> Arc<InterfaceAdapter> {
        self.adapters
            .entry((role, shape))
            .or_insert_with(|| Arc::new(InterfaceAdapter::new(shape, role, target)))
            .clone()
    }

    pub fn adapter_count(&self) -> usize {
        self.adapters.len()
    }

    pub fn clear(&mut self) {
        self.adapters.clear();
        self.features.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(revision: u16) -> AdapterShape {
        AdapterShape {
            family: Family::User,
            revision,
        }
    }

    #[test]
    fn test_same_shape_returns_same_adapter() {
        let mut cache = AdapterCache::default();
        let feature = cache.insert_feature(
            Role::Client,
            Family::User,
            Arc::new(FeatureStub::new(Family::User, Role::Client)),
        );

        let first = cache.adapter(Role::Client, shape(21), feature.clone());
        let again = cache.adapter(Role::Client, shape(21), feature.clone());
        let older = cache.adapter(Role::Client, shape(18), feature);

        assert!(Arc::ptr_eq(&first, &again));
        assert!(!Arc::ptr_eq(&first, &older));
        assert!(Arc::ptr_eq(first.target(), older.target()));
        assert_eq!(cache.adapter_count(), 2);
    }

    #[test]
    fn test_first_feature_is_kept() {
        let mut cache = AdapterCache::default();
        let first = cache.insert_feature(
            Role::Server,
            Family::Utils,
            Arc::new(FeatureStub::new(Family::Utils, Role::Server)),
        );
        let second = cache.insert_feature(
            Role::Server,
            Family::Utils,
            Arc::new(FeatureStub::new(Family::Utils, Role::Server)),
        );
        assert!(Arc::ptr_eq(&first, &second));
    }
}
