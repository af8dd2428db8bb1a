//! Legacy flat accessors.
//!
//! Old SDKs fetched interfaces through global accessors that asked for one
//! fixed historical version per family. This module keeps that version per
//! family (overridable from configuration) and caches the adapter each role
//! received until the role shuts down.

use crate::resolver::{Family, InterfaceAdapter, InterfaceTable};
use crate::types::Role;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct LegacyInterfaces {
    versions: BTreeMap<Family, String>,
    cache: HashMap<(Role, Family), Arc<InterfaceAdapter>>,
}

impl LegacyInterfaces {
    /// Builds the version map from the table defaults and `overrides`.
    pub fn new(table: &InterfaceTable, overrides: BTreeMap<Family, String>) -> Self {
        let mut versions: BTreeMap<Family, String> = table
            .families()
            .iter()
            .filter_map(|spec| Some((spec.family, spec.legacy_default?.to_string())))
            .collect();
        versions.extend(overrides);

        Self {
            versions,
            cache: HashMap::new(),
        }
    }

    pub fn version(&self, family: Family) -> Option<&str> {
        self.versions.get(&family).map(String::as_str)
    }

    pub fn cached(&self, role: Role, family: Family) -> Option<Arc<InterfaceAdapter>> {
        self.cache.get(&(role, family)).cloned()
    }

    pub fn store(&mut self, role: Role, family: Family, adapter: Arc<InterfaceAdapter>) {
        self.cache.insert((role, family), adapter);
    }

    pub fn clear_role(&mut self, role: Role) {
        self.cache.retain(|(cached_role, _), _| *cached_role != role);
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }

    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{FeatureStub, Interface};

    fn adapter(family: Family, role: Role) -> Arc<InterfaceAdapter> {
        let table = InterfaceTable::builtin();
        let spec = table.spec(family).unwrap();
        let target: Arc<dyn Interface> = Arc::new(FeatureStub::new(family, role));
        Arc::new(InterfaceAdapter::new(spec.shape(spec.latest.revision), role, target))
    }

    #[test]
    fn test_defaults_and_overrides() {
        let mut overrides = BTreeMap::new();
        overrides.insert(Family::User, "SteamUser021".to_string());
        let legacy = LegacyInterfaces::new(InterfaceTable::builtin(), overrides);

        assert_eq!(legacy.version(Family::User), Some("SteamUser021"));
        assert_eq!(legacy.version(Family::Friends), Some("SteamFriends015"));
        assert_eq!(legacy.version(Family::GameServer), Some("SteamGameServer012"));
        assert_eq!(legacy.version(Family::Parties), None);
    }

    #[test]
    fn test_clear_role_keeps_other_role() {
        let mut legacy = LegacyInterfaces::new(InterfaceTable::builtin(), BTreeMap::new());
        legacy.store(Role::Client, Family::Utils, adapter(Family::Utils, Role::Client));
        legacy.store(Role::Server, Family::Utils, adapter(Family::Utils, Role::Server));

        legacy.clear_role(Role::Client);
        assert!(legacy.cached(Role::Client, Family::Utils).is_none());
        assert!(legacy.cached(Role::Server, Family::Utils).is_some());

        legacy.clear();
        assert_eq!(legacy.cached_count(), 0);
    }
}
