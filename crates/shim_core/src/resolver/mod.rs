//! # Version Resolver
//!
//! Maps an untyped interface token such as `"SteamUser021"` onto the family
//! that owns it and the adapter shape that serves it.
//!
//! ## Matching
//!
//! Families are identified by prefix. Prefixes are tried longest first so a
//! specific family (`SteamNetworkingSocketsSerialized`) is never shadowed by
//! a shorter one that is also its prefix (`SteamNetworkingSockets`,
//! `SteamNetworking`). Within a family an exact token match selects that
//! revision's shape; any other suffix falls back to the latest shape.
//!
//! ## Capabilities
//!
//! Every resolution carries the capabilities of the selected row. The caller
//! latches them; the resolver itself is pure and holds no state.

pub mod adapter;
pub mod table;

pub use adapter::{AdapterCache, FeatureStub, Interface, InterfaceAdapter};
pub use table::{
    AdapterShape, Capabilities, Family, FamilySpec, Revision, Scope, BUILTIN_FAMILIES,
};

use crate::error::{Result, ShimError};
use crate::types::{PipeRole, Role};
use once_cell::sync::Lazy;
use tracing::debug;

static BUILTIN_TABLE: Lazy<InterfaceTable> = Lazy::new(|| InterfaceTable::new(BUILTIN_FAMILIES));

/// Outcome of resolving one token.
#[derive(Debug, Clone, Copy)]
pub struct Resolution {
    pub spec: &'static FamilySpec,
    pub shape: AdapterShape,
    pub caps: Capabilities,
    /// False when the token was not recognized and the latest shape was used.
    pub exact: bool,
}

impl Resolution {
    pub fn family(&self) -> Family {
        self.spec.family
    }

    /// The role whose implementation serves this resolution for a pipe of `pipe_role`.
    pub fn serving_role(&self, pipe_role: PipeRole) -> Role {
        match self.spec.scope {
            Scope::PerRole => pipe_role.effective(),
            Scope::ClientOnly => Role::Client,
            Scope::ServerOnly => Role::Server,
        }
    }
}

/// A family table indexed by prefix length.
#[derive(Debug)]
pub struct InterfaceTable {
    families: &'static [FamilySpec],
    by_prefix: Vec<(&'static str, &'static FamilySpec)>,
}

impl InterfaceTable {
    pub fn new(families: &'static [FamilySpec]) -> Self {
        let mut by_prefix: Vec<(&'static str, &'static FamilySpec)> = families
            .iter()
            .flat_map(|spec| spec.prefixes.iter().map(move |prefix| (*prefix, spec)))
            .collect();
        // Stable sort keeps table order among prefixes of equal length.
        by_prefix.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

        Self {
            families,
            by_prefix,
        }
    }

    /// The table of every family this crate knows about.
    pub fn builtin() -> &'static InterfaceTable {
        &BUILTIN_TABLE
    }

    pub fn families(&self) -> &'static [FamilySpec] {
        self.families
    }

    pub fn spec(&self, family: Family) -> Option<&'static FamilySpec> {
        self.families.iter().find(|spec| spec.family == family)
    }

    /// Finds the family owning `token` by longest matching prefix.
    pub fn family_for(&self, token: &str) -> Option<&'static FamilySpec> {
        self.by_prefix
            .iter()
            .find(|(prefix, _)| token.starts_with(prefix))
            .map(|(_, spec)| *spec)
    }

    /// Resolves `token` to a family and adapter shape.
    ///
    /// Unknown families are an error. Unknown versions of a known family are
    /// not: they resolve to the latest shape with `exact == false`.
    pub fn resolve(&self, token: &str) -> Result<Resolution> {
        let Some(spec) = self.family_for(token) else {
            debug!("No interface family matches {:?}", token);
            return Err(ShimError::UnknownInterfaceFamily(token.to_string()));
        };

        if let Some(row) = spec.revision_for(token) {
            return Ok(Resolution {
                spec,
                shape: spec.shape(row.revision),
                caps: row.caps,
                exact: true,
            });
        }

        debug!(
            "{}, using {}",
            ShimError::UnknownInterfaceVersion(token.to_string()),
            spec.latest.token
        );
        Ok(Resolution {
            spec,
            shape: spec.shape(spec.latest.revision),
            caps: spec.latest.caps,
            exact: false,
        })
    }
}
