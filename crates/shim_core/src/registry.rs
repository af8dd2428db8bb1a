//! Pipe handle allocation and role tracking.
//!
//! Handles are allocated from a counter that starts at 1 and only moves
//! forward. A released handle is never reused within the same registry, and
//! running out of handles is an error instead of a silent wrap.

use crate::error::{Result, ShimError};
use crate::types::{PipeHandle, PipeRole};
use std::collections::BTreeMap;
use tracing::{debug, error};

#[derive(Debug)]
pub struct PipeRegistry {
    next: Option<i32>,
    pipes: BTreeMap<PipeHandle, PipeRole>,
}

impl Default for PipeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PipeRegistry {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Creates a registry whose first handle is `first`. Values below 1 are clamped.
    pub fn starting_at(first: i32) -> Self {
        Self {
            next: Some(first.max(1)),
            pipes: BTreeMap::new(),
        }
    }

    /// Allocates a new unbound pipe.
    pub fn create(&mut self) -> Result<PipeHandle> {
        let Some(value) = self.next else {
            error!("💥 Pipe handle space exhausted, refusing to wrap");
            return Err(ShimError::HandleSpaceExhausted);
        };
        self.next = value.checked_add(1);

        let handle = PipeHandle(value);
        self.pipes.insert(handle, PipeRole::Unbound);
        debug!("Created pipe {}", handle);
        Ok(handle)
    }

    /// Removes `handle`. Returns true iff it existed.
    pub fn release(&mut self, handle: PipeHandle) -> bool {
        let existed = self.pipes.remove(&handle).is_some();
        if existed {
            debug!("Released pipe {}", handle);
        } else {
            debug!("Release of unknown pipe {}", handle);
        }
        existed
    }

    pub fn role(&self, handle: PipeHandle) -> Option<PipeRole> {
        self.pipes.get(&handle).copied()
    }

    pub fn contains(&self, handle: PipeHandle) -> bool {
        self.pipes.contains_key(&handle)
    }

    pub fn bind(&mut self, handle: PipeHandle, role: PipeRole) -> Result<()> {
        match self.pipes.get_mut(&handle) {
            Some(slot) => {
                *slot = role;
                Ok(())
            }
            None => Err(ShimError::InvalidHandle(handle)),
        }
    }

    pub fn len(&self) -> usize {
        self.pipes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipes.is_empty()
    }

    pub fn handles(&self) -> impl Iterator<Item = (PipeHandle, PipeRole)> + '_ {
        self.pipes.iter().map(|(handle, role)| (*handle, *role))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_start_at_one_and_increase() {
        let mut registry = PipeRegistry::new();
        assert_eq!(registry.create().unwrap(), PipeHandle(1));
        assert_eq!(registry.create().unwrap(), PipeHandle(2));
        assert_eq!(registry.role(PipeHandle(1)), Some(PipeRole::Unbound));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_release_reports_existence() {
        let mut registry = PipeRegistry::new();
        let pipe = registry.create().unwrap();
        assert!(registry.release(pipe));
        assert!(!registry.release(pipe));
        assert!(!registry.release(PipeHandle(99)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_released_handles_are_not_reused() {
        let mut registry = PipeRegistry::new();
        let first = registry.create().unwrap();
        registry.release(first);
        let second = registry.create().unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_bind_unknown_handle_fails() {
        let mut registry = PipeRegistry::new();
        assert_eq!(
            registry.bind(PipeHandle(7), PipeRole::Client),
            Err(ShimError::InvalidHandle(PipeHandle(7)))
        );
    }

    #[test]
    fn test_exhaustion_is_reported() {
        let mut registry = PipeRegistry::starting_at(i32::MAX);
        assert_eq!(registry.create().unwrap(), PipeHandle(i32::MAX));
        assert_eq!(registry.create(), Err(ShimError::HandleSpaceExhausted));
        // Releasing does not make the counter wrap either.
        registry.release(PipeHandle(i32::MAX));
        assert_eq!(registry.create(), Err(ShimError::HandleSpaceExhausted));
    }
}
