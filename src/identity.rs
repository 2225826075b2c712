//! Identity & lock registry
//!
//! One ownership table keyed by [`Identity`], tagged with the pool that
//! currently owns each entry, under a single mutex. Every acquire and release
//! goes through the same lock, so an identity can never be active twice even
//! when several pools race for it.

use crate::error::{IdentityError, Result};
use crate::types::{Identity, PoolKind};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// Tracks which identities are currently being worked on
#[derive(Debug, Default)]
pub struct IdentityRegistry {
    active: Mutex<HashMap<Identity, PoolKind>>,
}

impl IdentityRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `identity` as active, owned by `owner`
    ///
    /// # Errors
    ///
    /// - [`IdentityError::Incomplete`] if the identity has no source
    /// - [`IdentityError::InUse`] if the identity is already active
    pub fn acquire(&self, identity: &Identity, owner: PoolKind) -> Result<()> {
        if identity.source.is_empty() {
            return Err(IdentityError::Incomplete {
                relative_path: identity.relative_path.clone(),
            }
            .into());
        }

        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = active.get(identity) {
            return Err(IdentityError::InUse {
                key: identity.key(),
                owner: current.to_string(),
            }
            .into());
        }
        active.insert(identity.clone(), owner);
        Ok(())
    }

    /// Clear `identity`; a no-op if it is not active
    pub fn release(&self, identity: &Identity) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(identity);
    }

    /// Pool currently owning `identity`, if any
    pub fn owner(&self, identity: &Identity) -> Option<PoolKind> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identity)
            .copied()
    }

    /// Whether `identity` is active
    pub fn is_active(&self, identity: &Identity) -> bool {
        self.owner(identity).is_some()
    }

    /// Number of active identities
    pub fn len(&self) -> usize {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no identity is active
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
