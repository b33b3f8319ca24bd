//! # Vault Registry
//!
//! The coordinator's index structures, kept in one value so that a single
//! journaled cell covers all of them:
//!
//! - `entries`: the registered set, with each vault's handle;
//! - `creator_index`: creator → vaults, with a slot table so removal is a
//!   swap-remove rather than a shift or a scan;
//! - `token_index` / `reverse_token_index`: token ↔ vault, both directions;
//! - `position_index`: (collection, position id) → vault. Position ids are
//!   only unique within their collection.
//!
//! Every mutation has a `journaled_*` form that also returns its exact
//! inverse, for use with [`Journaled::apply`]. Undoing a change costs the
//! same as making it.
//!
//! Nothing here calls out to other components.
//!
//! [`Journaled::apply`]: crate::ledger::Journaled::apply

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::ledger::Inverse;
use crate::types::{Address, TokenId};
use crate::vault::Vault;

/// Errors raised when an insert would break index uniqueness.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("vault {0} is already registered")]
    AlreadyRegistered(Address),

    #[error("token {token} is already governed by vault {vault}")]
    TokenTaken { token: Address, vault: Address },

    #[error("position #{token_id} of {collection} is already governed by vault {vault}")]
    PositionTaken {
        collection: Address,
        token_id: TokenId,
        vault: Address,
    },
}

/// A detected disagreement between indices.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("index inconsistency: {0}")]
pub struct IndexInconsistency(pub String);

/// Inverse of one registry mutation.
pub type RegistryUndo = Inverse<Registry>;

/// A launch position: the collection it lives in and its id there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PositionKey {
    pub collection: Address,
    pub token_id: TokenId,
}

impl PositionKey {
    pub fn new(collection: Address, token_id: TokenId) -> Self {
        Self {
            collection,
            token_id,
        }
    }
}

struct Entry {
    handle: Arc<Vault>,
    creator: Address,
    position: PositionKey,
}

/// What a removal took out of the indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemovedVault {
    pub vault: Address,
    pub creator: Address,
    pub token: Address,
    pub position: PositionKey,
}

/// Everything needed to put a removed vault back where it was.
struct Tombstone {
    vault: Address,
    entry: Entry,
    token: Address,
    slot: usize,
}

/// Coordinator-side indices over registered vaults.
#[derive(Default)]
pub struct Registry {
    entries: HashMap<Address, Entry>,
    creator_index: HashMap<Address, Vec<Address>>,
    creator_slots: HashMap<Address, usize>,
    token_index: HashMap<Address, Address>,
    reverse_token_index: HashMap<Address, Address>,
    position_index: HashMap<PositionKey, Address>,
}

impl Registry {
    /// Registers `handle` under `creator`, `token` and `position`.
    pub fn insert(
        &mut self,
        handle: Arc<Vault>,
        creator: Address,
        token: Address,
        position: PositionKey,
    ) -> Result<(), RegistryError> {
        let vault = handle.address();
        if self.entries.contains_key(&vault) {
            return Err(RegistryError::AlreadyRegistered(vault));
        }
        if let Some(&existing) = self.token_index.get(&token) {
            return Err(RegistryError::TokenTaken {
                token,
                vault: existing,
            });
        }
        if let Some(&existing) = self.position_index.get(&position) {
            return Err(RegistryError::PositionTaken {
                collection: position.collection,
                token_id: position.token_id,
                vault: existing,
            });
        }

        self.entries.insert(
            vault,
            Entry {
                handle,
                creator,
                position,
            },
        );
        self.push_creator(creator, vault);
        self.token_index.insert(token, vault);
        self.reverse_token_index.insert(vault, token);
        self.position_index.insert(position, vault);
        Ok(())
    }

    /// [`insert`](Self::insert), returning the removal that undoes it.
    pub fn journaled_insert(
        &mut self,
        handle: Arc<Vault>,
        creator: Address,
        token: Address,
        position: PositionKey,
    ) -> (Result<(), RegistryError>, Option<RegistryUndo>) {
        let vault = handle.address();
        match self.insert(handle, creator, token, position) {
            // The new vault is the tail of its creator's list until later
            // changes are undone, so removing it is an exact inverse.
            Ok(()) => (
                Ok(()),
                undo(move |r| {
                    r.take(vault);
                }),
            ),
            Err(err) => (Err(err), None),
        }
    }

    /// Re-keys `vault` under `new_creator`. Returns the previous creator, or
    /// `None` if the vault is not registered.
    pub fn move_creator(&mut self, vault: Address, new_creator: Address) -> Option<Address> {
        self.relocate(vault, new_creator).map(|(previous, _)| previous)
    }

    /// [`move_creator`](Self::move_creator), returning the move that undoes
    /// it, slot included.
    pub fn journaled_move_creator(
        &mut self,
        vault: Address,
        new_creator: Address,
    ) -> (Option<Address>, Option<RegistryUndo>) {
        match self.relocate(vault, new_creator) {
            Some((previous, slot)) => (
                Some(previous),
                undo(move |r| r.relocate_back(vault, previous, slot)),
            ),
            None => (None, None),
        }
    }

    /// Drops `vault` from every index.
    pub fn remove(&mut self, vault: Address) -> Option<RemovedVault> {
        self.take(vault).map(|t| t.summary())
    }

    /// [`remove`](Self::remove), returning the reinsertion that undoes it.
    pub fn journaled_remove(&mut self, vault: Address) -> (Option<RemovedVault>, Option<RegistryUndo>) {
        match self.take(vault) {
            Some(tombstone) => (
                Some(tombstone.summary()),
                undo(move |r| r.restore(tombstone)),
            ),
            None => (None, None),
        }
    }

    pub fn is_registered(&self, vault: Address) -> bool {
        self.entries.contains_key(&vault)
    }

    /// Handle of a registered vault.
    pub fn handle(&self, vault: Address) -> Option<Arc<Vault>> {
        self.entries.get(&vault).map(|e| Arc::clone(&e.handle))
    }

    /// Vaults currently held by `creator`.
    pub fn vaults_of(&self, creator: Address) -> Vec<Address> {
        self.creator_index.get(&creator).cloned().unwrap_or_default()
    }

    pub fn vault_for_token(&self, token: Address) -> Option<Address> {
        self.token_index.get(&token).copied()
    }

    pub fn token_for_vault(&self, vault: Address) -> Option<Address> {
        self.reverse_token_index.get(&vault).copied()
    }

    pub fn vault_for_position(&self, position: PositionKey) -> Option<Address> {
        self.position_index.get(&position).copied()
    }

    /// Number of registered vaults.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cross-checks every index against the registered set.
    pub fn verify(&self) -> Result<(), IndexInconsistency> {
        let fail = |msg: String| Err(IndexInconsistency(msg));

        for (vault, entry) in &self.entries {
            let Some(token) = self.reverse_token_index.get(vault) else {
                return fail(format!("{vault} has no reverse token entry"));
            };
            if self.token_index.get(token) != Some(vault) {
                return fail(format!("token {token} does not point back to {vault}"));
            }
            if self.position_index.get(&entry.position) != Some(vault) {
                return fail(format!(
                    "position #{} of {} does not point to {vault}",
                    entry.position.token_id, entry.position.collection
                ));
            }
            let listed = self
                .creator_index
                .get(&entry.creator)
                .map_or(0, |list| list.iter().filter(|v| *v == vault).count());
            if listed != 1 {
                return fail(format!(
                    "{vault} listed {listed} times under creator {}",
                    entry.creator
                ));
            }
        }

        let listed_total: usize = self.creator_index.values().map(Vec::len).sum();
        if listed_total != self.entries.len()
            || self.token_index.len() != self.entries.len()
            || self.reverse_token_index.len() != self.entries.len()
            || self.position_index.len() != self.entries.len()
        {
            return fail("index sizes disagree with the registered set".into());
        }

        for list in self.creator_index.values() {
            for (slot, vault) in list.iter().enumerate() {
                if self.creator_slots.get(vault) != Some(&slot) {
                    return fail(format!("slot table is stale for {vault}"));
                }
            }
        }
        Ok(())
    }

    /// Moves `vault` to the tail of `new_creator`'s list. Returns the
    /// previous creator and the slot it vacated.
    fn relocate(&mut self, vault: Address, new_creator: Address) -> Option<(Address, usize)> {
        let entry = self.entries.get_mut(&vault)?;
        let previous = std::mem::replace(&mut entry.creator, new_creator);
        let slot = self.remove_creator(previous, vault).unwrap_or_default();
        self.push_creator(new_creator, vault);
        Some((previous, slot))
    }

    fn relocate_back(&mut self, vault: Address, previous: Address, slot: usize) {
        let Some(entry) = self.entries.get_mut(&vault) else {
            return;
        };
        let current = std::mem::replace(&mut entry.creator, previous);
        self.remove_creator(current, vault);
        self.insert_creator_at(previous, vault, slot);
    }

    fn take(&mut self, vault: Address) -> Option<Tombstone> {
        let entry = self.entries.remove(&vault)?;
        let slot = self.remove_creator(entry.creator, vault).unwrap_or_default();
        let token = self.reverse_token_index.remove(&vault)?;
        self.token_index.remove(&token);
        self.position_index.remove(&entry.position);
        Some(Tombstone {
            vault,
            entry,
            token,
            slot,
        })
    }

    fn restore(&mut self, tombstone: Tombstone) {
        let Tombstone {
            vault,
            entry,
            token,
            slot,
        } = tombstone;
        self.insert_creator_at(entry.creator, vault, slot);
        self.token_index.insert(token, vault);
        self.reverse_token_index.insert(vault, token);
        self.position_index.insert(entry.position, vault);
        self.entries.insert(vault, entry);
    }

    fn push_creator(&mut self, creator: Address, vault: Address) {
        let list = self.creator_index.entry(creator).or_default();
        self.creator_slots.insert(vault, list.len());
        list.push(vault);
    }

    /// Puts `vault` back at `slot`, undoing the swap-remove that took it out:
    /// the vault that was swapped into `slot` returns to the tail.
    fn insert_creator_at(&mut self, creator: Address, vault: Address, slot: usize) {
        let list = self.creator_index.entry(creator).or_default();
        if slot >= list.len() {
            self.creator_slots.insert(vault, list.len());
            list.push(vault);
            return;
        }
        let displaced = std::mem::replace(&mut list[slot], vault);
        self.creator_slots.insert(displaced, list.len());
        list.push(displaced);
        self.creator_slots.insert(vault, slot);
    }

    /// Swap-removes `vault` from `creator`'s list. Returns the vacated slot.
    fn remove_creator(&mut self, creator: Address, vault: Address) -> Option<usize> {
        let slot = self.creator_slots.remove(&vault)?;
        let list = self.creator_index.get_mut(&creator)?;
        list.swap_remove(slot);
        if let Some(&moved) = list.get(slot) {
            self.creator_slots.insert(moved, slot);
        }
        if list.is_empty() {
            self.creator_index.remove(&creator);
        }
        Some(slot)
    }
}

fn undo(f: impl FnOnce(&mut Registry) + Send + 'static) -> Option<RegistryUndo> {
    Some(Box::new(f))
}

impl Tombstone {
    fn summary(&self) -> RemovedVault {
        RemovedVault {
            vault: self.vault,
            creator: self.entry.creator,
            token: self.token,
            position: self.entry.position,
        }
    }
}
