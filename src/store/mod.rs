//! Entity store
//!
//! Ordered, keyed in-memory mirror of the ledger's requests. The requester
//! address is the sole key; enumeration follows insertion order. Every
//! successful mutation raises exactly one `StoreChange` on the observer.

use crate::ledger::{Address, Request};
use std::collections::HashMap;

/// Structural or field change raised by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    Added(Address),
    Updated(Address),
    Cleared,
}

/// Mutations permitted on a stored request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestUpdate {
    /// Set `was_accepted`. Acceptance never reverts.
    MarkAccepted,
}

impl RequestUpdate {
    fn apply(self, request: &mut Request) {
        match self {
            RequestUpdate::MarkAccepted => request.was_accepted = true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Request for requester {0} already exists")]
    DuplicateKey(Address),

    #[error("No request for requester {0}")]
    NotFound(Address),
}

pub type ChangeObserver = Box<dyn Fn(&StoreChange) + Send + Sync>;

#[derive(Default)]
pub struct EntityStore {
    entries: Vec<Request>,
    index: HashMap<Address, usize>,
    observer: Option<ChangeObserver>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that reports its changes to `observer`.
    pub fn with_observer(observer: ChangeObserver) -> Self {
        Self {
            observer: Some(observer),
            ..Self::default()
        }
    }

    pub fn add(&mut self, request: Request) -> Result<(), StoreError> {
        let address = request.requester_address;
        if self.index.contains_key(&address) {
            return Err(StoreError::DuplicateKey(address));
        }
        self.index.insert(address, self.entries.len());
        self.entries.push(request);
        self.notify(StoreChange::Added(address));
        Ok(())
    }

    pub fn update(&mut self, address: &Address, update: RequestUpdate) -> Result<(), StoreError> {
        let position = *self
            .index
            .get(address)
            .ok_or(StoreError::NotFound(*address))?;
        update.apply(&mut self.entries[position]);
        self.notify(StoreChange::Updated(*address));
        Ok(())
    }

    pub fn has(&self, address: &Address) -> bool {
        self.index.contains_key(address)
    }

    pub fn get(&self, address: &Address) -> Option<&Request> {
        self.index.get(address).map(|&position| &self.entries[position])
    }

    /// Snapshot of every request in insertion order.
    pub fn get_all(&self) -> Vec<Request> {
        self.entries.clone()
    }

    /// Remove everything, raising a single change.
    pub fn clear_all(&mut self) {
        self.entries.clear();
        self.index.clear();
        self.notify(StoreChange::Cleared);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn notify(&self, change: StoreChange) {
        if let Some(observer) = &self.observer {
            observer(&change);
        }
    }
}
