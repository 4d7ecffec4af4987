//! Live ledger event subscriptions.
//!
//! This module owns the two contract watchers (request created, request
//! accepted) and the reconciliation rules that merge their events into the
//! entity store. Watchers are re-armed on every successful load; arming first
//! stops the previous watcher of the same kind, so at most one is ever active
//! per event kind.
//!
//! Reconciliation is purely synchronous: a handler only performs bounded
//! store operations, so applying an event never suspends.

use crate::ledger::{
    ContractBinding, EventStream, LedgerError, Request, RequestAcceptedEvent, RequestCreatedEvent,
};
use crate::store::{EntityStore, RequestUpdate};
use futures_util::StreamExt;
use tracing::{debug, error, warn};

/// An event delivered by one of the contract watchers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEvent {
    /// `LogValentineRequestCreated`
    RequestCreated(RequestCreatedEvent),
    /// `LogRequestAccepted`
    RequestAccepted(RequestAcceptedEvent),
}

/// What applying an event did to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// A new request was added
    Added,
    /// An existing request was marked accepted
    Accepted,
    /// The creation event replays a request that is already stored
    AlreadyKnown,
    /// The acceptance refers to a request that is not stored
    UnknownRequester,
}

/// The pair of active contract watchers
#[derive(Default)]
pub struct EventSubscriptions {
    created: Option<EventStream<RequestCreatedEvent>>,
    accepted: Option<EventStream<RequestAcceptedEvent>>,
}

impl EventSubscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start both watchers on `binding`, replacing any previous ones.
    pub async fn arm(&mut self, binding: &dyn ContractBinding) -> Result<(), LedgerError> {
        self.stop();
        self.created = Some(binding.watch_request_created().await?);
        self.accepted = Some(binding.watch_request_accepted().await?);
        debug!("Armed request created and request accepted watchers");
        Ok(())
    }

    /// Drop both watchers. No further event is delivered afterwards.
    pub fn stop(&mut self) {
        if self.created.take().is_some() | self.accepted.take().is_some() {
            debug!("Stopped ledger event watchers");
        }
    }

    pub fn is_active(&self) -> bool {
        self.created.is_some() && self.accepted.is_some()
    }

    /// Wait for the next event from either watcher.
    ///
    /// Never resolves while no watcher is armed.
    pub async fn next(&mut self) -> Result<LedgerEvent, LedgerError> {
        let Self { created, accepted } = self;
        tokio::select! {
            event = next_from(created) => event.map(LedgerEvent::RequestCreated),
            event = next_from(accepted) => event.map(LedgerEvent::RequestAccepted),
        }
    }
}

async fn next_from<T>(slot: &mut Option<EventStream<T>>) -> Result<T, LedgerError> {
    if let Some(stream) = slot.as_mut() {
        if let Some(item) = stream.next().await {
            return item;
        }
        warn!("Ledger event watcher closed");
        *slot = None;
    }
    std::future::pending().await
}

/// Merge one event into the store.
///
/// Creation events only add requests the store does not hold yet, since a
/// watcher may replay one already captured by the bulk load. Acceptance events
/// for unknown requesters are ignored.
pub fn apply_event(store: &mut EntityStore, event: LedgerEvent) -> EventOutcome {
    match event {
        LedgerEvent::RequestCreated(created) => {
            let address = created.requester_address;
            if store.has(&address) {
                debug!("Request from {} is already known, skipping creation event", address);
                return EventOutcome::AlreadyKnown;
            }
            let request = Request::from(created);
            if request.is_placeholder() {
                debug!("Ignoring creation event for an empty request");
                return EventOutcome::AlreadyKnown;
            }
            match store.add(request) {
                Ok(()) => {
                    debug!("Added request from {}", address);
                    EventOutcome::Added
                }
                Err(e) => {
                    error!("Failed to add request from creation event: {}", e);
                    EventOutcome::AlreadyKnown
                }
            }
        }
        LedgerEvent::RequestAccepted(accepted) => {
            let address = accepted.requester_address;
            if !store.has(&address) {
                debug!("Acceptance for unknown requester {}, ignoring", address);
                return EventOutcome::UnknownRequester;
            }
            match store.update(&address, RequestUpdate::MarkAccepted) {
                Ok(()) => {
                    debug!("Request from {} accepted by {}", address, accepted.valentine_address);
                    EventOutcome::Accepted
                }
                Err(e) => {
                    error!("Failed to mark request accepted: {}", e);
                    EventOutcome::UnknownRequester
                }
            }
        }
    }
}
