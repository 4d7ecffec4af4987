use crate::ledger::{Address, LedgerError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a boot attempt stopped. Every kind is terminal for that attempt and is
/// only left again through a network-change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// No connection object was supplied.
    NoTransport,
    /// A transport exists but is not attached to any network.
    Disconnected,
    /// The network is reachable but the contract is not deployed there.
    NotDeployed,
    /// Any other failure. The cause is logged, never surfaced.
    Unhandled,
}

impl ErrorKind {
    /// Classify a failed contract resolution or bulk load.
    pub fn from_ledger_error(error: &LedgerError) -> Self {
        if error.is_not_deployed() {
            ErrorKind::NotDeployed
        } else {
            ErrorKind::Unhandled
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ErrorKind::NoTransport => "no ledger connection available",
            ErrorKind::Disconnected => "not connected to a ledger network",
            ErrorKind::NotDeployed => "contract not deployed on the detected network",
            ErrorKind::Unhandled => "unexpected ledger error",
        };
        f.write_str(text)
    }
}

/// Synchronizer status as seen by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
    /// Booting, or reloading after a network change.
    Initializing,
    Error(ErrorKind),
    /// Transport and network held, entities loaded, subscriptions active.
    Ready,
    /// Torn down by `release`. Terminal: no later status replaces it.
    Released,
}

impl SyncStatus {
    /// Loaded means the last boot attempt finished, successfully or not, or
    /// the synchronizer was released.
    pub fn is_loaded(&self) -> bool {
        !matches!(self, SyncStatus::Initializing)
    }

    pub fn error(&self) -> Option<ErrorKind> {
        match self {
            SyncStatus::Error(kind) => Some(*kind),
            _ => None,
        }
    }
}

/// Coarse notifications for the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncNotification {
    /// The entity set changed in some way.
    EntitiesUpdated,
    /// A boot attempt finished with the given status.
    Loaded(SyncStatus),
}

/// Errors returned by the high-level entity operations.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Synchronizer is not ready: {0:?}")]
    NotReady(SyncStatus),

    #[error("Requester {0} already has a valentine request")]
    AlreadyRequested(Address),

    #[error("No valentine request from {0}")]
    UnknownRequest(Address),

    #[error("Valentine request from {0} was already accepted")]
    AlreadyAccepted(Address),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}
