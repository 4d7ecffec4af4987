//! Ledger State Synchronization Module
//!
//! This module keeps a local mirror of the valentine contract's requests in
//! step with the ledger. It is composed of:
//!
//! - `orchestrator`: the synchronizer driver and its boot / reload state machine.
//! - `handle`: the cloneable handle the host uses for status, entities, notifications and request operations.
//! - `events`: the contract watchers and the rules that merge their events into the store.
//! - `progress`: bulk load tracking and statistics.
//! - `demo`: synthetic requests for an empty ledger.
//! - `config`: synchronizer configuration.
//! - `types`: status, error kinds and notifications.

/// Synchronizer configuration
pub mod config;
/// Synthetic request generator
pub mod demo;
/// Contract event watchers and reconciliation
pub mod events;
/// Host-facing handle
pub mod handle;
/// Main coordinator for the synchronization process
pub mod orchestrator;
/// Bulk load progress tracking
pub mod progress;
/// Status, errors and notifications
pub mod types;

pub use config::SynchronizerConfig;
pub use handle::SynchronizerHandle;
pub use orchestrator::LedgerSynchronizer;
pub use progress::LoadStats;
pub use types::*;
