//! Transport to the ledger node.
//!
//! The externally supplied `Connection`, the `Provider` extracted from it, and
//! the `TransportHandle` the synchronizer holds on to.

/// Transport handle wrapping one provider
mod handle;
/// Connection and provider traits plus an in-memory provider
mod provider;

pub use handle::TransportHandle;
pub use provider::{
	Connection, InMemoryProvider, NetworkChangeStream, Provider, ProviderConnection,
};
