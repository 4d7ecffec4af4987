//! Keeps a local, in-memory view of the valentine requests recorded on a
//! ledger synchronized with the ledger's state, across connection loss,
//! network switches and pushed contract events.

pub mod ledger;
pub mod store;
pub mod sync;
pub mod transport;

pub use ledger::{Address, NetworkId, NewRequest, Request};
pub use sync::{
	ErrorKind, LedgerSynchronizer, SyncError, SyncNotification, SyncStatus, SynchronizerConfig,
	SynchronizerHandle,
};
