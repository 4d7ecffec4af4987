use super::provider::{Connection, NetworkChangeStream, Provider};
use crate::ledger::NetworkId;
use futures_util::StreamExt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Wraps a possibly absent connection to the ledger.
///
/// The handle owns no business logic: it answers network-identity queries and
/// relays every network-change notification of the underlying provider,
/// without de-duplicating repeated tokens.
pub struct TransportHandle {
	supplied: bool,
	provider: Option<Arc<dyn Provider>>,
	listener: Option<NetworkChangeStream>,
}

impl TransportHandle {
	/// Acquire a handle from the externally supplied connection, if any.
	pub fn acquire(connection: Option<&dyn Connection>) -> Self {
		Self {
			supplied: connection.is_some(),
			provider: connection.and_then(|c| c.current_provider()),
			listener: None,
		}
	}

	/// Build a handle around a bare provider.
	pub fn from_provider(provider: Arc<dyn Provider>) -> Self {
		Self {
			supplied: true,
			provider: Some(provider),
			listener: None,
		}
	}

	/// True iff a connection object was supplied at construction.
	pub fn exists(&self) -> bool {
		self.supplied
	}

	pub fn provider(&self) -> Option<Arc<dyn Provider>> {
		self.provider.clone()
	}

	/// Extract the current provider into a fresh handle and release this one.
	///
	/// Returns `None` when the connection had no provider to extract.
	pub fn isolate(mut self) -> Option<TransportHandle> {
		let provider = self.provider.take();
		self.release();
		provider.map(TransportHandle::from_provider)
	}

	/// Query the current network. Failures are reported as disconnected.
	pub async fn network_identity(&mut self) -> Option<NetworkId> {
		let provider = self.provider.as_ref()?;
		match provider.network_id().await {
			Ok(network) => network,
			Err(e) => {
				warn!("Network identity query failed: {}", e);
				None
			}
		}
	}

	/// Register for network-change notifications. Registering twice keeps the first listener.
	pub fn listen(&mut self) -> bool {
		if self.listener.is_none() {
			if let Some(provider) = &self.provider {
				self.listener = provider.network_changes();
				if self.listener.is_none() {
					debug!("Provider does not report network changes");
				}
			}
		}
		self.listener.is_some()
	}

	pub fn is_listening(&self) -> bool {
		self.listener.is_some()
	}

	/// Wait for the next network-change notification.
	///
	/// Returns `None` if not listening or the provider stopped reporting changes.
	pub async fn next_network_change(&mut self) -> Option<Option<NetworkId>> {
		let listener = self.listener.as_mut()?;
		let change = listener.next().await;
		if change.is_none() {
			debug!("Network change listener closed");
			self.listener = None;
		}
		change
	}

	/// Detach from the underlying connection. Safe to call repeatedly.
	pub fn release(&mut self) {
		if self.listener.take().is_some() {
			debug!("Released network change listener");
		}
		self.provider = None;
	}
}

impl Drop for TransportHandle {
	fn drop(&mut self) {
		self.release();
	}
}
