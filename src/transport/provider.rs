use crate::ledger::{LedgerError, NetworkId};
use futures_util::StreamExt;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Network-identity change notifications pushed by a provider. `None` means disconnected.
pub type NetworkChangeStream = Pin<Box<dyn futures_util::Stream<Item = Option<NetworkId>> + Send>>;

const NETWORK_CHANGE_CAPACITY: usize = 16;

/// A connection to a ledger node.
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
	/// The network the provider is currently attached to, `None` when disconnected.
	async fn network_id(&self) -> Result<Option<NetworkId>, LedgerError>;

	/// Subscribe to network changes. Providers that cannot report changes return `None`.
	fn network_changes(&self) -> Option<NetworkChangeStream>;
}

/// The externally supplied connection object. The synchronizer only ever
/// extracts its current provider.
pub trait Connection: Send + Sync {
	fn current_provider(&self) -> Option<Arc<dyn Provider>>;
}

/// Connection that hands out a fixed provider.
pub struct ProviderConnection {
	provider: Arc<dyn Provider>,
}

impl ProviderConnection {
	pub fn new(provider: Arc<dyn Provider>) -> Self {
		Self { provider }
	}
}

impl Connection for ProviderConnection {
	fn current_provider(&self) -> Option<Arc<dyn Provider>> {
		Some(self.provider.clone())
	}
}

/// Provider whose network is switched by hand.
pub struct InMemoryProvider {
	network: Mutex<Option<NetworkId>>,
	changes: broadcast::Sender<Option<NetworkId>>,
	failing: AtomicBool,
}

impl InMemoryProvider {
	pub fn new(network: Option<NetworkId>) -> Self {
		let (changes, _) = broadcast::channel(NETWORK_CHANGE_CAPACITY);
		Self {
			network: Mutex::new(network),
			changes,
			failing: AtomicBool::new(false),
		}
	}

	/// Attach to `network` and notify listeners, even if the network is unchanged.
	pub fn switch_network(&self, network: Option<NetworkId>) {
		*self.network.lock().unwrap_or_else(PoisonError::into_inner) = network.clone();
		debug!("Provider switched to network {:?}", network);
		// No listeners is fine
		let _ = self.changes.send(network);
	}

	/// Make `network_id` queries fail.
	pub fn set_failing(&self, failing: bool) {
		self.failing.store(failing, Ordering::SeqCst);
	}
}

#[async_trait::async_trait]
impl Provider for InMemoryProvider {
	async fn network_id(&self) -> Result<Option<NetworkId>, LedgerError> {
		if self.failing.load(Ordering::SeqCst) {
			return Err(LedgerError::Rpc("net_version failed".to_string()));
		}
		Ok(self
			.network
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.clone())
	}

	fn network_changes(&self) -> Option<NetworkChangeStream> {
		let receiver = self.changes.subscribe();
		let stream = futures_util::stream::unfold(receiver, |mut receiver| async move {
			loop {
				match receiver.recv().await {
					Ok(network) => return Some((network, receiver)),
					Err(broadcast::error::RecvError::Lagged(n)) => {
						warn!("Network change listener lagged by {} notifications", n);
					}
					Err(broadcast::error::RecvError::Closed) => return None,
				}
			}
		});
		Some(stream.boxed())
	}
}
