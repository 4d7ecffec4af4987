//! Host-facing side of the synchronizer.
//!
//! `SynchronizerHandle` is the whole contract towards the presentation layer:
//! status accessors, the entity snapshot, the coarse notification channel,
//! and the high-level request operations that go through the current contract
//! binding.

use super::progress::LoadStats;
use super::types::{ErrorKind, SyncError, SyncNotification, SyncStatus};
use crate::ledger::{
	Address, ContractBinding, LedgerError, NetworkId, NewRequest, Request, decode_request,
};
use crate::store::EntityStore;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

/// State shared between the synchronizer driver and its handles.
pub(crate) struct SharedState {
	store: Mutex<EntityStore>,
	binding: RwLock<Option<Arc<dyn ContractBinding>>>,
	status: watch::Sender<SyncStatus>,
	network: Mutex<Option<NetworkId>>,
	last_load: Mutex<Option<LoadStats>>,
	notifications: broadcast::Sender<SyncNotification>,
	call_timeout: Duration,
}

impl SharedState {
	pub(crate) fn new(notification_capacity: usize, call_timeout: Duration) -> Self {
		let (notifications, _) = broadcast::channel(notification_capacity);
		let (status, _) = watch::channel(SyncStatus::Initializing);
		let sender = notifications.clone();
		let store = EntityStore::with_observer(Box::new(move |_change| {
			// Nobody listening is fine
			let _ = sender.send(SyncNotification::EntitiesUpdated);
		}));
		Self {
			store: Mutex::new(store),
			binding: RwLock::new(None),
			status,
			network: Mutex::new(None),
			last_load: Mutex::new(None),
			notifications,
			call_timeout,
		}
	}

	pub(crate) fn lock_store(&self) -> MutexGuard<'_, EntityStore> {
		self.store.lock().unwrap_or_else(PoisonError::into_inner)
	}

	pub(crate) fn status(&self) -> SyncStatus {
		*self.status.borrow()
	}

	/// Publish `status`. Returns false, changing nothing, once released.
	pub(crate) fn set_status(&self, status: SyncStatus) -> bool {
		self.status.send_if_modified(|current| {
			if *current == SyncStatus::Released {
				return false;
			}
			*current = status;
			true
		})
	}

	pub(crate) fn notify(&self, notification: SyncNotification) {
		let _ = self.notifications.send(notification);
	}

	pub(crate) fn network(&self) -> Option<NetworkId> {
		self.network
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.clone()
	}

	pub(crate) fn set_network(&self, network: Option<NetworkId>) {
		*self.network.lock().unwrap_or_else(PoisonError::into_inner) = network;
	}

	pub(crate) fn last_load(&self) -> Option<LoadStats> {
		*self.last_load.lock().unwrap_or_else(PoisonError::into_inner)
	}

	pub(crate) fn set_last_load(&self, stats: LoadStats) {
		*self.last_load.lock().unwrap_or_else(PoisonError::into_inner) = Some(stats);
	}

	pub(crate) fn binding(&self) -> Option<Arc<dyn ContractBinding>> {
		self.binding
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.clone()
	}

	pub(crate) fn set_binding(&self, binding: Option<Arc<dyn ContractBinding>>) {
		*self.binding.write().unwrap_or_else(PoisonError::into_inner) = binding;
	}
}

/// Cloneable handle to a running `LedgerSynchronizer`.
#[derive(Clone)]
pub struct SynchronizerHandle {
	shared: Arc<SharedState>,
	shutdown: Arc<watch::Sender<bool>>,
}

impl SynchronizerHandle {
	pub(crate) fn new(shared: Arc<SharedState>, shutdown: Arc<watch::Sender<bool>>) -> Self {
		Self { shared, shutdown }
	}

	pub fn status(&self) -> SyncStatus {
		self.shared.status()
	}

	pub fn has_error(&self) -> bool {
		self.status().error().is_some()
	}

	pub fn get_error(&self) -> Option<ErrorKind> {
		self.status().error()
	}

	/// True once a boot attempt finished, with or without an error.
	pub fn is_loaded(&self) -> bool {
		self.status().is_loaded()
	}

	/// Snapshot of all mirrored requests in ledger order.
	pub fn get_all(&self) -> Vec<Request> {
		self.shared.lock_store().get_all()
	}

	/// Requests not addressed to anyone in particular.
	pub fn open_requests(&self) -> Vec<Request> {
		self.get_all().into_iter().filter(Request::is_open).collect()
	}

	/// Requests addressed to `valentine`.
	pub fn requests_for(&self, valentine: &Address) -> Vec<Request> {
		self.get_all()
			.into_iter()
			.filter(|r| r.valentine_address == *valentine)
			.collect()
	}

	/// Last network the synchronizer detected.
	pub fn network(&self) -> Option<NetworkId> {
		self.shared.network()
	}

	/// Statistics of the most recent bulk load.
	pub fn last_load(&self) -> Option<LoadStats> {
		self.shared.last_load()
	}

	/// Receive coarse change notifications.
	pub fn subscribe(&self) -> broadcast::Receiver<SyncNotification> {
		self.shared.notifications.subscribe()
	}

	/// Wait until the current boot attempt finished and return its status.
	pub async fn wait_until_loaded(&self) -> SyncStatus {
		let mut status = self.shared.status.subscribe();
		let loaded = status.wait_for(SyncStatus::is_loaded).await.map(|s| *s);
		loaded.unwrap_or_else(|_| self.status())
	}

	/// Fetch a request straight from the ledger. Placeholders come back as `None`.
	pub async fn get_request(&self, requester: &Address) -> Result<Option<Request>, SyncError> {
		let binding = self.ready_binding()?;
		let timeout = self.shared.call_timeout;
		let raw = tokio::time::timeout(timeout, binding.get_request_by_requester_address(requester))
			.await
			.map_err(|_| LedgerError::Timeout(timeout))??;
		Ok(decode_request(&raw).map_err(LedgerError::from)?)
	}

	/// Submit an open request from `from`.
	///
	/// The store changes when the ledger's creation event arrives, not here.
	pub async fn create_open_request(
		&self,
		request: &NewRequest,
		from: &Address,
	) -> Result<(), SyncError> {
		let binding = self.ready_binding()?;
		self.ensure_no_request(from)?;
		info!("Submitting open valentine request from {}", from);
		binding.create_open_valentine_request(request, from).await?;
		Ok(())
	}

	/// Submit a request addressed to `valentine` from `from`.
	pub async fn create_targeted_request(
		&self,
		request: &NewRequest,
		valentine: &Address,
		from: &Address,
	) -> Result<(), SyncError> {
		let binding = self.ready_binding()?;
		self.ensure_no_request(from)?;
		info!("Submitting valentine request from {} to {}", from, valentine);
		binding
			.create_targeted_valentine_request(request, valentine, from)
			.await?;
		Ok(())
	}

	/// Accept the request of `requester` on behalf of `from`.
	pub async fn accept_request(&self, requester: &Address, from: &Address) -> Result<(), SyncError> {
		let binding = self.ready_binding()?;
		let known = self
			.shared
			.lock_store()
			.get(requester)
			.map(|r| r.was_accepted);
		match known {
			None => return Err(SyncError::UnknownRequest(*requester)),
			Some(true) => return Err(SyncError::AlreadyAccepted(*requester)),
			Some(false) => {}
		}
		info!("Accepting valentine request from {} as {}", requester, from);
		binding.accept_valentine_request(requester, from).await?;
		Ok(())
	}

	/// Stop the synchronizer. The status becomes `Released` at once and a boot
	/// in progress is abandoned. Both event watchers and the network listener
	/// are dropped; no notification is applied afterwards. Idempotent.
	pub fn release(&self) {
		debug!("Release requested");
		self.shared.set_status(SyncStatus::Released);
		self.shutdown.send_replace(true);
	}

	fn ready_binding(&self) -> Result<Arc<dyn ContractBinding>, SyncError> {
		let status = self.status();
		if status != SyncStatus::Ready {
			return Err(SyncError::NotReady(status));
		}
		self.shared.binding().ok_or(SyncError::NotReady(status))
	}

	fn ensure_no_request(&self, requester: &Address) -> Result<(), SyncError> {
		if self.shared.lock_store().has(requester) {
			return Err(SyncError::AlreadyRequested(*requester));
		}
		Ok(())
	}
}
