//! Ledger state synchronizer.
//!
//! `LedgerSynchronizer` keeps the local entity store in step with the valentine
//! contract. Its boot sequence is:
//!
//! 1. wait for the host to signal readiness
//! 2. acquire a transport from the supplied connection (`NoTransport` if absent)
//! 3. keep only the connection's current provider and release the rest
//! 4. listen for network changes
//! 5. detect the network (`Disconnected` if none)
//! 6. resolve the contract binding (`NotDeployed` / `Unhandled` on failure)
//! 7. clear the store and load every request in index order
//! 8. arm the creation and acceptance watchers
//! 9. optionally seed demo requests
//! 10. report `Ready`
//!
//! Failures are terminal for that attempt. A network change re-runs steps 4 to
//! 10; a change carrying the current network while `Ready` is ignored.
//!
//! The driver is a single future. Boots run inline in its loop, so two reloads
//! never interleave and no event is applied while a reload is in progress.
//! Network changes that queue up during a boot are coalesced to the latest.

use super::config::SynchronizerConfig;
use super::demo::DemoGenerator;
use super::events::{EventOutcome, EventSubscriptions, LedgerEvent, apply_event};
use super::handle::{SharedState, SynchronizerHandle};
use super::progress::{LoadStats, LoadTracker};
use super::types::{ErrorKind, SyncNotification, SyncStatus};
use crate::ledger::{ContractBinding, ContractResolver, LedgerError, NetworkId, decode_request};
use crate::transport::{Connection, TransportHandle};

use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// One turn of the driver loop
enum Step {
	Shutdown,
	NetworkChanged(Option<NetworkId>),
	Event(Result<LedgerEvent, LedgerError>),
}

/// Orchestrates transport acquisition, network detection, bulk load and live
/// event reconciliation for the valentine contract.
pub struct LedgerSynchronizer {
	config: SynchronizerConfig,
	/// Dropped as soon as the provider has been extracted
	connection: Option<Arc<dyn Connection>>,
	resolver: Arc<dyn ContractResolver>,
	shared: Arc<SharedState>,
	transport: Option<TransportHandle>,
	subscriptions: EventSubscriptions,
	shutdown: watch::Receiver<bool>,
}

impl LedgerSynchronizer {
	/// Create a synchronizer and the handle the host talks to.
	///
	/// Nothing happens until `run` is awaited.
	pub fn new(
		connection: Option<Arc<dyn Connection>>,
		resolver: Arc<dyn ContractResolver>,
		config: SynchronizerConfig,
	) -> (Self, SynchronizerHandle) {
		let shared = Arc::new(SharedState::new(
			config.notification_capacity,
			config.ledger_call_timeout,
		));
		let (shutdown_tx, shutdown) = watch::channel(false);
		let handle = SynchronizerHandle::new(shared.clone(), Arc::new(shutdown_tx));
		let synchronizer = Self {
			config,
			connection,
			resolver,
			shared,
			transport: None,
			subscriptions: EventSubscriptions::new(),
			shutdown,
		};
		(synchronizer, handle)
	}

	/// Boot once `host_ready` completes, then keep the store synchronized until
	/// the handle releases the synchronizer. A release also cancels a boot or
	/// reload that is still talking to the ledger.
	pub async fn run(mut self, host_ready: impl Future<Output = ()>) {
		let mut shutdown = self.shutdown.clone();
		let booted = tokio::select! {
			biased;
			_ = wait_for_shutdown(&mut shutdown) => false,
			_ = async {
				host_ready.await;
				self.boot().await;
			} => true,
		};
		if !booted {
			debug!("Released before the boot completed");
			self.release();
			return;
		}

		loop {
			let step = tokio::select! {
				biased;
				_ = wait_for_shutdown(&mut shutdown) => Step::Shutdown,
				network = next_network_change(&mut self.transport) => Step::NetworkChanged(network),
				event = self.subscriptions.next() => Step::Event(event),
			};

			match step {
				Step::Shutdown => break,
				Step::NetworkChanged(network) => {
					let network = self.coalesce_network_changes(network);
					let reloaded = tokio::select! {
						biased;
						_ = wait_for_shutdown(&mut shutdown) => false,
						_ = self.on_network_change(network) => true,
					};
					if !reloaded {
						debug!("Released during a reload");
						break;
					}
				}
				Step::Event(Ok(event)) => self.apply(event),
				Step::Event(Err(e)) => {
					error!("Failed to receive ledger event: {}", e);
				}
			}
		}

		self.release();
	}

	/// Steps 2 to 10.
	async fn boot(&mut self) {
		info!("Starting ledger synchronizer");
		let connection = self.connection.take();
		let external = TransportHandle::acquire(connection.as_deref());
		if !external.exists() {
			warn!("No ledger connection supplied");
			self.finish(SyncStatus::Error(ErrorKind::NoTransport));
			return;
		}

		// Keep only the current provider so that replacing the connection
		// object cannot affect this synchronizer
		let Some(mut transport) = external.isolate() else {
			warn!("Ledger connection has no current provider");
			self.finish(SyncStatus::Error(ErrorKind::NoTransport));
			return;
		};
		drop(connection);

		if !transport.listen() {
			warn!("Provider does not report network changes, reloads will not happen");
		}
		self.transport = Some(transport);

		self.load_network().await;
	}

	/// Steps 4 to 10, shared by the initial boot and every network change.
	async fn load_network(&mut self) {
		self.subscriptions.stop();
		self.shared.set_binding(None);
		self.shared.set_status(SyncStatus::Initializing);

		let status = match self.try_load_network().await {
			Ok(()) => SyncStatus::Ready,
			Err(kind) => SyncStatus::Error(kind),
		};
		self.finish(status);
	}

	async fn try_load_network(&mut self) -> Result<(), ErrorKind> {
		let transport = self.transport.as_mut().ok_or(ErrorKind::NoTransport)?;
		transport.listen();

		let Some(network) = transport.network_identity().await else {
			warn!("Provider is not connected to any network");
			self.shared.set_network(None);
			return Err(ErrorKind::Disconnected);
		};
		info!("Detected network {}", network);
		self.shared.set_network(Some(network.clone()));

		let provider = transport.provider().ok_or(ErrorKind::NoTransport)?;
		let timeout = self.config.ledger_call_timeout;
		let binding = with_timeout(timeout, self.resolver.resolve(&network, provider))
			.await
			.map_err(|e| classify("resolve contract binding", &e))?;
		info!("Resolved contract binding on network {}", network);

		load_entities(&self.shared, timeout, binding.as_ref())
			.await
			.map_err(|e| classify("load requests", &e))?;

		// Watchers start only after the bulk load finished
		if let Err(e) = with_timeout(timeout, self.subscriptions.arm(binding.as_ref())).await {
			self.subscriptions.stop();
			return Err(classify("watch ledger events", &e));
		}
		self.shared.set_binding(Some(binding));

		self.seed_demo_requests();
		Ok(())
	}

	/// Step 9.
	fn seed_demo_requests(&self) {
		let count = self.config.demo_entities;
		if count == 0 {
			return;
		}
		let mut store = self.shared.lock_store();
		let requests = DemoGenerator::new(rand::rng()).generate(count, |a| store.has(a));
		let seeded = requests.len();
		for request in requests {
			if let Err(e) = store.add(request) {
				warn!("Failed to seed demo request: {}", e);
			}
		}
		info!("Seeded {} demo requests", seeded);
	}

	fn apply(&self, event: LedgerEvent) {
		let outcome = apply_event(&mut self.shared.lock_store(), event);
		if outcome == EventOutcome::UnknownRequester {
			debug!("Acceptance event did not match any stored request");
		}
	}

	/// Drain notifications that are already queued and keep the latest.
	fn coalesce_network_changes(&mut self, mut network: Option<NetworkId>) -> Option<NetworkId> {
		if let Some(transport) = self.transport.as_mut() {
			while let Some(Some(next)) = transport.next_network_change().now_or_never() {
				debug!("Coalescing network change {:?} into {:?}", network, next);
				network = next;
			}
		}
		network
	}

	async fn on_network_change(&mut self, network: Option<NetworkId>) {
		let status = self.shared.status();
		if status == SyncStatus::Ready && network.is_some() && network == self.shared.network() {
			debug!("Network change to the current network {:?}, nothing to do", network);
			return;
		}
		info!("Network changed to {:?}, reloading", network);
		self.load_network().await;
	}

	fn finish(&self, status: SyncStatus) {
		if !self.shared.set_status(status) {
			debug!("Already released, dropping {:?}", status);
			return;
		}
		match status {
			SyncStatus::Ready => info!("Ledger synchronizer ready"),
			SyncStatus::Error(kind) => warn!("Ledger synchronizer stopped: {}", kind),
			SyncStatus::Initializing | SyncStatus::Released => {}
		}
		self.shared.notify(SyncNotification::Loaded(status));
	}

	fn release(&mut self) {
		self.subscriptions.stop();
		if let Some(mut transport) = self.transport.take() {
			transport.release();
		}
		self.shared.set_binding(None);
		self.shared.set_status(SyncStatus::Released);
		info!("Ledger synchronizer released");
	}
}

/// Step 7: clear the store, then load every request in index order.
///
/// A failure part way through leaves the requests loaded so far in place.
async fn load_entities(
	shared: &SharedState,
	timeout: Duration,
	binding: &dyn ContractBinding,
) -> Result<LoadStats, LedgerError> {
	shared.lock_store().clear_all();

	let total = with_timeout(timeout, binding.num_requesters()).await?;
	info!("Loading {} requests from the ledger", total);

	let mut tracker = LoadTracker::new(total);
	for index in 0..total {
		let raw = with_timeout(timeout, binding.get_request_by_index(index)).await?;
		match decode_request(&raw)? {
			Some(request) => {
				let address = request.requester_address;
				if let Err(e) = shared.lock_store().add(request) {
					warn!("Ledger returned request {} twice, keeping the first: {}", address, e);
				}
				tracker.record_loaded();
			}
			None => {
				debug!("Skipping placeholder at index {}", index);
				tracker.record_placeholder();
			}
		}
	}

	let stats = tracker.stats();
	info!("Bulk load complete: {}", stats.summary());
	shared.set_last_load(stats);
	Ok(stats)
}

/// Map a failed step to the error status; the underlying failure is only logged.
fn classify(step: &str, error: &LedgerError) -> ErrorKind {
	let kind = ErrorKind::from_ledger_error(error);
	match kind {
		ErrorKind::NotDeployed => warn!("Failed to {}: {}", step, error),
		_ => error!("Failed to {}: {}", step, error),
	}
	kind
}

async fn with_timeout<T>(
	timeout: Duration,
	call: impl Future<Output = Result<T, LedgerError>>,
) -> Result<T, LedgerError> {
	tokio::time::timeout(timeout, call)
		.await
		.map_err(|_| LedgerError::Timeout(timeout))?
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
	loop {
		let stopped = *shutdown.borrow_and_update();
		if stopped || shutdown.changed().await.is_err() {
			return;
		}
	}
}

async fn next_network_change(transport: &mut Option<TransportHandle>) -> Option<NetworkId> {
	if let Some(transport) = transport.as_mut() {
		if let Some(network) = transport.next_network_change().await {
			return network;
		}
	}
	std::future::pending().await
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ledger::memory::{InMemoryLedger, InMemoryResolver, LedgerCall};
	use crate::ledger::{
		Address, NewRequest, RawRequest, Request, RequestAcceptedEvent, RequestCreatedEvent,
	};
	use crate::sync::SyncError;
	use crate::transport::{InMemoryProvider, ProviderConnection};
	use tokio::sync::{broadcast, oneshot};
	use tokio::task::JoinHandle;

	fn network(id: &str) -> NetworkId {
		NetworkId::new(id)
	}

	fn address(digit: u8) -> Address {
		Address::NULL.with_hex_digit(12, digit)
	}

	fn request(digit: u8, name: &str) -> Request {
		Request {
			requester_name: name.to_string(),
			valentine_name: "bob".to_string(),
			custom_message: "will you be mine".to_string(),
			requester_address: address(digit),
			valentine_address: Address::NULL,
			was_accepted: false,
		}
	}

	fn created(digit: u8, name: &str) -> RequestCreatedEvent {
		RequestCreatedEvent {
			requester_name: name.to_string(),
			valentine_name: "bob".to_string(),
			custom_message: "will you be mine".to_string(),
			requester_address: address(digit),
			valentine_address: Address::NULL,
		}
	}

	fn new_request(name: &str) -> NewRequest {
		NewRequest {
			requester_name: name.to_string(),
			valentine_name: "bob".to_string(),
			custom_message: "will you be mine".to_string(),
		}
	}

	struct Fixture {
		provider: Arc<InMemoryProvider>,
		resolver: Arc<InMemoryResolver>,
		ledger: Arc<InMemoryLedger>,
		handle: SynchronizerHandle,
		notifications: broadcast::Receiver<SyncNotification>,
		driver: JoinHandle<()>,
	}

	impl Fixture {
		async fn start(ledger: Arc<InMemoryLedger>, config: SynchronizerConfig) -> Self {
			let provider = Arc::new(InMemoryProvider::new(Some(network("5777"))));
			let resolver = Arc::new(InMemoryResolver::new());
			resolver.deploy(network("5777"), ledger.clone());
			let connection: Arc<dyn Connection> =
				Arc::new(ProviderConnection::new(provider.clone()));
			let (synchronizer, handle) =
				LedgerSynchronizer::new(Some(connection), resolver.clone(), config);
			let notifications = handle.subscribe();
			let driver = tokio::spawn(synchronizer.run(async {}));
			handle.wait_until_loaded().await;
			Self {
				provider,
				resolver,
				ledger,
				handle,
				notifications,
				driver,
			}
		}

		async fn wait_for(
			&mut self,
			wanted: impl Fn(&SyncNotification) -> bool,
		) -> Vec<SyncNotification> {
			let notifications = &mut self.notifications;
			tokio::time::timeout(Duration::from_secs(5), async {
				let mut seen = Vec::new();
				loop {
					match notifications.recv().await {
						Ok(notification) => {
							seen.push(notification);
							if wanted(&notification) {
								return seen;
							}
						}
						Err(broadcast::error::RecvError::Lagged(_)) => continue,
						Err(e) => panic!("Notification channel failed: {}", e),
					}
				}
			})
			.await
			.expect("Timed out waiting for notification")
		}

		async fn wait_loaded(&mut self) -> SyncStatus {
			let seen = self
				.wait_for(|n| matches!(n, SyncNotification::Loaded(_)))
				.await;
			match seen.last() {
				Some(SyncNotification::Loaded(status)) => *status,
				_ => unreachable!(),
			}
		}

		async fn wait_updated(&mut self) {
			self.wait_for(|n| *n == SyncNotification::EntitiesUpdated)
				.await;
		}

		fn drain(&mut self) {
			while self.notifications.try_recv().is_ok() {}
		}
	}

	async fn start_with_default(ledger: Arc<InMemoryLedger>) -> Fixture {
		let mut fixture = Fixture::start(ledger, SynchronizerConfig::default()).await;
		fixture.drain();
		fixture
	}

	#[tokio::test]
	async fn test_empty_ledger_is_ready() {
		let fixture = start_with_default(Arc::new(InMemoryLedger::new())).await;
		assert_eq!(fixture.handle.status(), SyncStatus::Ready);
		assert!(fixture.handle.is_loaded());
		assert!(!fixture.handle.has_error());
		assert_eq!(fixture.handle.get_error(), None);
		assert!(fixture.handle.get_all().is_empty());
		assert_eq!(fixture.handle.network(), Some(network("5777")));
	}

	#[tokio::test]
	async fn test_bulk_load_skips_placeholders_in_index_order() {
		let ledger = Arc::new(InMemoryLedger::new());
		ledger.seed(request(3, "carol"));
		ledger.push_placeholder();
		ledger.seed(request(1, "alice"));
		ledger.seed(request(2, "bea"));

		let fixture = start_with_default(ledger).await;
		assert_eq!(
			fixture.handle.get_all(),
			vec![request(3, "carol"), request(1, "alice"), request(2, "bea")]
		);
		let stats = fixture.handle.last_load().expect("Load stats should be recorded");
		assert_eq!(stats.total, 4);
		assert_eq!(stats.loaded, 3);
		assert_eq!(stats.placeholders_skipped, 1);
	}

	#[tokio::test]
	async fn test_watchers_start_after_bulk_load() {
		let ledger = Arc::new(InMemoryLedger::new());
		ledger.seed(request(1, "alice"));
		ledger.seed(request(2, "bea"));

		let fixture = start_with_default(ledger).await;
		assert_eq!(
			fixture.ledger.calls(),
			vec![
				LedgerCall::NumRequesters,
				LedgerCall::GetRequestByIndex(0),
				LedgerCall::GetRequestByIndex(1),
				LedgerCall::WatchCreated,
				LedgerCall::WatchAccepted,
			]
		);
		assert_eq!(fixture.ledger.watcher_counts(), (1, 1));
	}

	#[tokio::test]
	async fn test_missing_connection() {
		let resolver = Arc::new(InMemoryResolver::new());
		let (synchronizer, handle) =
			LedgerSynchronizer::new(None, resolver.clone(), SynchronizerConfig::default());
		tokio::spawn(synchronizer.run(async {}));
		assert_eq!(
			handle.wait_until_loaded().await,
			SyncStatus::Error(ErrorKind::NoTransport)
		);
		assert!(handle.is_loaded());
		assert!(handle.has_error());
		assert!(resolver.resolutions().is_empty());
	}

	#[tokio::test]
	async fn test_disconnected_provider() {
		let provider = Arc::new(InMemoryProvider::new(None));
		let connection: Arc<dyn Connection> = Arc::new(ProviderConnection::new(provider));
		let resolver = Arc::new(InMemoryResolver::new());
		let (synchronizer, handle) = LedgerSynchronizer::new(
			Some(connection),
			resolver.clone(),
			SynchronizerConfig::default().with_demo_entities(3),
		);
		tokio::spawn(synchronizer.run(async {}));
		assert_eq!(
			handle.wait_until_loaded().await,
			SyncStatus::Error(ErrorKind::Disconnected)
		);
		assert!(resolver.resolutions().is_empty());
		assert!(handle.get_all().is_empty());
	}

	#[tokio::test]
	async fn test_contract_not_deployed() {
		let provider = Arc::new(InMemoryProvider::new(Some(network("3"))));
		let connection: Arc<dyn Connection> = Arc::new(ProviderConnection::new(provider));
		let resolver = Arc::new(InMemoryResolver::new());
		resolver.deploy(network("5777"), Arc::new(InMemoryLedger::new()));
		let (synchronizer, handle) = LedgerSynchronizer::new(
			Some(connection),
			resolver,
			SynchronizerConfig::default().with_demo_entities(3),
		);
		tokio::spawn(synchronizer.run(async {}));
		assert_eq!(
			handle.wait_until_loaded().await,
			SyncStatus::Error(ErrorKind::NotDeployed)
		);
		assert!(handle.get_all().is_empty());

		let result = handle
			.create_open_request(&new_request("alice"), &address(1))
			.await;
		assert!(matches!(
			result,
			Err(SyncError::NotReady(SyncStatus::Error(ErrorKind::NotDeployed)))
		));
	}

	#[tokio::test]
	async fn test_other_resolution_failure_is_unhandled() {
		let ledger = Arc::new(InMemoryLedger::new());
		let provider = Arc::new(InMemoryProvider::new(Some(network("5777"))));
		let connection: Arc<dyn Connection> = Arc::new(ProviderConnection::new(provider));
		let resolver = Arc::new(InMemoryResolver::new());
		resolver.deploy(network("5777"), ledger);
		resolver.set_failure(Some(LedgerError::Rpc("502 Bad Gateway".to_string())));
		let (synchronizer, handle) =
			LedgerSynchronizer::new(Some(connection), resolver, SynchronizerConfig::default());
		tokio::spawn(synchronizer.run(async {}));
		assert_eq!(
			handle.wait_until_loaded().await,
			SyncStatus::Error(ErrorKind::Unhandled)
		);
	}

	#[tokio::test(start_paused = true)]
	async fn test_slow_ledger_times_out() {
		let ledger = Arc::new(InMemoryLedger::new());
		ledger.set_read_delay(Some(Duration::from_secs(60)));
		let fixture = Fixture::start(
			ledger,
			SynchronizerConfig::default().with_ledger_call_timeout(Duration::from_secs(1)),
		)
		.await;
		assert_eq!(
			fixture.handle.status(),
			SyncStatus::Error(ErrorKind::Unhandled)
		);
		assert_eq!(fixture.ledger.watcher_counts(), (0, 0));
	}

	#[tokio::test]
	async fn test_boot_waits_for_host_readiness() {
		let provider = Arc::new(InMemoryProvider::new(Some(network("5777"))));
		let connection: Arc<dyn Connection> = Arc::new(ProviderConnection::new(provider));
		let resolver = Arc::new(InMemoryResolver::new());
		resolver.deploy(network("5777"), Arc::new(InMemoryLedger::new()));
		let (synchronizer, handle) =
			LedgerSynchronizer::new(Some(connection), resolver.clone(), SynchronizerConfig::default());
		let (ready_tx, ready_rx) = oneshot::channel::<()>();
		tokio::spawn(synchronizer.run(async move {
			let _ = ready_rx.await;
		}));

		for _ in 0..10 {
			tokio::task::yield_now().await;
		}
		assert_eq!(handle.status(), SyncStatus::Initializing);
		assert!(!handle.is_loaded());
		assert!(resolver.resolutions().is_empty());

		ready_tx.send(()).expect("Synchronizer should be waiting");
		assert_eq!(handle.wait_until_loaded().await, SyncStatus::Ready);
	}

	#[tokio::test]
	async fn test_live_events_are_merged() {
		let mut fixture = start_with_default(Arc::new(InMemoryLedger::new())).await;
		let alice = address(1);
		let bob = address(9);

		fixture
			.handle
			.create_open_request(&new_request("alice"), &alice)
			.await
			.expect("Failed to create request");
		fixture.wait_updated().await;
		assert_eq!(fixture.handle.get_all().len(), 1);
		assert_eq!(fixture.handle.open_requests().len(), 1);

		// Replayed creation and acceptance of an unknown requester change nothing
		fixture.ledger.emit_created(created(1, "alice"));
		fixture.ledger.emit_accepted(RequestAcceptedEvent {
			requester_address: address(7),
			valentine_address: bob,
		});
		fixture.ledger.emit_created(created(2, "bea"));
		fixture.wait_updated().await;
		let all = fixture.handle.get_all();
		assert_eq!(all.len(), 2);
		assert_eq!(all[0].requester_address, alice);
		assert_eq!(all[1].requester_address, address(2));
		assert!(!fixture.handle.has_error());

		fixture
			.handle
			.accept_request(&alice, &bob)
			.await
			.expect("Failed to accept request");
		fixture.wait_updated().await;
		assert!(fixture.handle.get_all()[0].was_accepted);

		let fetched = fixture
			.handle
			.get_request(&alice)
			.await
			.expect("Failed to fetch request")
			.expect("Request should exist");
		assert!(fetched.was_accepted);
		assert_eq!(fixture.handle.get_request(&bob).await.unwrap(), None);
	}

	#[tokio::test]
	async fn test_request_operations_check_local_state() {
		let ledger = Arc::new(InMemoryLedger::new());
		ledger.seed(Request {
			was_accepted: true,
			..request(1, "alice")
		});
		ledger.seed(Request {
			valentine_address: address(5),
			..request(2, "bea")
		});
		let fixture = start_with_default(ledger).await;

		assert!(matches!(
			fixture
				.handle
				.create_open_request(&new_request("alice"), &address(1))
				.await,
			Err(SyncError::AlreadyRequested(_))
		));
		assert!(matches!(
			fixture.handle.accept_request(&address(1), &address(5)).await,
			Err(SyncError::AlreadyAccepted(_))
		));
		assert!(matches!(
			fixture.handle.accept_request(&address(3), &address(5)).await,
			Err(SyncError::UnknownRequest(_))
		));
		assert!(matches!(
			fixture.handle.accept_request(&address(2), &address(6)).await,
			Err(SyncError::Ledger(LedgerError::Rejected(_)))
		));
		assert_eq!(fixture.handle.requests_for(&address(5)).len(), 1);
		let open = fixture.handle.open_requests();
		assert_eq!(open.len(), 1);
		assert_eq!(open[0].requester_address, address(1));
	}

	#[tokio::test]
	async fn test_delivery_error_does_not_fault() {
		let mut fixture = start_with_default(Arc::new(InMemoryLedger::new())).await;
		fixture.ledger.emit_delivery_error("connection reset");
		fixture.ledger.emit_created(created(4, "dora"));
		fixture.wait_updated().await;
		assert_eq!(fixture.handle.status(), SyncStatus::Ready);
		assert_eq!(fixture.handle.get_all().len(), 1);
	}

	#[tokio::test]
	async fn test_same_network_notification_is_a_no_op() {
		let ledger = Arc::new(InMemoryLedger::new());
		ledger.seed(request(1, "alice"));
		let mut fixture = start_with_default(ledger).await;

		fixture.provider.switch_network(Some(network("5777")));
		fixture.ledger.emit_created(created(2, "bea"));
		let seen = fixture
			.wait_for(|n| *n == SyncNotification::EntitiesUpdated)
			.await;
		assert_eq!(seen, vec![SyncNotification::EntitiesUpdated]);

		assert_eq!(fixture.resolver.resolutions(), vec![network("5777")]);
		let loads = fixture
			.ledger
			.calls()
			.into_iter()
			.filter(|c| *c == LedgerCall::NumRequesters)
			.count();
		assert_eq!(loads, 1);
		assert_eq!(fixture.handle.get_all().len(), 2);
	}

	#[tokio::test]
	async fn test_network_switch_reloads_once() {
		let ledger_a = Arc::new(InMemoryLedger::new());
		ledger_a.seed(request(1, "alice"));
		let ledger_b = Arc::new(InMemoryLedger::new());
		ledger_b.seed(request(2, "bea"));

		let mut fixture = start_with_default(ledger_a.clone()).await;
		fixture.resolver.deploy(network("1"), ledger_b.clone());

		fixture.provider.switch_network(Some(network("1")));
		let seen = fixture
			.wait_for(|n| matches!(n, SyncNotification::Loaded(_)))
			.await;
		// One clear, one add, then ready
		assert_eq!(
			seen,
			vec![
				SyncNotification::EntitiesUpdated,
				SyncNotification::EntitiesUpdated,
				SyncNotification::Loaded(SyncStatus::Ready),
			]
		);
		assert_eq!(fixture.handle.get_all(), vec![request(2, "bea")]);
		assert_eq!(fixture.handle.network(), Some(network("1")));
		assert_eq!(
			fixture.resolver.resolutions(),
			vec![network("5777"), network("1")]
		);
		assert_eq!(
			ledger_b.calls(),
			vec![
				LedgerCall::NumRequesters,
				LedgerCall::GetRequestByIndex(0),
				LedgerCall::WatchCreated,
				LedgerCall::WatchAccepted,
			]
		);
		assert_eq!(ledger_a.watcher_counts(), (0, 0));

		// Only the new network's events reach the store
		ledger_a.emit_created(created(5, "eve"));
		ledger_b.emit_created(created(6, "fay"));
		fixture.wait_updated().await;
		let addresses: Vec<_> = fixture
			.handle
			.get_all()
			.into_iter()
			.map(|r| r.requester_address)
			.collect();
		assert_eq!(addresses, vec![address(2), address(6)]);
	}

	#[tokio::test]
	async fn test_queued_network_changes_are_coalesced() {
		let ledger_b = Arc::new(InMemoryLedger::new());
		let mut fixture = start_with_default(Arc::new(InMemoryLedger::new())).await;
		fixture.resolver.deploy(network("1"), ledger_b.clone());

		fixture.provider.switch_network(Some(network("1")));
		fixture.provider.switch_network(Some(network("5777")));
		fixture.provider.switch_network(Some(network("1")));
		assert_eq!(fixture.wait_loaded().await, SyncStatus::Ready);

		ledger_b.emit_created(created(3, "cleo"));
		fixture.wait_updated().await;
		assert_eq!(
			fixture.resolver.resolutions(),
			vec![network("5777"), network("1")]
		);
		assert_eq!(fixture.handle.get_all().len(), 1);
	}

	#[tokio::test]
	async fn test_disconnect_and_recover() {
		let ledger = Arc::new(InMemoryLedger::new());
		ledger.seed(request(1, "alice"));
		let mut fixture = start_with_default(ledger).await;

		fixture.provider.switch_network(None);
		assert_eq!(
			fixture.wait_loaded().await,
			SyncStatus::Error(ErrorKind::Disconnected)
		);
		// Entities loaded before the fault are retained
		assert_eq!(fixture.handle.get_all().len(), 1);
		assert_eq!(fixture.ledger.watcher_counts(), (0, 0));

		fixture.provider.switch_network(Some(network("5777")));
		assert_eq!(fixture.wait_loaded().await, SyncStatus::Ready);
		assert_eq!(fixture.handle.get_all(), vec![request(1, "alice")]);
		assert_eq!(fixture.ledger.watcher_counts(), (1, 1));
	}

	#[tokio::test]
	async fn test_demo_requests_are_additive() {
		let ledger = Arc::new(InMemoryLedger::new());
		ledger.seed(request(1, "alice"));
		let fixture =
			Fixture::start(ledger, SynchronizerConfig::default().with_demo_entities(3)).await;
		let all = fixture.handle.get_all();
		assert_eq!(all.len(), 4);
		assert_eq!(all[0], request(1, "alice"));
		assert!(all.iter().all(|r| !r.requester_address.is_null()));
		assert_eq!(fixture.handle.status(), SyncStatus::Ready);
	}

	#[tokio::test]
	async fn test_release_stops_everything() {
		let fixture = start_with_default(Arc::new(InMemoryLedger::new())).await;
		fixture.handle.release();
		fixture.handle.release();
		assert_eq!(fixture.handle.status(), SyncStatus::Released);
		assert!(fixture.handle.is_loaded());
		assert!(!fixture.handle.has_error());
		fixture.driver.await.expect("Driver should exit cleanly");
		assert_eq!(fixture.handle.status(), SyncStatus::Released);

		assert_eq!(fixture.ledger.watcher_counts(), (0, 0));
		fixture.ledger.emit_created(created(1, "alice"));
		fixture.provider.switch_network(Some(network("2")));
		tokio::task::yield_now().await;
		assert!(fixture.handle.get_all().is_empty());
		assert_eq!(fixture.resolver.resolutions(), vec![network("5777")]);
	}

	#[tokio::test(start_paused = true)]
	async fn test_release_cancels_boot_in_progress() {
		let ledger = Arc::new(InMemoryLedger::new());
		ledger.seed(request(1, "alice"));
		ledger.set_read_delay(Some(Duration::from_secs(5)));
		let provider = Arc::new(InMemoryProvider::new(Some(network("5777"))));
		let connection: Arc<dyn Connection> = Arc::new(ProviderConnection::new(provider));
		let resolver = Arc::new(InMemoryResolver::new());
		resolver.deploy(network("5777"), ledger.clone());
		let (synchronizer, handle) = LedgerSynchronizer::new(
			Some(connection),
			resolver,
			SynchronizerConfig::default().with_demo_entities(3),
		);
		let mut notifications = handle.subscribe();
		let driver = tokio::spawn(synchronizer.run(async {}));

		tokio::time::sleep(Duration::from_secs(1)).await;
		assert_eq!(ledger.calls(), vec![LedgerCall::NumRequesters]);
		handle.release();
		assert_eq!(handle.status(), SyncStatus::Released);
		driver.await.expect("Driver should exit cleanly");

		tokio::time::sleep(Duration::from_secs(10)).await;
		assert_eq!(ledger.calls(), vec![LedgerCall::NumRequesters]);
		assert_eq!(ledger.watcher_counts(), (0, 0));
		assert!(handle.get_all().is_empty());
		assert_eq!(handle.status(), SyncStatus::Released);
		while let Ok(notification) = notifications.try_recv() {
			assert!(!matches!(notification, SyncNotification::Loaded(_)));
		}
		assert!(matches!(
			handle
				.create_open_request(&new_request("alice"), &address(1))
				.await,
			Err(SyncError::NotReady(SyncStatus::Released))
		));
	}

	#[tokio::test]
	async fn test_failed_bulk_load_keeps_loaded_prefix() {
		let ledger = Arc::new(InMemoryLedger::new());
		ledger.seed(request(1, "alice"));
		ledger.push_raw(RawRequest(vec![serde_json::Value::String(
			"truncated".to_string(),
		)]));
		ledger.seed(request(2, "bea"));

		let fixture =
			Fixture::start(ledger, SynchronizerConfig::default().with_demo_entities(3)).await;
		assert_eq!(
			fixture.handle.status(),
			SyncStatus::Error(ErrorKind::Unhandled)
		);
		assert_eq!(fixture.handle.get_all(), vec![request(1, "alice")]);
		assert_eq!(fixture.ledger.watcher_counts(), (0, 0));
		assert_eq!(
			fixture.ledger.calls(),
			vec![
				LedgerCall::NumRequesters,
				LedgerCall::GetRequestByIndex(0),
				LedgerCall::GetRequestByIndex(1),
			]
		);
	}

	#[tokio::test(start_paused = true)]
	async fn test_hung_watcher_registration_times_out() {
		let ledger = Arc::new(InMemoryLedger::new());
		ledger.seed(request(1, "alice"));
		ledger.set_watch_delay(Some(Duration::from_secs(60)));
		let fixture = Fixture::start(
			ledger,
			SynchronizerConfig::default().with_ledger_call_timeout(Duration::from_secs(1)),
		)
		.await;
		assert_eq!(
			fixture.handle.status(),
			SyncStatus::Error(ErrorKind::Unhandled)
		);
		assert_eq!(fixture.handle.get_all(), vec![request(1, "alice")]);
		assert_eq!(fixture.ledger.watcher_counts(), (0, 0));
		assert_eq!(fixture.ledger.calls().last(), Some(&LedgerCall::WatchCreated));
		assert!(matches!(
			fixture
				.handle
				.create_open_request(&new_request("bea"), &address(2))
				.await,
			Err(SyncError::NotReady(SyncStatus::Error(ErrorKind::Unhandled)))
		));
	}
}
