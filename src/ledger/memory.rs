//! In-memory ledger
//!
//! A single-contract ledger kept in process memory, with a resolver mapping
//! networks to deployments. The demo binary runs against it and the tests use
//! it as a double: every binding call is recorded in a call log, and event
//! deliveries (including faulty ones) can be injected by hand.

use super::binding::{ContractBinding, ContractResolver, EventStream};
use super::decode::RawRequest;
use super::types::{
	Address, LedgerError, NOT_DEPLOYED_MARKER, NetworkId, NewRequest, Request,
	RequestAcceptedEvent, RequestCreatedEvent,
};
use crate::transport::Provider;

use futures_util::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

const EVENT_FEED_CAPACITY: usize = 256;

/// A call made against the in-memory contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerCall {
	NumRequesters,
	GetRequestByIndex(u64),
	GetRequestByRequesterAddress(Address),
	CreateOpen(Address),
	CreateTargeted(Address),
	Accept(Address),
	WatchCreated,
	WatchAccepted,
}

type Feed<T> = broadcast::Sender<Result<T, LedgerError>>;

/// In-memory valentine contract.
pub struct InMemoryLedger {
	/// Index-ordered slots. `None` is a slot the contract reports as a placeholder.
	slots: Mutex<Vec<Option<Request>>>,
	created: Feed<RequestCreatedEvent>,
	accepted: Feed<RequestAcceptedEvent>,
	calls: Mutex<Vec<LedgerCall>>,
	read_delay: Mutex<Option<Duration>>,
	watch_delay: Mutex<Option<Duration>>,
	/// Wire entries served verbatim, by index
	raw_slots: Mutex<HashMap<u64, RawRequest>>,
}

impl Default for InMemoryLedger {
	fn default() -> Self {
		Self::new()
	}
}

impl InMemoryLedger {
	pub fn new() -> Self {
		let (created, _) = broadcast::channel(EVENT_FEED_CAPACITY);
		let (accepted, _) = broadcast::channel(EVENT_FEED_CAPACITY);
		Self {
			slots: Mutex::new(Vec::new()),
			created,
			accepted,
			calls: Mutex::new(Vec::new()),
			read_delay: Mutex::new(None),
			watch_delay: Mutex::new(None),
			raw_slots: Mutex::new(HashMap::new()),
		}
	}

	/// Record a request as already present in the ledger history, without emitting events.
	pub fn seed(&self, request: Request) {
		lock(&self.slots).push(Some(request));
	}

	/// Append a slot the contract will report as the "no such entry" placeholder.
	pub fn push_placeholder(&self) {
		lock(&self.slots).push(None);
	}

	/// Append a slot whose wire form is served as given, valid or not.
	pub fn push_raw(&self, raw: RawRequest) {
		let mut slots = lock(&self.slots);
		lock(&self.raw_slots).insert(slots.len() as u64, raw);
		slots.push(None);
	}

	/// Deliver a creation event without touching contract state.
	pub fn emit_created(&self, event: RequestCreatedEvent) {
		let _ = self.created.send(Ok(event));
	}

	/// Deliver an acceptance event without touching contract state.
	pub fn emit_accepted(&self, event: RequestAcceptedEvent) {
		let _ = self.accepted.send(Ok(event));
	}

	/// Deliver a transport-level failure on both event feeds.
	pub fn emit_delivery_error(&self, message: &str) {
		let _ = self
			.created
			.send(Err(LedgerError::Delivery(message.to_string())));
		let _ = self
			.accepted
			.send(Err(LedgerError::Delivery(message.to_string())));
	}

	/// Delay every read by `delay`.
	pub fn set_read_delay(&self, delay: Option<Duration>) {
		*lock(&self.read_delay) = delay;
	}

	/// Delay every watcher registration by `delay`.
	pub fn set_watch_delay(&self, delay: Option<Duration>) {
		*lock(&self.watch_delay) = delay;
	}

	pub fn calls(&self) -> Vec<LedgerCall> {
		lock(&self.calls).clone()
	}

	/// Number of currently active watchers per event kind: (created, accepted).
	pub fn watcher_counts(&self) -> (usize, usize) {
		(self.created.receiver_count(), self.accepted.receiver_count())
	}

	fn record(&self, call: LedgerCall) {
		lock(&self.calls).push(call);
	}

	async fn before_read(&self) {
		let delay = *lock(&self.read_delay);
		if let Some(delay) = delay {
			tokio::time::sleep(delay).await;
		}
	}

	async fn before_watch(&self) {
		let delay = *lock(&self.watch_delay);
		if let Some(delay) = delay {
			tokio::time::sleep(delay).await;
		}
	}

	fn create(
		&self,
		request: &NewRequest,
		valentine_address: Address,
		from: &Address,
	) -> Result<(), LedgerError> {
		let mut slots = lock(&self.slots);
		let exists = slots
			.iter()
			.flatten()
			.any(|r| r.requester_address == *from);
		if exists {
			return Err(LedgerError::Rejected(format!(
				"requester {} already has a request",
				from
			)));
		}
		let event = RequestCreatedEvent {
			requester_name: request.requester_name.clone(),
			valentine_name: request.valentine_name.clone(),
			custom_message: request.custom_message.clone(),
			requester_address: *from,
			valentine_address,
		};
		slots.push(Some(Request::from(event.clone())));
		drop(slots);
		debug!("Recorded valentine request from {}", from);
		self.emit_created(event);
		Ok(())
	}
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
	mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn feed<T: Clone + Send + 'static>(sender: &Feed<T>) -> EventStream<T> {
	let receiver = sender.subscribe();
	futures_util::stream::unfold(receiver, |mut receiver| async move {
		match receiver.recv().await {
			Ok(item) => Some((item, receiver)),
			Err(broadcast::error::RecvError::Lagged(n)) => Some((
				Err(LedgerError::Delivery(format!("watcher lagged by {} events", n))),
				receiver,
			)),
			Err(broadcast::error::RecvError::Closed) => None,
		}
	})
	.boxed()
}

#[async_trait::async_trait]
impl ContractBinding for InMemoryLedger {
	async fn num_requesters(&self) -> Result<u64, LedgerError> {
		self.record(LedgerCall::NumRequesters);
		self.before_read().await;
		Ok(lock(&self.slots).len() as u64)
	}

	async fn get_request_by_index(&self, index: u64) -> Result<RawRequest, LedgerError> {
		self.record(LedgerCall::GetRequestByIndex(index));
		self.before_read().await;
		if let Some(raw) = lock(&self.raw_slots).get(&index) {
			return Ok(raw.clone());
		}
		let slots = lock(&self.slots);
		let slot = usize::try_from(index)
			.ok()
			.and_then(|i| slots.get(i))
			.ok_or_else(|| LedgerError::Rpc(format!("index {} out of range", index)))?;
		Ok(match slot {
			Some(request) => RawRequest::encode(request),
			None => RawRequest::placeholder(),
		})
	}

	async fn get_request_by_requester_address(
		&self,
		address: &Address,
	) -> Result<RawRequest, LedgerError> {
		self.record(LedgerCall::GetRequestByRequesterAddress(*address));
		self.before_read().await;
		Ok(lock(&self.slots)
			.iter()
			.flatten()
			.find(|r| r.requester_address == *address)
			.map(RawRequest::encode)
			.unwrap_or_else(RawRequest::placeholder))
	}

	async fn create_open_valentine_request(
		&self,
		request: &NewRequest,
		from: &Address,
	) -> Result<(), LedgerError> {
		self.record(LedgerCall::CreateOpen(*from));
		self.create(request, Address::NULL, from)
	}

	async fn create_targeted_valentine_request(
		&self,
		request: &NewRequest,
		valentine_address: &Address,
		from: &Address,
	) -> Result<(), LedgerError> {
		self.record(LedgerCall::CreateTargeted(*from));
		self.create(request, *valentine_address, from)
	}

	async fn accept_valentine_request(
		&self,
		requester_address: &Address,
		from: &Address,
	) -> Result<(), LedgerError> {
		self.record(LedgerCall::Accept(*requester_address));
		let mut slots = lock(&self.slots);
		let request = slots
			.iter_mut()
			.flatten()
			.find(|r| r.requester_address == *requester_address)
			.ok_or_else(|| {
				LedgerError::Rejected(format!("no request from {}", requester_address))
			})?;
		if request.was_accepted {
			return Err(LedgerError::Rejected("request already accepted".to_string()));
		}
		if !request.is_open() && request.valentine_address != *from {
			return Err(LedgerError::Rejected(format!(
				"request is addressed to {}, not {}",
				request.valentine_address, from
			)));
		}
		request.was_accepted = true;
		drop(slots);
		self.emit_accepted(RequestAcceptedEvent {
			requester_address: *requester_address,
			valentine_address: *from,
		});
		Ok(())
	}

	async fn watch_request_created(&self) -> Result<EventStream<RequestCreatedEvent>, LedgerError> {
		self.record(LedgerCall::WatchCreated);
		self.before_watch().await;
		Ok(feed(&self.created))
	}

	async fn watch_request_accepted(
		&self,
	) -> Result<EventStream<RequestAcceptedEvent>, LedgerError> {
		self.record(LedgerCall::WatchAccepted);
		self.before_watch().await;
		Ok(feed(&self.accepted))
	}
}

/// Resolver over a fixed set of in-memory deployments.
#[derive(Default)]
pub struct InMemoryResolver {
	deployments: Mutex<HashMap<NetworkId, Arc<InMemoryLedger>>>,
	failure: Mutex<Option<LedgerError>>,
	resolutions: Mutex<Vec<NetworkId>>,
}

impl InMemoryResolver {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn deploy(&self, network: NetworkId, ledger: Arc<InMemoryLedger>) {
		lock(&self.deployments).insert(network, ledger);
	}

	/// Make every resolution fail with `failure`.
	pub fn set_failure(&self, failure: Option<LedgerError>) {
		*lock(&self.failure) = failure;
	}

	/// Networks resolved so far, in order.
	pub fn resolutions(&self) -> Vec<NetworkId> {
		lock(&self.resolutions).clone()
	}
}

#[async_trait::async_trait]
impl ContractResolver for InMemoryResolver {
	async fn resolve(
		&self,
		network: &NetworkId,
		_provider: Arc<dyn Provider>,
	) -> Result<Arc<dyn ContractBinding>, LedgerError> {
		lock(&self.resolutions).push(network.clone());
		if let Some(failure) = lock(&self.failure).clone() {
			return Err(failure);
		}
		let ledger = lock(&self.deployments).get(network).cloned().ok_or_else(|| {
			LedgerError::Resolution(format!(
				"Valentine contract {} ({})",
				NOT_DEPLOYED_MARKER, network
			))
		})?;
		let binding: Arc<dyn ContractBinding> = ledger;
		Ok(binding)
	}
}
