use super::decode::RawRequest;
use super::types::{
	Address, LedgerError, NetworkId, NewRequest, RequestAcceptedEvent, RequestCreatedEvent,
};
use crate::transport::Provider;
use std::pin::Pin;
use std::sync::Arc;

/// Live stream of contract events. Dropping the stream stops the watcher.
pub type EventStream<T> =
	Pin<Box<dyn futures_util::Stream<Item = Result<T, LedgerError>> + Send>>;

/// The valentine contract as deployed on one network.
///
/// Submission methods are opaque remote calls: they resolve once the ledger
/// accepted the transaction, and local state only changes when the matching
/// event arrives on one of the watch streams.
#[async_trait::async_trait]
pub trait ContractBinding: Send + Sync {
	/// Number of requesters ever recorded by the contract.
	async fn num_requesters(&self) -> Result<u64, LedgerError>;

	async fn get_request_by_index(&self, index: u64) -> Result<RawRequest, LedgerError>;

	async fn get_request_by_requester_address(
		&self,
		address: &Address,
	) -> Result<RawRequest, LedgerError>;

	async fn create_open_valentine_request(
		&self,
		request: &NewRequest,
		from: &Address,
	) -> Result<(), LedgerError>;

	async fn create_targeted_valentine_request(
		&self,
		request: &NewRequest,
		valentine_address: &Address,
		from: &Address,
	) -> Result<(), LedgerError>;

	async fn accept_valentine_request(
		&self,
		requester_address: &Address,
		from: &Address,
	) -> Result<(), LedgerError>;

	/// Watch `LogValentineRequestCreated`.
	async fn watch_request_created(&self) -> Result<EventStream<RequestCreatedEvent>, LedgerError>;

	/// Watch `LogRequestAccepted`.
	async fn watch_request_accepted(
		&self,
	) -> Result<EventStream<RequestAcceptedEvent>, LedgerError>;
}

/// Resolves the contract binding for a detected network.
#[async_trait::async_trait]
pub trait ContractResolver: Send + Sync {
	async fn resolve(
		&self,
		network: &NetworkId,
		provider: Arc<dyn Provider>,
	) -> Result<Arc<dyn ContractBinding>, LedgerError>;
}
