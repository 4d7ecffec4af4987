use std::sync::Arc;
use std::time::Duration;

use ledger_state_sync::ledger::memory::{InMemoryLedger, InMemoryResolver};
use ledger_state_sync::transport::{Connection, InMemoryProvider, ProviderConnection};
use ledger_state_sync::{
	Address, LedgerSynchronizer, NetworkId, NewRequest, SyncNotification, SynchronizerConfig,
	SynchronizerHandle,
};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

const DEMO_ENTITIES_VAR: &str = "LEDGER_SYNC_DEMO_ENTITIES";
const TIMEOUT_SECS_VAR: &str = "LEDGER_SYNC_TIMEOUT_SECS";

#[tokio::main(flavor = "current_thread")]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,ledger_state_sync=debug")),
		)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	info!("Starting ledger sync demo");
	let config = config_from_env();

	let local = NetworkId::new("5777");
	let testnet = NetworkId::new("11155111");

	let local_ledger = Arc::new(InMemoryLedger::new());
	let testnet_ledger = Arc::new(InMemoryLedger::new());
	let resolver = Arc::new(InMemoryResolver::new());
	resolver.deploy(local.clone(), local_ledger);
	resolver.deploy(testnet.clone(), testnet_ledger.clone());

	let provider = Arc::new(InMemoryProvider::new(Some(local)));
	let connection: Arc<dyn Connection> = Arc::new(ProviderConnection::new(provider.clone()));

	let (synchronizer, handle) = LedgerSynchronizer::new(Some(connection), resolver, config);
	let mut notifications = handle.subscribe();
	let driver = tokio::spawn(synchronizer.run(async {}));

	let status = handle.wait_until_loaded().await;
	info!("Initial load finished: {:?}", status);
	if handle.has_error() {
		error!("Synchronizer failed to load, giving up");
		handle.release();
		let _ = driver.await;
		return;
	}

	let alice = Address::NULL.with_hex_digit(39, 1);
	let bob = Address::NULL.with_hex_digit(39, 2);
	let request = NewRequest {
		requester_name: "Alice".to_string(),
		valentine_name: "Bob".to_string(),
		custom_message: "Be mine?".to_string(),
	};

	match handle.create_targeted_request(&request, &bob, &alice).await {
		Ok(()) => wait_for_update(&mut notifications).await,
		Err(e) => error!("Failed to create request: {}", e),
	}
	match handle.accept_request(&alice, &bob).await {
		Ok(()) => wait_for_update(&mut notifications).await,
		Err(e) => error!("Failed to accept request: {}", e),
	}
	log_requests(&handle);

	// Seed the other deployment, then move the provider over to it
	testnet_ledger.seed(ledger_state_sync::Request {
		requester_name: "Carol".to_string(),
		valentine_name: "Dave".to_string(),
		custom_message: "Coffee?".to_string(),
		requester_address: Address::NULL.with_hex_digit(39, 3),
		valentine_address: Address::NULL,
		was_accepted: false,
	});
	info!("Switching provider to network {}", testnet);
	provider.switch_network(Some(testnet));
	loop {
		match notifications.recv().await {
			Ok(SyncNotification::Loaded(status)) => {
				info!("Reload finished: {:?}", status);
				break;
			}
			Ok(SyncNotification::EntitiesUpdated) => {}
			Err(broadcast::error::RecvError::Lagged(n)) => warn!("Missed {} notifications", n),
			Err(broadcast::error::RecvError::Closed) => break,
		}
	}
	log_requests(&handle);

	handle.release();
	if let Err(e) = driver.await {
		error!("Synchronizer task failed: {}", e);
	}
	info!("Done");
}

fn config_from_env() -> SynchronizerConfig {
	let mut config = SynchronizerConfig::default();
	if let Some(count) = env_number(DEMO_ENTITIES_VAR) {
		match usize::try_from(count) {
			Ok(count) => config = config.with_demo_entities(count),
			Err(e) => warn!("Ignoring {}={}: {}", DEMO_ENTITIES_VAR, count, e),
		}
	}
	if let Some(secs) = env_number(TIMEOUT_SECS_VAR) {
		config = config.with_ledger_call_timeout(Duration::from_secs(secs));
	}
	config
}

fn env_number(name: &str) -> Option<u64> {
	let value = std::env::var(name).ok()?;
	match value.parse() {
		Ok(number) => Some(number),
		Err(e) => {
			warn!("Ignoring {}={}: {}", name, value, e);
			None
		}
	}
}

async fn wait_for_update(notifications: &mut broadcast::Receiver<SyncNotification>) {
	loop {
		match notifications.recv().await {
			Ok(SyncNotification::EntitiesUpdated) => return,
			Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
			Err(broadcast::error::RecvError::Closed) => return,
		}
	}
}

fn log_requests(handle: &SynchronizerHandle) {
	let requests = handle.get_all();
	info!("{} requests on network {:?}", requests.len(), handle.network());
	for request in requests {
		info!(
			"  {} ({}) -> {} ({}): \"{}\" accepted={}",
			request.requester_name,
			request.requester_address,
			request.valentine_name,
			request.valentine_address,
			request.custom_message,
			request.was_accepted
		);
	}
}
