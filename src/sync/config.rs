use std::time::Duration;

/// Configuration for the ledger synchronizer
#[derive(Debug, Clone)]
pub struct SynchronizerConfig {
	/// Upper bound on each contract resolution and bulk-load call
	pub ledger_call_timeout: Duration,
	/// Synthetic requests seeded after a successful boot
	pub demo_entities: usize,
	/// Capacity of the host notification channel
	pub notification_capacity: usize,
}

impl Default for SynchronizerConfig {
	fn default() -> Self {
		Self {
			ledger_call_timeout: Duration::from_secs(30),
			demo_entities: 0,
			notification_capacity: 64,
		}
	}
}

impl SynchronizerConfig {
	pub fn with_ledger_call_timeout(mut self, timeout: Duration) -> Self {
		self.ledger_call_timeout = timeout;
		self
	}

	pub fn with_demo_entities(mut self, count: usize) -> Self {
		self.demo_entities = count;
		self
	}

	pub fn with_notification_capacity(mut self, capacity: usize) -> Self {
		self.notification_capacity = capacity.max(1);
		self
	}
}
