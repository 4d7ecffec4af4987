//! Progress tracking for bulk loads.
//!
//! `LoadTracker` follows one enumeration of the contract's requests: how many
//! indices were fetched, how many turned out to be placeholders, and logs
//! progress at regular intervals for large ledgers.

use tracing::info;

const LOG_INTERVAL: u64 = 500;

/// Tracks one bulk load
#[derive(Debug, Clone)]
pub struct LoadTracker {
    total: u64,
    fetched: u64,
    loaded: usize,
    placeholders_skipped: usize,
    last_logged: u64,
}

impl LoadTracker {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            fetched: 0,
            loaded: 0,
            placeholders_skipped: 0,
            last_logged: 0,
        }
    }

    /// Record a fetched index that produced a real request
    pub fn record_loaded(&mut self) {
        self.fetched += 1;
        self.loaded += 1;
        self.log_progress();
    }

    /// Record a fetched index that was the ledger's placeholder
    pub fn record_placeholder(&mut self) {
        self.fetched += 1;
        self.placeholders_skipped += 1;
        self.log_progress();
    }

    fn log_progress(&mut self) {
        if self.fetched - self.last_logged >= LOG_INTERVAL {
            info!("Bulk load progress: {}/{} requests fetched", self.fetched, self.total);
            self.last_logged = self.fetched;
        }
    }

    pub fn is_complete(&self) -> bool {
        self.fetched >= self.total
    }

    pub fn stats(&self) -> LoadStats {
        LoadStats {
            total: self.total,
            loaded: self.loaded,
            placeholders_skipped: self.placeholders_skipped,
        }
    }
}

/// Outcome of a bulk load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadStats {
    /// Requester count reported by the contract
    pub total: u64,
    pub loaded: usize,
    pub placeholders_skipped: usize,
}

impl LoadStats {
    pub fn summary(&self) -> String {
        format!(
            "{} of {} requests loaded{}",
            self.loaded,
            self.total,
            if self.placeholders_skipped == 0 {
                String::new()
            } else {
                format!(" ({} placeholders skipped)", self.placeholders_skipped)
            }
        )
    }
}
