use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for idempotency handling.
#[derive(Debug, Default)]
pub struct EngineStats {
    pub total_requests: AtomicU64,
    pub bypassed_requests: AtomicU64,
    pub executed_requests: AtomicU64,
    pub replayed_requests: AtomicU64,
    pub contended_requests: AtomicU64,
    pub in_flight_duplicates: AtomicU64,
    pub mismatched_requests: AtomicU64,
    pub handler_failures: AtomicU64,
    pub completion_failures: AtomicU64,
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bypassed(&self) {
        self.bypassed_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_executed(&self) {
        self.executed_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_replayed(&self) {
        self.replayed_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_contended(&self) {
        self.contended_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_in_flight_duplicate(&self) {
        self.in_flight_duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_mismatch(&self) {
        self.mismatched_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handler_failure(&self) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completion_failure(&self) {
        self.completion_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            bypassed_requests: self.bypassed_requests.load(Ordering::Relaxed),
            executed_requests: self.executed_requests.load(Ordering::Relaxed),
            replayed_requests: self.replayed_requests.load(Ordering::Relaxed),
            contended_requests: self.contended_requests.load(Ordering::Relaxed),
            in_flight_duplicates: self.in_flight_duplicates.load(Ordering::Relaxed),
            mismatched_requests: self.mismatched_requests.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            completion_failures: self.completion_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub total_requests: u64,
    pub bypassed_requests: u64,
    pub executed_requests: u64,
    pub replayed_requests: u64,
    pub contended_requests: u64,
    pub in_flight_duplicates: u64,
    pub mismatched_requests: u64,
    pub handler_failures: u64,
    pub completion_failures: u64,
}

impl StatsSnapshot {
    /// Share of guarded requests answered without running the handler.
    pub fn duplicate_rate(&self) -> f64 {
        let guarded = self.total_requests - self.bypassed_requests;
        if guarded == 0 {
            0.0
        } else {
            let duplicates =
                self.replayed_requests + self.contended_requests + self.in_flight_duplicates;
            duplicates as f64 / guarded as f64
        }
    }
}
