use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

/// Process-wide crawl counters. Relaxed ordering is enough: the counters are
/// informational and never drive control flow.
#[derive(Debug, Default)]
pub struct EngineStats {
    total_requests: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    proxy_errors: AtomicU64,
    profile_errors: AtomicU64,
    detection_events: AtomicU64,
    active_workers: AtomicUsize,
}

/// Point-in-time copy of the counters, returned by value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub total_requests: u64,
    pub successful_crawls: u64,
    pub failed_crawls: u64,
    pub proxy_errors: u64,
    pub profile_errors: u64,
    pub detection_events: u64,
    pub active_workers: usize,
    pub queue_size: usize,
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.successful.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_proxy_error(&self) {
        self.proxy_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_profile_error(&self) {
        self.profile_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Reserved for anti-bot detectors.
    pub fn record_detection_event(&self) {
        self.detection_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn worker_started(&self) {
        self.active_workers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn worker_stopped(&self) {
        self.active_workers.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, queue_size: usize) -> StatsSnapshot {
        StatsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_crawls: self.successful.load(Ordering::Relaxed),
            failed_crawls: self.failed.load(Ordering::Relaxed),
            proxy_errors: self.proxy_errors.load(Ordering::Relaxed),
            profile_errors: self.profile_errors.load(Ordering::Relaxed),
            detection_events: self.detection_events.load(Ordering::Relaxed),
            active_workers: self.active_workers.load(Ordering::Relaxed),
            queue_size,
        }
    }
}

impl StatsSnapshot {
    /// At any quiescent point every request is accounted for by exactly one
    /// outcome counter.
    pub fn is_consistent(&self) -> bool {
        self.total_requests
            == self.successful_crawls + self.failed_crawls + self.proxy_errors + self.profile_errors
    }
}
