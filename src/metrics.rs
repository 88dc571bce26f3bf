use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-kind replication counters plus the observed-index gauge. Shared
/// between the running loop and anyone holding a status handle.
#[derive(Debug, Default)]
pub struct KindMetrics {
    polls: AtomicU64,
    applies: AtomicU64,
    deletes: AtomicU64,
    upserts: AtomicU64,
    failures: AtomicU64,
    last_observed_index: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub polls: u64,
    pub applies: u64,
    pub deletes: u64,
    pub upserts: u64,
    pub failures: u64,
    pub last_observed_index: u64,
}

impl KindMetrics {
    pub fn record_poll(&self) {
        self.polls.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_applies(&self, n: u64) {
        self.applies.fetch_add(n, Ordering::SeqCst);
    }

    pub fn record_deletes(&self, n: u64) {
        self.deletes.fetch_add(n, Ordering::SeqCst);
    }

    pub fn record_upserts(&self, n: u64) {
        self.upserts.fetch_add(n, Ordering::SeqCst);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::SeqCst);
    }

    pub fn set_last_observed_index(&self, index: u64) {
        self.last_observed_index.store(index, Ordering::SeqCst);
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            polls: self.polls.load(Ordering::SeqCst),
            applies: self.applies.load(Ordering::SeqCst),
            deletes: self.deletes.load(Ordering::SeqCst),
            upserts: self.upserts.load(Ordering::SeqCst),
            failures: self.failures.load(Ordering::SeqCst),
            last_observed_index: self.last_observed_index.load(Ordering::SeqCst),
        }
    }
}
