use std::sync::atomic::{AtomicU64, Ordering};

use super::types::{ReceiverUsageInfo, SenderUsageInfo};

/// Outbound request counters. Monotonic; read as a snapshot.
#[derive(Debug, Default)]
pub struct SenderCounters {
    pub fetch_attempts: AtomicU64,
    pub fetch_successes: AtomicU64,
    pub store_attempts: AtomicU64,
    pub store_successes: AtomicU64,
    pub remove_attempts: AtomicU64,
    pub remove_successes: AtomicU64,
    pub clear_attempts: AtomicU64,
    pub clear_successes: AtomicU64,
    pub bulk_copy_attempts: AtomicU64,
    pub bulk_copy_successes: AtomicU64,
}

impl SenderCounters {
    pub fn snapshot(&self) -> SenderUsageInfo {
        SenderUsageInfo {
            fetch_attempts: self.fetch_attempts.load(Ordering::Relaxed),
            fetch_successes: self.fetch_successes.load(Ordering::Relaxed),
            store_attempts: self.store_attempts.load(Ordering::Relaxed),
            store_successes: self.store_successes.load(Ordering::Relaxed),
            remove_attempts: self.remove_attempts.load(Ordering::Relaxed),
            remove_successes: self.remove_successes.load(Ordering::Relaxed),
            clear_attempts: self.clear_attempts.load(Ordering::Relaxed),
            clear_successes: self.clear_successes.load(Ordering::Relaxed),
            bulk_copy_attempts: self.bulk_copy_attempts.load(Ordering::Relaxed),
            bulk_copy_successes: self.bulk_copy_successes.load(Ordering::Relaxed),
        }
    }
}

/// Inbound request counters, kept by the router.
#[derive(Debug, Default)]
pub struct ReceiverCounters {
    pub fetch_attempts: AtomicU64,
    pub fetch_successes: AtomicU64,
    pub store_attempts: AtomicU64,
    pub store_successes: AtomicU64,
    pub invalid_requests: AtomicU64,
}

impl ReceiverCounters {
    pub fn snapshot(&self) -> ReceiverUsageInfo {
        ReceiverUsageInfo {
            fetch_attempts: self.fetch_attempts.load(Ordering::Relaxed),
            fetch_successes: self.fetch_successes.load(Ordering::Relaxed),
            store_attempts: self.store_attempts.load(Ordering::Relaxed),
            store_successes: self.store_successes.load(Ordering::Relaxed),
            invalid_requests: self.invalid_requests.load(Ordering::Relaxed),
        }
    }
}

/// Increments a counter.
pub fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Bumps `success` when `result` is `Ok`, then passes the result through.
pub fn record<T, E>(success: &AtomicU64, result: Result<T, E>) -> Result<T, E> {
    if result.is_ok() {
        bump(success);
    }
    result
}
