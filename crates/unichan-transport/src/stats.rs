//! Per-channel counters for send, receive and handle outcomes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;

/// One completed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Operation {
    pub succeeded: bool,
    pub bytes: usize,
    pub elapsed_micros: u64,
    pub at_unix_millis: u64,
}

/// Monotonic counters for one direction.
///
/// A success resets the consecutive-failure count; a failure increments it
/// together with the cumulative failure count. Nothing else ever decrements.
#[derive(Debug, Default)]
pub struct Counter {
    total_bytes: AtomicU64,
    total_packets: AtomicU64,
    total_failures: AtomicU64,
    consecutive_failures: AtomicU64,
    last: Mutex<Option<Operation>>,
}

/// Point-in-time copy of a [`Counter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CounterSnapshot {
    pub total_bytes: u64,
    pub total_packets: u64,
    pub total_failures: u64,
    pub consecutive_failures: u64,
    pub last: Option<Operation>,
}

impl Counter {
    /// Record a successful operation moving `bytes`.
    pub fn record_success(&self, bytes: usize, elapsed: Duration) {
        self.total_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        self.total_packets.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Release);
        self.set_last(true, bytes, elapsed);
    }

    /// Record a failed operation.
    pub fn record_failure(&self, elapsed: Duration) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::AcqRel);
        self.set_last(false, 0, elapsed);
    }

    /// Failures since the last success.
    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    pub fn total_failures(&self) -> u64 {
        self.total_failures.load(Ordering::Relaxed)
    }

    pub fn total_packets(&self) -> u64 {
        self.total_packets.load(Ordering::Relaxed)
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            total_bytes: self.total_bytes(),
            total_packets: self.total_packets(),
            total_failures: self.total_failures(),
            consecutive_failures: self.consecutive_failures(),
            last: *self.last.lock().unwrap_or_else(|poisoned| poisoned.into_inner()),
        }
    }

    fn set_last(&self, succeeded: bool, bytes: usize, elapsed: Duration) {
        let at_unix_millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let op = Operation {
            succeeded,
            bytes,
            elapsed_micros: elapsed.as_micros() as u64,
            at_unix_millis,
        };
        *self.last.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(op);
    }
}

/// Statistics record owned by one channel.
#[derive(Debug, Default)]
pub struct Statistics {
    pub send: Counter,
    pub receive: Counter,
    pub handle: Counter,
}

/// Point-in-time copy of [`Statistics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatisticsSnapshot {
    pub send: CounterSnapshot,
    pub receive: CounterSnapshot,
    pub handle: CounterSnapshot,
}

impl Statistics {
    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            send: self.send.snapshot(),
            receive: self.receive.snapshot(),
            handle: self.handle.snapshot(),
        }
    }
}
