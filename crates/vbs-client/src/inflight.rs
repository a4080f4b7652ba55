//! Process-wide inflight RPC throttle.
//!
//! The counter is advisory: relaxed atomics are enough because it only
//! signals overload and gates admission, it never orders data. A request
//! holds its token across retries and backoff sleeps; that is deliberate
//! back-pressure on new submissions while the server is struggling.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Notify;

pub struct InflightThrottle {
    inflight: AtomicU64,
    max_inflight: u64,
    released: Notify,
}

impl InflightThrottle {
    pub fn new(max_inflight: u64) -> Self {
        Self {
            inflight: AtomicU64::new(0),
            max_inflight,
            released: Notify::new(),
        }
    }

    /// Non-blocking overload probe.
    pub fn is_overload(&self) -> bool {
        self.inflight.load(Ordering::Relaxed) > self.max_inflight
    }

    pub fn inflight(&self) -> u64 {
        self.inflight.load(Ordering::Relaxed)
    }

    pub fn increment(&self) {
        self.inflight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement(&self) {
        self.inflight.fetch_sub(1, Ordering::Relaxed);
        self.released.notify_one();
    }

    /// Take one token, waiting while the throttle is saturated.
    pub async fn acquire(&self) {
        loop {
            if self.try_acquire() {
                return;
            }
            let notified = self.released.notified();
            // Re-check after arming the waiter so a release between the
            // failed attempt and the await is not missed.
            if self.try_acquire() {
                return;
            }
            notified.await;
        }
    }

    /// Release a token taken by `acquire`.
    pub fn release(&self) {
        self.decrement();
    }

    fn try_acquire(&self) -> bool {
        let mut current = self.inflight.load(Ordering::Relaxed);
        while current < self.max_inflight {
            match self.inflight.compare_exchange_weak(
                current,
                current + 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
        false
    }
}
