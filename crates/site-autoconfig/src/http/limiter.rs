//! Per-host politeness limiter.
//!
//! Concurrent probes share one limiter, so requests to the same host are
//! spaced by at least `1 / requests_per_second` while different hosts do not
//! wait on each other.

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};

#[derive(Debug)]
pub struct HostLimiter {
    /// Minimum spacing between two requests to one host
    min_interval: Duration,
    /// Next free slot per host
    next_slot: Mutex<HashMap<String, Instant>>,
}

impl HostLimiter {
    pub fn new(requests_per_second: f64) -> Self {
        let min_interval = if requests_per_second > 0.0 {
            Duration::from_secs_f64(1.0 / requests_per_second)
        } else {
            Duration::ZERO
        };

        Self {
            min_interval,
            next_slot: Mutex::new(HashMap::new()),
        }
    }

    /// Wait until a request to `host` may be sent
    pub async fn acquire(&self, host: &str) {
        if self.min_interval.is_zero() {
            return;
        }

        // Reserve a slot under the lock, then sleep without holding it.
        let slot = {
            let mut slots = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = slots.get(host).copied().filter(|s| *s > now).unwrap_or(now);
            slots.insert(host.to_string(), slot + self.min_interval);
            slot
        };

        if slot > Instant::now() {
            tracing::debug!(
                host = host,
                wait_ms = (slot - Instant::now()).as_millis() as u64,
                "Politeness limit: waiting"
            );
            sleep_until(slot).await;
        }
    }
}
