use std::cmp;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{self, Instant};

/// Process-wide politeness gate: consecutive grants are spaced at least
/// `delay` apart, no matter how many workers call [`acquire`](Self::acquire)
/// concurrently.
///
/// Internally a single "next eligible time" guarded by a mutex; the lock is
/// only held to claim a slot, never across the wait itself, so waiters queue
/// up in FIFO-ish mutex order.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    delay: Duration,
    next_slot: Arc<Mutex<Instant>>,
}

impl RateLimiter {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            next_slot: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Waits until the caller's slot comes up. Always succeeds eventually.
    pub async fn acquire(&self) {
        if self.delay.is_zero() {
            return;
        }
        let slot = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = cmp::max(*next, now);
            *next = slot + self.delay;
            slot
        };
        time::sleep_until(slot).await;
    }
}
