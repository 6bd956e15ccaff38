//! Sliding-window rate limiter for outbound calls
//!
//! At most `capacity` acquisitions are granted within any window of
//! `window` length. The event deque is locked only for the
//! evict/check/append step; a caller that has to wait sleeps with the lock
//! released, so other callers can still inspect and take slots. Waiters
//! that wake together race for the freed slots, so grants are not FIFO.

use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

use crate::error::{AdapterError, AdapterResult};
use crate::observability::AdapterMetrics;

/// Bounds call rate over a sliding time window
#[derive(Debug)]
pub struct RateLimiter {
    capacity: usize,
    window: Duration,
    events: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Create a limiter granting `capacity` calls per `window`
    pub fn new(capacity: usize, window: Duration) -> AdapterResult<Self> {
        if capacity == 0 {
            return Err(AdapterError::Config(
                "rate limiter capacity must be positive".to_string(),
            ));
        }
        if window.is_zero() {
            return Err(AdapterError::Config(
                "rate limiter window must be positive".to_string(),
            ));
        }

        Ok(Self {
            capacity,
            window,
            events: Mutex::new(VecDeque::with_capacity(capacity)),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Wait until a call slot is available and take it.
    ///
    /// Capacity comes back purely by time passing, so there is nothing to
    /// release afterwards.
    pub async fn acquire(&self) {
        let started = Instant::now();

        loop {
            let wait = {
                let mut events = self.events.lock().await;
                let now = Instant::now();

                while let Some(oldest) = events.front() {
                    if now.duration_since(*oldest) >= self.window {
                        events.pop_front();
                    } else {
                        break;
                    }
                }

                if events.len() < self.capacity {
                    events.push_back(now);
                    break;
                }

                // Full: the oldest event is the next one to leave the window.
                let oldest = events.front().copied().unwrap_or(now);
                self.window.saturating_sub(now.duration_since(oldest))
            };

            trace!(wait_ms = wait.as_millis() as u64, "Rate limit reached, waiting");
            tokio::time::sleep(wait).await;
        }

        AdapterMetrics::new().observe_rate_limit_wait(started.elapsed().as_secs_f64());
    }

    /// Acquire a slot, then run `call`
    pub async fn throttle<F, T>(&self, call: F) -> T
    where
        F: Future<Output = T>,
    {
        self.acquire().await;
        call.await
    }

    /// Number of grants still inside the window
    #[cfg(test)]
    async fn in_flight(&self) -> usize {
        let events = self.events.lock().await;
        let now = Instant::now();
        events
            .iter()
            .filter(|t| now.duration_since(**t) < self.window)
            .count()
    }
}
