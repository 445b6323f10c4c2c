//! Per-session command spacing
//!
//! Networks kick clients that flood, so every outgoing command on a
//! session waits until the minimum interval since the previous one has
//! elapsed.

use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::trace;

/// Minimum-interval limiter owned by one session's writer
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last: Option<Instant>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self { min_interval, last: None }
    }

    /// Record a command that was sent outside the limiter
    pub fn mark_sent(&mut self) {
        self.last = Some(Instant::now());
    }

    /// Time left before the next command may go out
    pub fn remaining(&self) -> Duration {
        match self.last {
            Some(last) => (last + self.min_interval).saturating_duration_since(Instant::now()),
            None => Duration::ZERO,
        }
    }

    /// Sleep until the next command is allowed, then claim the slot
    pub async fn wait(&mut self) {
        if let Some(last) = self.last {
            let ready = last + self.min_interval;
            if ready > Instant::now() {
                trace!("Rate limiter holding command for {:?}", ready - Instant::now());
                sleep_until(ready).await;
            }
        }
        self.last = Some(Instant::now());
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }
}
