//! Minimum-interval limiter for outgoing actions.
//!
//! Each session sends reactions through its own limiter so a busy chat
//! cannot push an account into Telegram's flood protection. Reactions
//! that arrive while the slot is taken are dropped, not queued.

use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::warn;

/// Rate limiter that enforces minimum intervals between operations.
#[derive(Debug)]
pub struct RateLimiter {
    /// Minimum duration between allowed operations.
    min_interval: Duration,

    /// Earliest instant the next operation may run.
    next_allowed: Mutex<Option<Instant>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_allowed: Mutex::new(None),
        }
    }

    /// Reserves the next slot unless it is still taken.
    ///
    /// Returns `true` when the caller may proceed.
    pub async fn try_acquire(&self) -> bool {
        let mut next = self.next_allowed.lock().await;
        let now = Instant::now();
        if next.is_some_and(|at| at > now) {
            return false;
        }
        *next = Some(now + self.min_interval);
        true
    }

    /// Returns the time remaining until the next operation is allowed.
    pub async fn time_until_allowed(&self) -> Duration {
        self.next_allowed
            .lock()
            .await
            .map(|at| at.saturating_duration_since(Instant::now()))
            .unwrap_or_default()
    }

    /// Pushes the next slot past a flood wait reported by Telegram.
    pub async fn handle_flood_wait(&self, wait_seconds: u32) {
        warn!("Received flood wait from Telegram: {} seconds", wait_seconds);
        let mut next = self.next_allowed.lock().await;
        let until = Instant::now() + Duration::from_secs(u64::from(wait_seconds)) + self.min_interval;
        if next.is_none_or(|at| at < until) {
            *next = Some(until);
        }
    }
}
