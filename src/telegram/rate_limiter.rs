//! Outbound send pacing for the Telegram API.
//!
//! Keeps a minimum gap between raw API calls so the bot stays clear of
//! Telegram's flood limits even before the platform pushes back.

use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Enforces a minimum interval between outbound API calls.
#[derive(Debug)]
pub struct SendPacer {
    /// Minimum gap between calls.
    min_gap: Duration,

    /// When the last call went out.
    last_send: Mutex<Option<Instant>>,
}

impl SendPacer {
    /// Creates a pacer with the given minimum gap.
    #[must_use]
    pub fn new(min_gap: Duration) -> Self {
        Self {
            min_gap,
            last_send: Mutex::new(None),
        }
    }

    /// Creates a pacer from milliseconds.
    #[must_use]
    pub fn from_millis(millis: u64) -> Self {
        Self::new(Duration::from_millis(millis))
    }

    /// Waits until the next call is allowed and claims the slot.
    ///
    /// Returns how long the caller was held (zero when the gap had
    /// already passed).
    pub async fn acquire(&self) -> Duration {
        let mut last = self.last_send.lock().await;

        let wait = match *last {
            Some(at) => self.min_gap.saturating_sub(at.elapsed()),
            None => Duration::ZERO,
        };

        if !wait.is_zero() {
            debug!("pacing outbound call, holding {:?}", wait);
            tokio::time::sleep(wait).await;
        }

        *last = Some(Instant::now());
        wait
    }

    /// Serves a flood wait demanded by Telegram, then claims the slot
    /// so the following call respects the normal gap again.
    pub async fn hold_for(&self, wait_seconds: u32) {
        warn!("flood wait from Telegram: {} seconds", wait_seconds);
        tokio::time::sleep(Duration::from_secs(u64::from(wait_seconds))).await;

        let mut last = self.last_send.lock().await;
        *last = Some(Instant::now());
    }

    /// Time left until the next call would go out unheld.
    pub async fn time_until_free(&self) -> Duration {
        let last = self.last_send.lock().await;
        match *last {
            Some(at) => self.min_gap.saturating_sub(at.elapsed()),
            None => Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_call_is_free() {
        let pacer = SendPacer::from_millis(1000);
        assert_eq!(pacer.acquire().await, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_second_call_is_held() {
        let pacer = SendPacer::new(Duration::from_millis(100));
        pacer.acquire().await;
        assert!(pacer.time_until_free().await > Duration::ZERO);
    }

    #[tokio::test]
    async fn test_gap_elapses() {
        let pacer = SendPacer::new(Duration::from_millis(1));
        pacer.acquire().await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(pacer.time_until_free().await, Duration::ZERO);
    }
}
