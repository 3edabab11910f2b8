//! Sliding-window requests-per-minute limiter (C3).

use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::cancellation::{sleep_cancellable, CancellationToken, SLEEP_CHUNK};

/// A single sliding-window limiter instance. One per (provider) key, owned
/// by the resource coordinator (C4).
pub struct SlidingWindowRateLimiter {
    window: Duration,
    max_events: u32,
    events: Mutex<VecDeque<std::time::Instant>>,
}

impl SlidingWindowRateLimiter {
    pub fn new(max_events: u32, window: Duration) -> Self {
        Self { window, max_events, events: Mutex::new(VecDeque::new()) }
    }

    fn trim(events: &mut VecDeque<std::time::Instant>, now: std::time::Instant, window: Duration) {
        while let Some(front) = events.front() {
            if now.duration_since(*front) >= window {
                events.pop_front();
            } else {
                break;
            }
        }
    }

    /// Seconds until a slot would be free, or `None` if one is free now.
    async fn next_wait(&self) -> Option<Duration> {
        let now = std::time::Instant::now();
        let mut events = self.events.lock().await;
        Self::trim(&mut events, now, self.window);
        if (events.len() as u32) < self.max_events {
            events.push_back(now);
            None
        } else {
            let oldest = *events.front().expect("len >= max_events > 0 implies non-empty");
            let elapsed = now.duration_since(oldest);
            Some(self.window.saturating_sub(elapsed))
        }
    }

    /// Block (cooperatively) until a slot is available, sleeping in chunks
    /// no larger than [`SLEEP_CHUNK`] so cancellation is observed promptly.
    ///
    /// Returns `true` if cancelled before a slot was acquired.
    pub async fn acquire(&self, token: &CancellationToken) -> bool {
        loop {
            if token.is_cancelled() {
                return true;
            }
            match self.next_wait().await {
                None => return false,
                Some(wait) => {
                    let chunk = wait.min(SLEEP_CHUNK).max(Duration::from_millis(1));
                    if sleep_cancellable(chunk, token).await {
                        return true;
                    }
                }
            }
        }
    }

    #[cfg(test)]
    async fn queue_depth(&self) -> usize {
        let now = std::time::Instant::now();
        let mut events = self.events.lock().await;
        Self::trim(&mut events, now, self.window);
        events.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn admits_events_under_the_limit() {
        let limiter = SlidingWindowRateLimiter::new(2, Duration::from_secs(60));
        let token = CancellationToken::new();
        assert!(!limiter.acquire(&token).await);
        assert!(!limiter.acquire(&token).await);
        assert_eq!(limiter.queue_depth().await, 2);
    }

    #[tokio::test]
    async fn trims_events_outside_the_window() {
        let limiter = SlidingWindowRateLimiter::new(1, Duration::from_millis(50));
        let token = CancellationToken::new();
        assert!(!limiter.acquire(&token).await);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!limiter.acquire(&token).await);
    }

    #[tokio::test]
    async fn acquire_respects_cancellation_while_waiting() {
        let limiter = SlidingWindowRateLimiter::new(1, Duration::from_secs(10));
        let token = CancellationToken::new();
        assert!(!limiter.acquire(&token).await);
        token.cancel();
        assert!(limiter.acquire(&token).await);
    }
}
