//! Per-provider circuit breaker (C5).

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub failures_threshold: u32,
    pub window: Duration,
    pub open_duration: Duration,
    pub half_open_max_trials: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failures_threshold: 5,
            window: Duration::from_secs(60),
            open_duration: Duration::from_secs(120),
            half_open_max_trials: 2,
        }
    }
}

struct ProviderBreaker {
    state: BreakerState,
    recent_failures: VecDeque<Instant>,
    opened_until: Option<Instant>,
    half_open_trials: u32,
    last_reason: String,
}

impl ProviderBreaker {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            recent_failures: VecDeque::new(),
            opened_until: None,
            half_open_trials: 0,
            last_reason: String::new(),
        }
    }

    fn trim(&mut self, now: Instant, window: Duration) {
        while let Some(front) = self.recent_failures.front() {
            if now.duration_since(*front) >= window {
                self.recent_failures.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Tracks failure history and admission decisions for every provider.
pub struct CircuitBreaker {
    config: BreakerConfig,
    providers: Mutex<HashMap<String, ProviderBreaker>>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self { config, providers: Mutex::new(HashMap::new()) }
    }

    /// Admit a call for `provider`. Auto-transitions `open` -> `half_open`
    /// once the cooldown has elapsed; this is the only method that mutates
    /// state based on elapsed time.
    pub async fn before_call(&self, provider: &str) -> bool {
        let now = Instant::now();
        let mut providers = self.providers.lock().await;
        let entry = providers.entry(provider.to_string()).or_insert_with(ProviderBreaker::new);
        entry.trim(now, self.config.window);

        match entry.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let elapsed = entry.opened_until.map(|until| now >= until).unwrap_or(false);
                if elapsed {
                    entry.state = BreakerState::HalfOpen;
                    entry.half_open_trials = 1;
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                if entry.half_open_trials < self.config.half_open_max_trials {
                    entry.half_open_trials += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Read-only view of a provider's state, for status reporting. Shows
    /// `half_open` once the cooldown has elapsed even though only
    /// [`Self::before_call`] performs the actual transition, so observing
    /// status never itself flips the breaker.
    pub async fn current_state(&self, provider: &str) -> BreakerState {
        let now = Instant::now();
        let providers = self.providers.lock().await;
        match providers.get(provider) {
            None => BreakerState::Closed,
            Some(entry) => match entry.state {
                BreakerState::Open => {
                    if entry.opened_until.map(|until| now >= until).unwrap_or(false) {
                        BreakerState::HalfOpen
                    } else {
                        BreakerState::Open
                    }
                }
                other => other,
            },
        }
    }

    pub async fn on_success(&self, provider: &str) {
        let mut providers = self.providers.lock().await;
        let entry = providers.entry(provider.to_string()).or_insert_with(ProviderBreaker::new);
        entry.state = BreakerState::Closed;
        entry.recent_failures.clear();
        entry.opened_until = None;
        entry.half_open_trials = 0;
    }

    pub async fn on_failure(&self, provider: &str, reason: &str) {
        let now = Instant::now();
        let mut providers = self.providers.lock().await;
        let entry = providers.entry(provider.to_string()).or_insert_with(ProviderBreaker::new);
        entry.last_reason = reason.to_string();

        if entry.state == BreakerState::HalfOpen {
            entry.state = BreakerState::Open;
            entry.opened_until = Some(now + self.config.open_duration);
            entry.half_open_trials = 0;
            return;
        }

        entry.trim(now, self.config.window);
        entry.recent_failures.push_back(now);
        if entry.recent_failures.len() as u32 >= self.config.failures_threshold {
            entry.state = BreakerState::Open;
            entry.opened_until = Some(now + self.config.open_duration);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> BreakerConfig {
        BreakerConfig {
            failures_threshold: 2,
            window: Duration::from_secs(60),
            open_duration: Duration::from_millis(20),
            half_open_max_trials: 1,
        }
    }

    #[tokio::test]
    async fn opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new(fast_config());
        assert!(breaker.before_call("p").await);
        breaker.on_failure("p", "boom").await;
        assert_eq!(breaker.current_state("p").await, BreakerState::Closed);
        breaker.on_failure("p", "boom").await;
        assert_eq!(breaker.current_state("p").await, BreakerState::Open);
        assert!(!breaker.before_call("p").await);
    }

    #[tokio::test]
    async fn transitions_to_half_open_after_cooldown() {
        let breaker = CircuitBreaker::new(fast_config());
        breaker.on_failure("p", "boom").await;
        breaker.on_failure("p", "boom").await;
        assert!(!breaker.before_call("p").await);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(breaker.current_state("p").await, BreakerState::HalfOpen);
        assert!(breaker.before_call("p").await);
    }

    #[tokio::test]
    async fn closes_on_success_and_clears_failures() {
        let breaker = CircuitBreaker::new(fast_config());
        breaker.on_failure("p", "boom").await;
        breaker.on_success("p").await;
        assert_eq!(breaker.current_state("p").await, BreakerState::Closed);
        // failure history was cleared: one more failure shouldn't immediately open
        breaker.on_failure("p", "boom").await;
        assert_eq!(breaker.current_state("p").await, BreakerState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens_regardless_of_threshold() {
        let breaker = CircuitBreaker::new(fast_config());
        breaker.on_failure("p", "boom").await;
        breaker.on_failure("p", "boom").await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(breaker.before_call("p").await); // half_open trial
        breaker.on_failure("p", "still broken").await;
        assert_eq!(breaker.current_state("p").await, BreakerState::Open);
    }

    #[tokio::test]
    async fn half_open_trials_are_bounded() {
        let mut config = fast_config();
        config.half_open_max_trials = 1;
        let breaker = CircuitBreaker::new(config);
        breaker.on_failure("p", "boom").await;
        breaker.on_failure("p", "boom").await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(breaker.before_call("p").await);
        assert!(!breaker.before_call("p").await);
    }
}
