//! Retry eligibility and jittered backoff computation (C2).

use crate::error::ErrorClass;

/// Fixed backoff schedule indexed by `min(attempt, 2)`, in seconds.
const BACKOFF_SECONDS: [f64; 3] = [2.0, 5.0, 12.0];

/// Retry/backoff tunables, normally sourced from [`crate::config::Config`].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_rate_limited_retries: u32,
    pub max_transient_retries: u32,
    pub jitter: f64,
    pub cap_seconds: f64,
}

impl RetryPolicy {
    pub fn should_retry(&self, class: ErrorClass, attempt: u32) -> bool {
        match class {
            ErrorClass::RateLimited => attempt < self.max_rate_limited_retries,
            ErrorClass::Transient => attempt < self.max_transient_retries,
            _ => false,
        }
    }

    /// Compute the backoff duration for `attempt`, given an optional
    /// provider-supplied `retry_after` hint and a source of uniform randoms
    /// in `[0, 1)` (injected so tests can assert an exact sequence).
    pub fn compute_backoff(
        &self,
        attempt: u32,
        retry_after: Option<f64>,
        rng: &mut dyn FnMut() -> f64,
    ) -> f64 {
        let base = match retry_after {
            Some(seconds) if seconds > 0.0 => self.cap_seconds.min(seconds),
            _ => {
                let idx = (attempt as usize).min(BACKOFF_SECONDS.len() - 1);
                BACKOFF_SECONDS[idx]
            }
        };
        let jitter_span = 2.0 * self.jitter;
        let factor = (1.0 - self.jitter) + rng() * jitter_span;
        let value = base * factor;
        value.clamp(0.1, self.cap_seconds)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_rate_limited_retries: 2,
            max_transient_retries: 1,
            jitter: 0.3,
            cap_seconds: 30.0,
        }
    }
}

/// An RNG source backed by `fastrand`, for non-test call sites.
pub fn fastrand_source() -> impl FnMut() -> f64 {
    || fastrand::f64()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_rng(value: f64) -> impl FnMut() -> f64 {
        move || value
    }

    #[test]
    fn rate_limited_retries_up_to_configured_limit() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(ErrorClass::RateLimited, 0));
        assert!(policy.should_retry(ErrorClass::RateLimited, 1));
        assert!(!policy.should_retry(ErrorClass::RateLimited, 2));
    }

    #[test]
    fn transient_retries_up_to_configured_limit() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(ErrorClass::Transient, 0));
        assert!(!policy.should_retry(ErrorClass::Transient, 1));
    }

    #[test]
    fn other_classes_never_retry() {
        let policy = RetryPolicy::default();
        assert!(!policy.should_retry(ErrorClass::AuthError, 0));
        assert!(!policy.should_retry(ErrorClass::Exhausted, 0));
        assert!(!policy.should_retry(ErrorClass::Error, 0));
    }

    #[test]
    fn backoff_honors_retry_after_clamped_to_cap() {
        let policy = RetryPolicy { jitter: 0.0, ..RetryPolicy::default() };
        let mut rng = fixed_rng(0.5);
        let delay = policy.compute_backoff(0, Some(3.0), &mut rng);
        assert_eq!(delay, 3.0);

        let delay_over_cap = policy.compute_backoff(0, Some(999.0), &mut rng);
        assert_eq!(delay_over_cap, policy.cap_seconds);
    }

    #[test]
    fn backoff_uses_fixed_schedule_without_retry_after() {
        let policy = RetryPolicy { jitter: 0.0, ..RetryPolicy::default() };
        let mut rng = fixed_rng(0.5);
        assert_eq!(policy.compute_backoff(0, None, &mut rng), 2.0);
        assert_eq!(policy.compute_backoff(1, None, &mut rng), 5.0);
        assert_eq!(policy.compute_backoff(2, None, &mut rng), 12.0);
        // attempts beyond the schedule length clamp to the last entry
        assert_eq!(policy.compute_backoff(9, None, &mut rng), 12.0);
    }

    #[test]
    fn backoff_never_below_floor_or_above_cap() {
        let policy = RetryPolicy::default();
        let mut low_rng = fixed_rng(0.0);
        let low = policy.compute_backoff(0, None, &mut low_rng);
        assert!(low >= 0.1);

        let mut high_rng = fixed_rng(1.0);
        let high = policy.compute_backoff(2, None, &mut high_rng);
        assert!(high <= policy.cap_seconds);
    }
}
