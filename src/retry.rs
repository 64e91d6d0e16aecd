//! Poll-cycle error accounting and jittered delays
//!
//! Successful cycles sleep a uniform random delay inside the configured
//! window. Failed cycles add a linear penalty per consecutive error on top
//! of the same jitter, and a hard ceiling on consecutive errors stops the
//! loop entirely.

use rand::Rng;
use std::time::Duration;

/// Delay bounds and the consecutive-error ceiling, fixed per run
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Lower bound of the inter-cycle sleep
    pub min_delay: Duration,
    /// Upper bound of the inter-cycle sleep
    pub max_delay: Duration,
    /// Extra sleep added per consecutive error
    pub error_delay_increment: Duration,
    /// Failed cycles in a row tolerated before giving up
    pub max_consecutive_errors: u32,
}

impl RetryPolicy {
    /// Uniformly jittered delay after a successful cycle.
    pub fn success_delay(&self, rng: &mut impl Rng) -> Duration {
        self.jitter(rng)
    }

    fn jitter(&self, rng: &mut impl Rng) -> Duration {
        let secs = rng.gen_range(self.min_delay.as_secs_f64()..=self.max_delay.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

/// Consecutive-error counter for the poll loop
#[derive(Debug, Default)]
pub struct RetryState {
    consecutive_errors: u32,
}

impl RetryState {
    pub fn new() -> Self {
        Self {
            consecutive_errors: 0,
        }
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    /// A fully successful cycle clears the counter.
    pub fn record_success(&mut self) {
        self.consecutive_errors = 0;
    }

    pub fn record_failure(&mut self) {
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
    }

    /// True once the ceiling is reached; the loop must terminate.
    pub fn exhausted(&self, policy: &RetryPolicy) -> bool {
        self.consecutive_errors >= policy.max_consecutive_errors
    }

    /// Backoff before the next attempt: the usual jitter plus a penalty that
    /// grows linearly with the error count.
    pub fn backoff_delay(&self, policy: &RetryPolicy, rng: &mut impl Rng) -> Duration {
        policy.jitter(rng) + policy.error_delay_increment * self.consecutive_errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            error_delay_increment: Duration::from_secs(2),
            max_consecutive_errors: 3,
        }
    }

    #[test]
    fn success_delay_stays_in_bounds() {
        let policy = policy();
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..200 {
            let delay = policy.success_delay(&mut rng);
            assert!(delay >= policy.min_delay);
            assert!(delay <= policy.max_delay);
        }
    }

    #[test]
    fn backoff_floor_rises_with_error_count() {
        let policy = policy();
        let mut rng = StdRng::seed_from_u64(7);
        let mut state = RetryState::new();
        let mut previous_floor = Duration::ZERO;

        for count in 1..=5u32 {
            state.record_failure();
            let floor = policy.min_delay + policy.error_delay_increment * count;
            let cap = policy.max_delay + policy.error_delay_increment * count;
            assert!(floor > previous_floor);
            previous_floor = floor;

            for _ in 0..50 {
                let delay = state.backoff_delay(&policy, &mut rng);
                assert!(delay >= floor, "delay {delay:?} below floor {floor:?}");
                assert!(delay <= cap, "delay {delay:?} above cap {cap:?}");
            }
        }
    }

    #[test]
    fn ceiling_reached_exactly_at_limit() {
        let policy = policy();
        let mut state = RetryState::new();

        state.record_failure();
        assert!(!state.exhausted(&policy));
        state.record_failure();
        assert!(!state.exhausted(&policy));
        state.record_failure();
        assert!(state.exhausted(&policy));
    }

    #[test]
    fn success_resets_counter() {
        let policy = policy();
        let mut state = RetryState::new();

        state.record_failure();
        state.record_failure();
        assert_eq!(state.consecutive_errors(), 2);

        state.record_success();
        assert_eq!(state.consecutive_errors(), 0);
        assert!(!state.exhausted(&policy));
    }

    #[test]
    fn counter_saturates() {
        let policy = policy();
        let mut state = RetryState::new();

        for _ in 0..100 {
            state.record_failure();
        }

        assert_eq!(state.consecutive_errors(), 100);
        assert!(state.exhausted(&policy));
    }

    #[test]
    fn zero_width_window_is_exact() {
        let policy = RetryPolicy {
            min_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(2),
            error_delay_increment: Duration::ZERO,
            max_consecutive_errors: 1,
        };
        let mut rng = StdRng::seed_from_u64(7);

        assert_eq!(policy.success_delay(&mut rng), Duration::from_secs(2));
    }
}
