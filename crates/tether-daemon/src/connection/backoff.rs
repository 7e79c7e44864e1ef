use std::time::Duration;
use tokio::time::Instant;

/// Reconnect delay bookkeeping. The delay doubles per consecutive failure
/// up to `max` and drops back to `base` on success.
#[derive(Debug, Clone)]
pub struct BackoffState {
    base: Duration,
    max: Duration,
    consecutive_failures: u32,
    current_backoff: Duration,
    last_attempt: Option<Instant>,
}

impl BackoffState {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            consecutive_failures: 0,
            current_backoff: base,
            last_attempt: None,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn current_backoff(&self) -> Duration {
        self.current_backoff
    }

    pub fn last_attempt(&self) -> Option<Instant> {
        self.last_attempt
    }

    pub fn mark_attempt(&mut self, now: Instant) {
        self.last_attempt = Some(now);
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.current_backoff = self.current_backoff.saturating_mul(2).min(self.max);
    }

    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
        self.current_backoff = self.base;
    }

    /// Pin the delay to `delay` measured from `now`, regardless of the
    /// failure count.
    pub fn force(&mut self, delay: Duration, now: Instant) {
        self.current_backoff = delay;
        self.last_attempt = Some(now);
    }

    /// Forget when the last attempt happened so the next one goes out
    /// immediately. The delay itself is kept.
    pub fn clear_wait(&mut self) {
        self.last_attempt = None;
    }

    /// `max(0, current_backoff - elapsed_since_last_attempt)`, before jitter.
    pub fn remaining_wait(&self, now: Instant) -> Duration {
        match self.last_attempt {
            Some(at) => self
                .current_backoff
                .saturating_sub(now.saturating_duration_since(at)),
            None => Duration::ZERO,
        }
    }
}

/// `min(base * 2^failures, max)`.
pub fn backoff_after(base: Duration, max: Duration, failures: u32) -> Duration {
    let factor = 2u32.checked_pow(failures).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(max).min(max)
}

/// Scale by a uniform factor in `[0.5, 1.0)` so agents do not retry in step.
pub fn apply_jitter(delay: Duration) -> Duration {
    if delay.is_zero() {
        return delay;
    }
    let jitter_factor = 0.5 + rand::random::<f64>() * 0.5;
    Duration::from_secs_f64(delay.as_secs_f64() * jitter_factor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_doubles_until_max() {
        let mut backoff = BackoffState::new(Duration::from_secs(30), Duration::from_secs(3600));
        let expected = [60, 120, 240, 480, 960, 1920, 3600, 3600];
        for secs in expected {
            backoff.record_failure();
            assert_eq!(backoff.current_backoff(), Duration::from_secs(secs));
        }
        assert_eq!(backoff.consecutive_failures(), expected.len() as u32);
    }

    #[test]
    fn test_reset_returns_to_base() {
        let mut backoff = BackoffState::new(Duration::from_secs(30), Duration::from_secs(3600));
        backoff.record_failure();
        backoff.record_failure();
        backoff.reset();
        assert_eq!(backoff.consecutive_failures(), 0);
        assert_eq!(backoff.current_backoff(), Duration::from_secs(30));
    }

    #[test]
    fn test_remaining_wait_accounts_for_elapsed_time() {
        let mut backoff = BackoffState::new(Duration::from_secs(30), Duration::from_secs(3600));
        let start = Instant::now();
        assert_eq!(backoff.remaining_wait(start), Duration::ZERO);

        backoff.mark_attempt(start);
        backoff.record_failure();
        assert_eq!(backoff.remaining_wait(start + Duration::from_secs(20)), Duration::from_secs(40));
        assert_eq!(backoff.remaining_wait(start + Duration::from_secs(90)), Duration::ZERO);
    }

    #[test]
    fn test_force_pins_delay_from_now() {
        let mut backoff = BackoffState::new(Duration::from_secs(30), Duration::from_secs(3600));
        let now = Instant::now();
        backoff.force(Duration::from_secs(1800), now);
        assert_eq!(backoff.remaining_wait(now), Duration::from_secs(1800));

        backoff.clear_wait();
        assert_eq!(backoff.remaining_wait(now), Duration::ZERO);
        assert_eq!(backoff.current_backoff(), Duration::from_secs(1800));
    }

    #[test]
    fn test_zero_delay_has_no_jitter() {
        assert_eq!(apply_jitter(Duration::ZERO), Duration::ZERO);
    }

    proptest! {
        #[test]
        fn prop_backoff_matches_closed_form(failures in 0u32..40) {
            let base = Duration::from_secs(30);
            let max = Duration::from_secs(3600);
            let mut backoff = BackoffState::new(base, max);
            for _ in 0..failures {
                backoff.record_failure();
            }
            let expected = (30u64.saturating_mul(1u64 << failures.min(40))).min(3600);
            prop_assert_eq!(backoff.current_backoff(), Duration::from_secs(expected));
            prop_assert_eq!(backoff_after(base, max, failures), Duration::from_secs(expected));
        }

        #[test]
        fn prop_jitter_stays_in_band(secs in 1u64..7200) {
            let delay = Duration::from_secs(secs);
            let jittered = apply_jitter(delay);
            prop_assert!(jittered >= delay / 2);
            prop_assert!(jittered <= delay);
        }
    }
}
