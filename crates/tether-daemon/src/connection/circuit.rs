use std::time::Duration;
use tokio::time::Instant;

/// Opens after `threshold` consecutive failures and stays open for
/// `recovery_timeout`, after which exactly one probing attempt is let
/// through. A failed probe re-opens it for another full timeout.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    threshold: u32,
    recovery_timeout: Duration,
    open: bool,
    opened_at: Option<Instant>,
    probe_taken: bool,
    forced_probe: bool,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            recovery_timeout,
            open: false,
            opened_at: None,
            probe_taken: false,
            forced_probe: false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn opened_at(&self) -> Option<Instant> {
        self.opened_at
    }

    /// True while open and the recovery timeout has not yet elapsed.
    pub fn is_blocking(&self, now: Instant) -> bool {
        self.open && !self.forced_probe && self.remaining(now) > Duration::ZERO
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        match (self.open, self.opened_at) {
            (true, Some(at)) => self
                .recovery_timeout
                .saturating_sub(now.saturating_duration_since(at)),
            _ => Duration::ZERO,
        }
    }

    /// Whether an attempt may go out now. When open, only the first caller
    /// after the recovery timeout gets the probing slot.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        if !self.open {
            return true;
        }
        if self.probe_taken {
            return false;
        }
        if self.forced_probe || self.remaining(now).is_zero() {
            self.probe_taken = true;
            self.forced_probe = false;
            return true;
        }
        false
    }

    /// Returns true when this failure opened (or re-opened) the circuit.
    pub fn record_failure(&mut self, consecutive_failures: u32, now: Instant) -> bool {
        if self.open {
            if self.probe_taken {
                self.opened_at = Some(now);
                self.probe_taken = false;
                return true;
            }
            return false;
        }
        if consecutive_failures >= self.threshold {
            self.open = true;
            self.opened_at = Some(now);
            self.probe_taken = false;
            return true;
        }
        false
    }

    /// Let one attempt through immediately, regardless of the timeout.
    pub fn force_probe(&mut self) {
        if self.open && !self.probe_taken {
            self.forced_probe = true;
        }
    }

    pub fn close(&mut self) {
        self.open = false;
        self.opened_at = None;
        self.probe_taken = false;
        self.forced_probe = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opens_at_threshold() {
        let mut circuit = CircuitBreaker::new(3, Duration::from_secs(300));
        let now = Instant::now();
        assert!(!circuit.record_failure(1, now));
        assert!(!circuit.record_failure(2, now));
        assert!(circuit.record_failure(3, now));
        assert!(circuit.is_open());
        assert!(circuit.is_blocking(now));
    }

    #[test]
    fn test_single_probe_after_timeout() {
        let mut circuit = CircuitBreaker::new(1, Duration::from_secs(300));
        let now = Instant::now();
        circuit.record_failure(1, now);

        assert!(!circuit.try_acquire(now + Duration::from_secs(299)));
        let later = now + Duration::from_secs(300);
        assert!(!circuit.is_blocking(later));
        assert!(circuit.try_acquire(later));
        assert!(!circuit.try_acquire(later));
    }

    #[test]
    fn test_failed_probe_reopens() {
        let mut circuit = CircuitBreaker::new(1, Duration::from_secs(300));
        let now = Instant::now();
        circuit.record_failure(1, now);

        let probe_at = now + Duration::from_secs(301);
        assert!(circuit.try_acquire(probe_at));
        assert!(circuit.record_failure(2, probe_at));
        assert!(circuit.is_blocking(probe_at + Duration::from_secs(10)));
        assert_eq!(circuit.remaining(probe_at), Duration::from_secs(300));
    }

    #[test]
    fn test_close_resets() {
        let mut circuit = CircuitBreaker::new(1, Duration::from_secs(300));
        let now = Instant::now();
        circuit.record_failure(1, now);
        circuit.close();
        assert!(!circuit.is_open());
        assert!(circuit.try_acquire(now));
    }

    #[test]
    fn test_forced_probe_skips_timeout() {
        let mut circuit = CircuitBreaker::new(1, Duration::from_secs(300));
        let now = Instant::now();
        circuit.record_failure(1, now);
        circuit.force_probe();
        assert!(!circuit.is_blocking(now));
        assert!(circuit.try_acquire(now));
        assert!(!circuit.try_acquire(now));
    }
}
