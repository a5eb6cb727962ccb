//! Reconnect delays: doubling from an initial delay up to a cap, with jitter

use rand::Rng;
use std::time::Duration;

/// Bounded exponential backoff with multiplicative jitter
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Consecutive failed attempts before giving up; 0 means retry forever
    pub max_attempts: u32,
    /// Fraction in `[0, 1]` by which a delay may be shortened or stretched
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_attempts: 10,
            jitter: 0.2,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (0-based), without jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(16);
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }

    /// Jittered delay before retry number `attempt`
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || base.is_zero() {
            return base;
        }
        let factor = rand::thread_rng().gen_range((1.0 - jitter)..=(1.0 + jitter));
        base.mul_f64(factor).min(self.max_delay)
    }

    /// Whether `failures` consecutive failures use up the budget
    pub fn exhausted(&self, failures: u32) -> bool {
        self.max_attempts != 0 && failures >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            max_attempts: 3,
            jitter: 0.0,
        }
    }

    #[test]
    fn test_base_delay_doubles_then_caps() {
        let p = policy();
        assert_eq!(p.base_delay(0), Duration::from_millis(100));
        assert_eq!(p.base_delay(1), Duration::from_millis(200));
        assert_eq!(p.base_delay(3), Duration::from_millis(800));
        assert_eq!(p.base_delay(4), Duration::from_secs(1));
        assert_eq!(p.base_delay(60), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let p = BackoffPolicy {
            jitter: 0.5,
            ..policy()
        };
        for _ in 0..100 {
            let d = p.delay(1);
            assert!(d >= Duration::from_millis(99) && d <= Duration::from_millis(301));
        }
        for _ in 0..100 {
            assert!(p.delay(10) <= Duration::from_secs(1));
        }
    }

    #[test]
    fn test_exhausted() {
        let p = policy();
        assert!(!p.exhausted(2));
        assert!(p.exhausted(3));

        let forever = BackoffPolicy {
            max_attempts: 0,
            ..policy()
        };
        assert!(!forever.exhausted(1000));
    }
}
