//! Retry pacing for the request executor.
//!
//! `next_delay` is a pure function of the attempt number and an optional
//! server-supplied wait hint, so the executor's timing behavior can be tested
//! without sleeping.

use std::time::Duration;

/// Retry ceiling and pacing shared by every logical call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total outbound attempts allowed for one logical call, including the
    /// first. Never below 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(4),
        }
    }
}

impl RetryPolicy {
    /// Clamp nonsensical values instead of failing.
    pub fn sanitized(self) -> Self {
        let max_attempts = self.max_attempts.max(1);
        let base_delay = self.base_delay;
        let max_delay = self.max_delay.max(base_delay);
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Wait before retry number `attempt` (0-based: the wait preceding the
    /// second outbound call is `next_delay(0, …)`).
    ///
    /// A server hint wins outright, clamped to `max_delay`. Otherwise the
    /// delay grows as `base_delay * 2^attempt` up to `max_delay`.
    pub fn next_delay(&self, attempt: u32, server_hint: Option<Duration>) -> Duration {
        if let Some(hint) = server_hint {
            return hint.min(self.max_delay);
        }
        let base_ms = self.base_delay.as_millis() as u64;
        let scaled_ms = base_ms.saturating_mul(1u64 << attempt.min(20));
        Duration::from_millis(scaled_ms).min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(4),
        }
    }

    #[test]
    fn attempt_zero_uses_base_delay_unscaled() {
        assert_eq!(policy().next_delay(0, None), Duration::from_millis(500));
    }

    #[test]
    fn delay_doubles_until_the_ceiling() {
        let policy = policy();
        assert_eq!(policy.next_delay(1, None), Duration::from_millis(1000));
        assert_eq!(policy.next_delay(2, None), Duration::from_millis(2000));
        assert_eq!(policy.next_delay(3, None), Duration::from_millis(4000));
        assert_eq!(policy.next_delay(4, None), Duration::from_millis(4000));
    }

    #[test]
    fn delay_is_monotone_and_never_exceeds_the_ceiling() {
        let policy = policy();
        let mut previous = Duration::ZERO;
        for attempt in 0..64 {
            let delay = policy.next_delay(attempt, None);
            assert!(delay >= previous, "attempt {attempt}");
            assert!(delay <= policy.max_delay, "attempt {attempt}");
            previous = delay;
        }
    }

    #[test]
    fn server_hint_is_used_exactly() {
        let delay = policy().next_delay(0, Some(Duration::from_secs(2)));
        assert_eq!(delay, Duration::from_secs(2));
    }

    #[test]
    fn server_hint_is_clamped_to_the_ceiling() {
        let delay = policy().next_delay(0, Some(Duration::from_secs(90)));
        assert_eq!(delay, Duration::from_secs(4));
    }

    #[test]
    fn sanitized_repairs_degenerate_values() {
        let policy = RetryPolicy {
            max_attempts: 0,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_millis(100),
        }
        .sanitized();
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.max_delay, Duration::from_secs(2));
    }
}
