use std::{ops::Range, time::Duration};

use rand::Rng;

/// Backoff schedule shared by every outbound call.
///
/// `delay = base * 2^attempt`, raised to `rate_limit_floor` when the
/// failure was a rate limit, plus a uniform jitter drawn from `jitter`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_attempts: u32,
    pub rate_limit_floor: Duration,
    pub jitter: Range<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            base_delay: Duration::from_secs(1),
            max_attempts: 3,
            rate_limit_floor: Duration::from_secs(5),
            jitter: Duration::from_millis(250)..Duration::from_millis(750),
        }
    }
}

impl RetryPolicy {
    pub fn new(
        base_delay: Duration,
        max_attempts: u32,
        rate_limit_floor: Duration,
        jitter: Range<Duration>,
    ) -> RetryPolicy {
        RetryPolicy {
            base_delay,
            max_attempts: max_attempts.max(1),
            rate_limit_floor,
            jitter,
        }
    }

    /// Delay before the next attempt, without jitter. `attempt` is the
    /// zero-based index of the attempt that just failed.
    pub fn backoff(&self, attempt: u32, rate_limited: bool) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        let delay = self.base_delay.saturating_mul(factor);

        if rate_limited {
            delay.max(self.rate_limit_floor)
        } else {
            delay
        }
    }

    pub fn jitter(&self) -> Duration {
        if self.jitter.start >= self.jitter.end {
            return self.jitter.start;
        }
        rand::thread_rng().gen_range(self.jitter.clone())
    }

    pub fn delay(&self, attempt: u32, rate_limited: bool) -> Duration {
        self.backoff(attempt, rate_limited) + self.jitter()
    }

    pub fn has_attempts_left(&self, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts
    }
}
