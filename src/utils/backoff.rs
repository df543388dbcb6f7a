use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use crate::BackoffPolicy;

/// Tracks consecutive failures and when the next attempt may run.
///
/// Delay doubles per failure from `base_delay_ms` up to `max_delay_ms`, then
/// a uniform jitter in `[delay/2, delay]` spreads out watchers that failed
/// together.
#[derive(Debug)]
pub(crate) struct Backoff {
    policy: BackoffPolicy,
    failures: u32,
    retry_at: Option<Instant>,
}

impl Backoff {
    pub(crate) fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            failures: 0,
            retry_at: None,
        }
    }

    pub(crate) fn ready(
        &self,
        now: Instant,
    ) -> bool {
        self.retry_at.map_or(true, |at| now >= at)
    }

    /// Records a failed attempt and returns the delay before the next one.
    pub(crate) fn record_failure(
        &mut self,
        now: Instant,
    ) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let delay = Duration::from_millis(jitter(self.ceiling_ms()));
        self.retry_at = Some(now + delay);
        delay
    }

    pub(crate) fn reset(&mut self) {
        self.failures = 0;
        self.retry_at = None;
    }

    pub(crate) fn failures(&self) -> u32 {
        self.failures
    }

    /// Un-jittered delay for the current failure count
    pub(crate) fn ceiling_ms(&self) -> u64 {
        let exponent = self.failures.saturating_sub(1).min(32);
        self.policy
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.policy.max_delay_ms)
    }
}

fn jitter(delay_ms: u64) -> u64 {
    if delay_ms < 2 {
        return delay_ms;
    }
    rand::thread_rng().gen_range(delay_ms / 2..=delay_ms)
}
