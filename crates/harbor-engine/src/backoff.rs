use std::time::Duration;

/// Capped exponential retry delay: `min(base * 2^(retries - 1), max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(2),
            max: Duration::from_secs(5 * 60),
        }
    }
}

impl Backoff {
    /// Delay before the attempt following the `retries`-th one.
    pub fn delay(&self, retries: u32) -> Duration {
        let exp = retries.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exp)
            .map_or(self.max, |d| d.min(self.max))
    }

    /// Unix millis at which a shard with `retries` attempts may run again.
    pub fn retry_at(&self, now_millis: u64, retries: u32) -> u64 {
        now_millis.saturating_add(self.delay(retries).as_millis() as u64)
    }
}
