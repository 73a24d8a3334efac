use std::time::Duration;

use rand::Rng;

/// Exponential delay between catalog fetch attempts.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: bool,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(30), true)
    }
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter: bool) -> Self {
        Self { base, max, jitter }
    }

    /// Delay before retry number `attempt` (0-based). A server-provided
    /// `Retry-After` wins over the computed delay when it is longer, but is
    /// still capped at `max`.
    pub fn delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let mut rng = rand::thread_rng();
        self.delay_with_rng(attempt, retry_after, &mut rng)
    }

    pub fn delay_with_rng<R: Rng + ?Sized>(
        &self,
        attempt: u32,
        retry_after: Option<Duration>,
        rng: &mut R,
    ) -> Duration {
        let base_ms = self.base.as_millis().min(u128::from(u64::MAX)) as u64;
        let max_ms = self.max.as_millis().min(u128::from(u64::MAX)) as u64;
        let exp = base_ms.saturating_mul(1u64 << attempt.min(16)).min(max_ms);
        let computed = if self.jitter {
            rng.gen_range(exp / 2..=exp)
        } else {
            exp
        };
        let hinted = retry_after
            .map(|d| d.as_millis().min(u128::from(max_ms)) as u64)
            .unwrap_or(0);
        Duration::from_millis(computed.max(hinted))
    }
}
