//! Exponential backoff with a cap and jitter.
//!
//! Used for destination retries and pub/sub reconnects:
//!
//! ```text
//! base(n)  = min(initial * 2^n, max)
//! delay(n) = base(n) * (1 + u),  u uniform in [-jitter, +jitter]
//! ```

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    /// Fraction of the base delay to randomise, between 0.0 and 1.0.
    pub jitter: f64,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, jitter: f64) -> Self {
        Self {
            initial,
            max: max.max(initial),
            jitter: jitter.clamp(0.0, 1.0),
        }
    }

    /// Delay before retry number `retry` (0-based), without jitter.
    pub fn base_delay(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.min(31)).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max)
    }

    /// Delay for `retry` with `sample` in `[-1.0, 1.0]` scaling the jitter.
    pub fn delay_with_sample(&self, retry: u32, sample: f64) -> Duration {
        let base = self.base_delay(retry).as_secs_f64();
        let spread = self.jitter * sample.clamp(-1.0, 1.0);
        Duration::from_secs_f64((base * (1.0 + spread)).max(0.0))
    }

    /// Jittered delay for `retry`.
    pub fn delay(&self, retry: u32) -> Duration {
        let sample = if self.jitter > 0.0 {
            rand::rng().random_range(-1.0..=1.0)
        } else {
            0.0
        };
        self.delay_with_sample(retry, sample)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(30), 0.2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_until_cap() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(1_000), 0.0);
        let delays: Vec<u128> = (0..6).map(|n| backoff.base_delay(n).as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1_000, 1_000]);
    }

    #[test]
    fn large_retry_counts_do_not_overflow() {
        let backoff = Backoff::default();
        assert_eq!(backoff.base_delay(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let backoff = Backoff::new(Duration::from_millis(1_000), Duration::from_secs(10), 0.2);
        let millis = |d: Duration| (d.as_secs_f64() * 1_000.0).round() as u64;
        assert_eq!(millis(backoff.delay_with_sample(0, -1.0)), 800);
        assert_eq!(millis(backoff.delay_with_sample(0, 1.0)), 1_200);

        for _ in 0..100 {
            let delay = millis(backoff.delay(0));
            assert!((800..=1_200).contains(&delay));
        }
    }

    #[test]
    fn jitter_is_clamped() {
        let backoff = Backoff::new(Duration::from_millis(10), Duration::from_millis(5), 3.0);
        assert_eq!(backoff.jitter, 1.0);
        assert_eq!(backoff.max, Duration::from_millis(10));
    }
}
