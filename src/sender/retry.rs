use crate::config::RetryAfterFn;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

/// Exponential back-off schedule for upload retries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Sleep before the try following attempt `attempt` (zero-based).
    pub fn delay(&self, attempt: usize) -> Duration {
        let shift = u32::try_from(attempt).unwrap_or(u32::MAX).min(32);
        let exp = (self.base_delay.as_millis() as u64).saturating_mul(1u64 << shift);
        let capped = Duration::from_millis(exp).min(self.max_delay);

        if self.jitter {
            apply_jitter(capped)
        } else {
            capped
        }
    }

    pub fn into_fn(self) -> RetryAfterFn {
        Arc::new(move |attempt| self.delay(attempt))
    }
}

fn apply_jitter(delay: Duration) -> Duration {
    let mut rng = rand::rng();
    let factor = rng.random_range(0.5..1.5);
    Duration::from_millis((delay.as_millis() as f64 * factor) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_exponentially_and_caps() {
        let policy = RetryPolicy {
            jitter: false,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(2), Duration::from_millis(400));
        assert_eq!(policy.delay(20), Duration::from_secs(10));
        assert_eq!(policy.delay(usize::MAX), Duration::from_secs(10));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy::default();
        for _ in 0..100 {
            let d = policy.delay(3);
            assert!(d >= Duration::from_millis(400));
            assert!(d < Duration::from_millis(1_200));
        }
    }
}
