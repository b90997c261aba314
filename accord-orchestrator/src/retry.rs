use rand::Rng;
use std::time::Duration;

const BASE_DELAY_MS: u64 = 1_000;
const CAP_MS: u64 = 30_000;

/// Exponential backoff with 0-50% jitter, capped at 30 seconds. A provider's
/// own `retryAfterMs` hint, when present, overrides the computed delay
/// (still subject to the cap).
pub fn backoff_delay(attempt: u32, retry_after_override: Option<u64>) -> Duration {
    if let Some(ms) = retry_after_override {
        return Duration::from_millis(ms.min(CAP_MS));
    }
    let base = BASE_DELAY_MS.saturating_mul(1u64 << attempt.min(10));
    let jitter_fraction: f64 = rand::thread_rng().gen_range(0.0..0.5);
    let with_jitter = base as f64 * (1.0 + jitter_fraction);
    Duration::from_millis((with_jitter as u64).min(CAP_MS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_is_capped() {
        let delay = backoff_delay(0, Some(60_000));
        assert_eq!(delay, Duration::from_millis(CAP_MS));
    }

    #[test]
    fn computed_delay_grows_with_attempt_and_stays_capped() {
        let first = backoff_delay(0, None);
        let later = backoff_delay(8, None);
        assert!(first.as_millis() >= BASE_DELAY_MS as u128);
        assert!(later.as_millis() <= CAP_MS as u128);
    }
}
