//! Randomized backoff and SOCKS isolation tokens

use rand::Rng;
use std::time::Duration;

/// Exponential backoff for the n-th consecutive failure (n starts at 1)
///
/// `base * 2^(n-1)`, capped at `max`, minus up to a quarter of jitter so
/// the result never exceeds `max`.
pub fn backoff(failures: u32, base: Duration, max: Duration) -> Duration {
    let exp = failures.saturating_sub(1).min(16);
    let capped = base.saturating_mul(1 << exp).min(max);

    let spread = capped.as_millis() as u64 / 4;
    if spread == 0 {
        return capped;
    }
    let mut rng = rand::thread_rng();
    capped - Duration::from_millis(rng.gen_range(0..=spread))
}

/// Random SOCKS username, so Tor puts the stream on its own circuit
pub fn isolation_token() -> String {
    format!("tornet-{:016x}", rand::thread_rng().gen::<u64>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_stays_bounded() {
        let base = Duration::from_secs(2);
        let max = Duration::from_secs(60);

        let first = backoff(1, base, max);
        assert!(first <= base && first >= base * 3 / 4);

        let third = backoff(3, base, max);
        assert!(third <= Duration::from_secs(8) && third >= Duration::from_secs(6));

        for failures in 1..40 {
            assert!(backoff(failures, base, max) <= max);
        }
        assert!(backoff(30, base, max) >= max * 3 / 4);
    }

    #[test]
    fn test_isolation_tokens_differ() {
        let a = isolation_token();
        let b = isolation_token();
        assert!(a.starts_with("tornet-"));
        assert_eq!(a.len(), "tornet-".len() + 16);
        assert_ne!(a, b);
    }

    #[test]
    fn test_zero_base_means_no_backoff() {
        assert_eq!(
            backoff(5, Duration::ZERO, Duration::from_secs(60)),
            Duration::ZERO
        );
    }
}
