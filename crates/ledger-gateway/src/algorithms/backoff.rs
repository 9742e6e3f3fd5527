//! # Reconnect Backoff
//!
//! Exponential backoff schedule for event stream reconnects.

use rand::Rng;
use std::time::Duration;

use crate::config::ReconnectPolicy;

/// Delay before reconnect attempt `attempt` (1-based).
///
/// `initial * multiplier^(attempt-1)`, capped at the policy maximum, then
/// spread by the policy jitter.
pub fn backoff_delay(policy: &ReconnectPolicy, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1) as i32;
    let base = policy.initial_backoff().as_secs_f64() * policy.multiplier.powi(exponent);
    let capped = Duration::from_secs_f64(base.min(policy.max_backoff().as_secs_f64()));
    apply_jitter(capped, policy.jitter)
}

/// Applies ±`factor` randomness to a duration.
fn apply_jitter(duration: Duration, factor: f64) -> Duration {
    let factor = factor.clamp(0.0, 1.0);
    if factor == 0.0 {
        return duration;
    }
    let base = duration.as_secs_f64();
    let jittered = rand::thread_rng().gen_range(base * (1.0 - factor)..=base * (1.0 + factor));
    Duration::from_secs_f64(jittered)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(jitter: f64) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 1_000,
            multiplier: 2.0,
            jitter,
        }
    }

    #[test]
    fn test_backoff_grows_exponentially() {
        let p = policy(0.0);
        assert_eq!(backoff_delay(&p, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(&p, 2), Duration::from_millis(200));
        assert_eq!(backoff_delay(&p, 3), Duration::from_millis(400));
    }

    #[test]
    fn test_backoff_capped() {
        let p = policy(0.0);
        assert_eq!(backoff_delay(&p, 10), Duration::from_millis(1_000));
    }

    #[test]
    fn test_jitter_within_bounds() {
        let p = policy(0.25);
        for _ in 0..50 {
            let d = backoff_delay(&p, 1).as_secs_f64();
            assert!((0.075..=0.125).contains(&d), "delay {d} out of range");
        }
    }
}
