//! Retry shaping for the spawn driver.
//!
//! - [`BackoffPolicy`]: how delays grow between transient spawn retries
//! - [`JitterPolicy`]: how delays are randomized to avoid herding

mod backoff;
mod jitter;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn backoff_grows_and_caps() {
        let policy = BackoffPolicy {
            first: Duration::from_millis(100),
            max: Duration::from_millis(350),
            factor: 2.0,
            jitter: JitterPolicy::None,
        };
        let d1 = policy.next(None);
        let d2 = policy.next(Some(d1));
        let d3 = policy.next(Some(d2));
        assert_eq!(d1, Duration::from_millis(100));
        assert_eq!(d2, Duration::from_millis(200));
        assert_eq!(d3, Duration::from_millis(350));
    }

    #[test]
    fn full_jitter_stays_within_bounds() {
        let delay = Duration::from_millis(500);
        for _ in 0..64 {
            let jittered = JitterPolicy::Full.apply(delay);
            assert!(jittered <= delay);
        }
    }

    #[test]
    fn equal_jitter_keeps_at_least_half() {
        let delay = Duration::from_millis(500);
        for _ in 0..64 {
            let jittered = JitterPolicy::Equal.apply(delay);
            assert!(jittered >= Duration::from_millis(250));
            assert!(jittered <= delay);
        }
    }
}
