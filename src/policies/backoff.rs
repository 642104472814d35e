//! # Backoff policy for transient spawn retries.
//!
//! [`BackoffPolicy`] controls how retry delays grow while the spawn driver
//! retries a transient spawner failure. It is parameterized by:
//! - [`BackoffPolicy::factor`] the multiplicative growth factor;
//! - [`BackoffPolicy::first`] the initial delay;
//! - [`BackoffPolicy::max`] the maximum delay cap.
//!
//! The retry budget itself lives on the spawn driver
//! ([`SpawnRetry`](crate::SpawnRetry)); this policy only shapes the
//! delays between attempts.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use poolvisor::{BackoffPolicy, JitterPolicy};
//!
//! let backoff = BackoffPolicy {
//!     first: Duration::from_millis(100),
//!     max: Duration::from_secs(10),
//!     factor: 2.0,
//!     jitter: JitterPolicy::None,
//! };
//!
//! // First retry - uses 'first' (clamped to max)
//! assert_eq!(backoff.next(None), Duration::from_millis(100));
//!
//! // Second retry - multiplied by factor (100ms * 2.0 = 200ms)
//! assert_eq!(backoff.next(Some(Duration::from_millis(100))), Duration::from_millis(200));
//!
//! // When the previous delay exceeds max, the result is capped at max
//! assert_eq!(backoff.next(Some(Duration::from_secs(20))), Duration::from_secs(10));
//! ```

use crate::policies::jitter::JitterPolicy;
use std::time::Duration;

/// Retry backoff policy.
#[derive(Clone, Copy, Debug)]
pub struct BackoffPolicy {
    /// Initial delay before the first retry.
    pub first: Duration,
    /// Maximum delay cap for retries.
    pub max: Duration,
    /// Multiplicative growth factor (`>= 1.0` recommended).
    pub factor: f64,
    /// Jitter policy to prevent thundering herd when many groups respawn
    /// at once.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// Returns a policy with:
    /// - `first = 200ms`;
    /// - `max = 5s`;
    /// - `factor = 2.0` (exponential);
    /// - no jitter.
    fn default() -> Self {
        Self {
            first: Duration::from_millis(200),
            max: Duration::from_secs(5),
            factor: 2.0,
            jitter: JitterPolicy::None,
        }
    }
}

impl BackoffPolicy {
    /// Computes the next delay based on the previous one.
    ///
    /// - If `prev` is `None`, returns `first` **clamped to `max`**.
    /// - Otherwise multiplies the previous delay by [`BackoffPolicy::factor`]
    ///   and caps it at [`BackoffPolicy::max`].
    pub fn next(&self, prev: Option<Duration>) -> Duration {
        let unclamped = match prev {
            None => self.first,
            Some(d) => {
                let mul = d.as_secs_f64() * self.factor;
                if !mul.is_finite() {
                    self.max
                } else {
                    d.mul_f64(self.factor)
                }
            }
        };

        let base = if unclamped > self.max {
            self.max
        } else {
            unclamped
        };
        self.jitter.apply(base)
    }
}
