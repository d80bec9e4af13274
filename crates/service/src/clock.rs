use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

/// Injectable source of time.
///
/// The default implementation returns [`tokio::time::Instant::now`], which
/// already honors a paused/advanced runtime clock under `#[tokio::test(start_paused
/// = true)]`; a channel under test does not need a bespoke fake beyond that.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Injectable source of jitter for the timeout sweep.
pub trait Random: Send + Sync {
    /// Returns a signed offset in milliseconds, uniformly distributed over
    /// `[-fuzz/2, fuzz/2]`.
    fn jitter_millis(&self, fuzz: Duration) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl Random for ThreadRandom {
    fn jitter_millis(&self, fuzz: Duration) -> i64 {
        jitter_millis_with(fuzz, rand::random::<f64>())
    }
}

/// Shared helper so tests can supply a deterministic `[0, 1)` sample.
pub(crate) fn jitter_millis_with(fuzz: Duration, sample: f64) -> i64 {
    let half_ms = fuzz.as_millis() as f64 / 2.0;
    ((sample * 2.0 - 1.0) * half_ms).round() as i64
}

/// Applies a signed millisecond jitter to `base`, clamped at zero.
pub(crate) fn apply_jitter(base: Duration, jitter_ms: i64) -> Duration {
    let base_ms = base.as_millis() as i64;
    Duration::from_millis(base_ms.saturating_add(jitter_ms).max(0) as u64)
}

pub type SharedClock = Arc<dyn Clock>;
pub type SharedRandom = Arc<dyn Random>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_within_half_fuzz() {
        let fuzz = Duration::from_millis(100);
        assert_eq!(jitter_millis_with(fuzz, 0.0), -50);
        assert_eq!(jitter_millis_with(fuzz, 1.0), 50);
        assert_eq!(jitter_millis_with(fuzz, 0.5), 0);
    }
}
