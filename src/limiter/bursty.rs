//! The bursty pacing policy: stored permits are free.

use super::policy::Policy;

/// The bursty pacing policy.
///
/// Unused capacity accumulates as "stored permits" up to a configurable
/// burst size, and stored permits are **free** to spend - the entire cost
/// of a request comes from whatever portion of it is not covered by
/// storage. This makes idle capacity immediately usable: a limiter that
/// has been quiet for a while can absorb a burst up to its ceiling without
/// any extra delay.
///
/// ## Characteristics
///
/// - **Full bursts absorbed** - a request entirely covered by stored
///   permits costs nothing extra.
/// - **Bounded storage** - `max_permits = max_burst_seconds * rate`, so the
///   burst size is expressed in seconds of steady-state throughput rather
///   than a raw permit count.
/// - **Symmetric refill** - stored permits accrue at exactly the
///   configured rate while idle.
///
/// ## When to use
///
/// This policy is suitable when:
///
/// - occasional spikes above the average rate are acceptable and should be
///   served immediately,
/// - there is no need to protect a downstream system from a cold start.
#[derive(Debug, Clone, Copy)]
pub(super) struct Bursty {
    max_burst_seconds: f64,
}

impl Bursty {
    pub(super) fn new(max_burst_seconds: f64) -> Self {
        Self { max_burst_seconds }
    }
}

impl Policy for Bursty {
    #[inline]
    fn initial_stored_permits(&self, _max_permits: f64) -> f64 {
        0.0
    }

    #[inline]
    fn recompute_max_permits(&mut self, stable_interval_micros: f64) -> f64 {
        self.max_burst_seconds * (MICROS_PER_SEC_F64 / stable_interval_micros)
    }

    #[inline]
    fn stored_permits_to_wait_time(&self, _stored: f64, _take: f64, _stable_interval_micros: f64) -> f64 {
        // Stored permits are free; the short-circuit is deliberate (see
        // module docs) - it differs from a literal integral of a flat
        // `I(s) = stable_interval_micros` so that bursts are fully absorbed.
        0.0
    }

    #[inline]
    fn cool_down_interval_micros(&self, stable_interval_micros: f64, _max_permits: f64) -> f64 {
        stable_interval_micros
    }
}

const MICROS_PER_SEC_F64: f64 = 1_000_000.0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_permits_scales_with_burst_seconds_and_rate() {
        let mut policy = Bursty::new(10.0);
        // rate = 2/s -> stable_interval = 500_000
        let max_permits = policy.recompute_max_permits(500_000.0);
        assert_eq!(max_permits, 20.0);
    }

    #[test]
    fn initial_stored_permits_is_always_zero() {
        let policy = Bursty::new(5.0);
        assert_eq!(policy.initial_stored_permits(100.0), 0.0);
    }

    #[test]
    fn stored_permits_are_always_free() {
        let policy = Bursty::new(5.0);
        assert_eq!(policy.stored_permits_to_wait_time(20.0, 20.0, 500_000.0), 0.0);
        assert_eq!(policy.stored_permits_to_wait_time(0.0, 0.0, 500_000.0), 0.0);
    }

    #[test]
    fn cool_down_equals_stable_interval() {
        let policy = Bursty::new(5.0);
        assert_eq!(policy.cool_down_interval_micros(500_000.0, 20.0), 500_000.0);
    }
}
