//! The warming-up pacing policy: stored permits get progressively more
//! expensive the more of them are stored, producing a cold-start ramp.

use super::policy::Policy;

/// The warming-up pacing policy.
///
/// Like [`Bursty`](super::bursty), unused capacity accumulates as stored
/// permits up to a ceiling, but spending them is **not** free: the
/// instantaneous cost per permit, `I(s)`, is flat for stored-permit levels
/// below `threshold_permits` and rises linearly above it, reaching its
/// peak (`cold_interval_micros = stable_interval_micros * cold_factor`) at
/// `max_permits`. A cold limiter therefore starts full of expensive stored
/// permits and must "warm up" by spending them down before it can sustain
/// the configured steady-state rate.
///
/// ## Algorithm
///
/// Given `stable_interval_micros`, `warmup_period_micros` and `cold_factor`:
///
/// ```text
/// threshold_permits  = 0.5 * warmup_period_micros / stable_interval_micros
/// cold_interval_micros = stable_interval_micros * cold_factor
/// max_permits        = threshold_permits
///                     + 2 * warmup_period_micros / (stable_interval_micros + cold_interval_micros)
/// slope              = (cold_interval_micros - stable_interval_micros) / (max_permits - threshold_permits)
/// ```
///
/// The cost of consuming permits in `[stored - take, stored]` is the
/// integral of `I(s)` over that interval: a flat rectangle for the portion
/// below `threshold_permits`, plus a trapezoid for the portion above it.
///
/// ## When to use
///
/// This policy is suitable when:
///
/// - emerging from a cold state should temporarily slow issuance,
/// - a downstream cache, connection pool, or JIT needs time to warm up
///   before receiving full load.
#[derive(Debug, Clone, Copy)]
pub(super) struct WarmingUp {
    warmup_period_micros: f64,
    cold_factor: f64,
    threshold_permits: f64,
    slope: f64,
}

impl WarmingUp {
    pub(super) fn new(warmup_period_micros: f64, cold_factor: f64) -> Self {
        Self {
            warmup_period_micros,
            cold_factor,
            threshold_permits: 0.0,
            slope: 0.0,
        }
    }

    #[inline]
    fn instantaneous_interval(&self, stored: f64, stable_interval_micros: f64) -> f64 {
        if stored >= self.threshold_permits {
            stable_interval_micros + stored * self.slope
        } else {
            stable_interval_micros
        }
    }
}

impl Policy for WarmingUp {
    #[inline]
    fn initial_stored_permits(&self, max_permits: f64) -> f64 {
        max_permits
    }

    fn recompute_max_permits(&mut self, stable_interval_micros: f64) -> f64 {
        self.threshold_permits = 0.5 * self.warmup_period_micros / stable_interval_micros;
        let cold_interval_micros = stable_interval_micros * self.cold_factor;
        let max_permits = self.threshold_permits
            + 2.0 * self.warmup_period_micros / (stable_interval_micros + cold_interval_micros);
        self.slope = (cold_interval_micros - stable_interval_micros)
            / (max_permits - self.threshold_permits);
        max_permits
    }

    fn stored_permits_to_wait_time(&self, stored: f64, take: f64, stable_interval_micros: f64) -> f64 {
        let above = (stored - self.threshold_permits).max(0.0);
        let above_take = above.min(take);

        let trapezoid = if above_take > 0.0 {
            let interval_at_stored = self.instantaneous_interval(stored, stable_interval_micros);
            let interval_at_remaining =
                self.instantaneous_interval(stored - above_take, stable_interval_micros);
            above_take * (interval_at_stored + interval_at_remaining) / 2.0
        } else {
            0.0
        };

        let flat_take = take - above_take;
        let flat = stable_interval_micros * flat_take;

        trapezoid + flat
    }

    #[inline]
    fn cool_down_interval_micros(&self, _stable_interval_micros: f64, max_permits: f64) -> f64 {
        self.warmup_period_micros / max_permits
    }
}
