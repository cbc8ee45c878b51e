//! The shared strategy interface behind the `bursty` and `warming_up`
//! pacing policies.
//!
//! The accounting core never inspects which concrete policy it holds; it
//! only calls these four hooks, each corresponding to one of the four
//! primitives a pacing policy is required to define.

/// A pacing policy: the behavior that distinguishes the bursty limiter from
/// the warming-up limiter, expressed as four hooks the accounting core calls
/// into. Everything else (resync, reservation, rate-setting) is policy-agnostic.
pub(super) trait Policy {
    /// The `stored_permits` value a freshly (re)configured limiter starts
    /// with, given the just-recomputed `max_permits`.
    fn initial_stored_permits(&self, max_permits: f64) -> f64;

    /// Recomputes and returns `max_permits` for the given
    /// `stable_interval_micros`, updating any policy-internal derived state
    /// (e.g. warming-up's `threshold_permits`/`slope`) in the process.
    fn recompute_max_permits(&mut self, stable_interval_micros: f64) -> f64;

    /// The additional microseconds of wait attributable to consuming the
    /// top `take` permits of a pool currently holding `stored` permits
    /// (`0 <= take <= stored`).
    fn stored_permits_to_wait_time(
        &self,
        stored: f64,
        take: f64,
        stable_interval_micros: f64,
    ) -> f64;

    /// The idle-time cost, in microseconds, of accruing one stored permit.
    fn cool_down_interval_micros(&self, stable_interval_micros: f64, max_permits: f64) -> f64;
}
