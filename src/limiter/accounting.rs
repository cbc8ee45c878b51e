//! The policy-agnostic accounting core and the public [`SmoothRateLimiter`] facade.

use std::sync::Mutex;
use std::time::Duration;

use super::bursty::Bursty;
use super::error::{Error, ErrorKind};
use super::policy::Policy;
use super::warming_up::WarmingUp;
use super::{Clock, SystemClock, MICROS_PER_SEC};

/// The mutable, mutex-guarded state shared by both pacing policies.
struct State {
    /// Credit accumulated during idleness, bounded by `max_permits`.
    stored_permits: f64,
    /// Upper bound on `stored_permits`; policy-derived.
    max_permits: f64,
    /// `1e6 / rate`: the steady-state time between successive single permits.
    stable_interval_micros: f64,
    /// The earliest time at which a *next* permit request will be scheduled.
    next_free_ticket_micros: u64,
    /// The currently configured rate, in permits per second.
    rate: f64,
    policy: Box<dyn Policy + Send>,
}

impl State {
    /// `max_permits == 0.0` doubles as the "never configured" sentinel: the
    /// very first `set_rate` call always lands in the cold-reset branch of
    /// rate rescaling because no real configuration can legitimately reach
    /// it (`rate` and `max_burst_seconds`/`warmup_period` are both validated
    /// positive).
    fn fresh(policy: Box<dyn Policy + Send>) -> Self {
        Self {
            stored_permits: 0.0,
            max_permits: 0.0,
            stable_interval_micros: 1.0,
            next_free_ticket_micros: 0,
            rate: 0.0,
            policy,
        }
    }

    /// The sole place idle-time credit is integrated. Called with the mutex
    /// held, before every operation that reads or mutates permit state.
    fn resync(&mut self, now: u64) {
        if now > self.next_free_ticket_micros {
            let cool_down = self
                .policy
                .cool_down_interval_micros(self.stable_interval_micros, self.max_permits);
            let idle_micros = (now - self.next_free_ticket_micros) as f64;
            let accrued = idle_micros / cool_down;
            self.stored_permits = (self.stored_permits + accrued).min(self.max_permits);
            self.next_free_ticket_micros = now;
        }
    }

    /// Reserves `n` permits against the earliest time they become
    /// available. Returns the instant this request is granted at (may be
    /// before `now`).
    fn reserve_earliest_available(&mut self, n: u32, now: u64) -> u64 {
        self.resync(now);
        let granted_at = self.next_free_ticket_micros;

        let n = n as f64;
        let stored_to_spend = n.min(self.stored_permits);
        let fresh = n - stored_to_spend;

        let wait = self.policy.stored_permits_to_wait_time(
            self.stored_permits,
            stored_to_spend,
            self.stable_interval_micros,
        ) + (fresh * self.stable_interval_micros).floor();

        let wait_micros = wait.floor().max(0.0);
        let wait_micros = if wait_micros >= u64::MAX as f64 {
            u64::MAX
        } else {
            wait_micros as u64
        };

        self.next_free_ticket_micros = self.next_free_ticket_micros.saturating_add(wait_micros);
        self.stored_permits -= stored_to_spend;

        granted_at
    }

    /// Recomputes rate-derived fields. Must be called with `resync` having
    /// already run against the *old* configuration (callers do this by
    /// calling `resync` themselves before overwriting anything - see
    /// [`SmoothRateLimiter::set_rate`]).
    fn apply_rate(&mut self, rate: f64) {
        let old_max_permits = self.max_permits;
        let old_stored_permits = self.stored_permits;

        let stable_interval_micros = MICROS_PER_SEC as f64 / rate;
        let new_max_permits = self.policy.recompute_max_permits(stable_interval_micros);

        let new_stored_permits = if old_max_permits == 0.0 || old_max_permits.is_infinite() {
            self.policy.initial_stored_permits(new_max_permits)
        } else {
            old_stored_permits * (new_max_permits / old_max_permits)
        };

        self.rate = rate;
        self.stable_interval_micros = stable_interval_micros;
        self.max_permits = new_max_permits;
        self.stored_permits = new_stored_permits;
    }
}

/// A smooth rate limiter.
///
/// Paces the issuance of abstract permits so their long-run average rate
/// does not exceed a configured value, while tolerating short bursts (and,
/// optionally, a cold-start ramp). See the crate-level documentation for the
/// two pacing policies ([`bursty`](SmoothRateLimiter::bursty) and
/// [`warming_up`](SmoothRateLimiter::warming_up)).
///
/// ## Characteristics
///
/// - **Pay-later accounting** - a request is granted as soon as possible;
///   its cost is reflected in the wait the *next* caller observes.
/// - **Mutex-guarded, sleep-free critical section** - the internal mutex is
///   released before a caller sleeps, so contending callers can keep
///   reserving (and pushing `next_free_ticket_micros` further out) while
///   others are still waiting.
/// - **No partitioning** - one limiter instance paces one logical resource;
///   run multiple instances for multiple independent budgets.
pub struct SmoothRateLimiter<C: Clock = SystemClock> {
    state: Mutex<State>,
    clock: C,
}

impl SmoothRateLimiter {
    /// Creates a bursty limiter using the system clock.
    ///
    /// `max_burst_seconds` expresses the burst ceiling as a number of
    /// seconds of steady-state throughput (`max_permits = max_burst_seconds
    /// * rate`) rather than a raw permit count.
    pub fn bursty(rate: f64, max_burst_seconds: f64) -> Result<Self, Error> {
        Self::bursty_with_clock(rate, max_burst_seconds, SystemClock)
    }

    /// Creates a warming-up limiter using the system clock.
    ///
    /// `cold_factor` must be strictly greater than `1.0`: it is the ratio
    /// between the per-permit cost when the limiter is fully cold and the
    /// steady-state per-permit cost.
    pub fn warming_up(rate: f64, warmup_period: Duration, cold_factor: f64) -> Result<Self, Error> {
        Self::warming_up_with_clock(rate, warmup_period, cold_factor, SystemClock)
    }
}

impl<C: Clock> SmoothRateLimiter<C> {
    /// Creates a [`SmoothRateLimiter`] using the bursty policy with a custom
    /// [`Clock`]. Primarily useful for deterministic tests.
    pub fn bursty_with_clock(rate: f64, max_burst_seconds: f64, clock: C) -> Result<Self, Error> {
        if !max_burst_seconds.is_finite() || max_burst_seconds <= 0.0 {
            return Err(Error::new(
                ErrorKind::InvalidBurst,
                "max_burst_seconds must be finite and > 0",
            ));
        }
        let policy = Box::new(Bursty::new(max_burst_seconds));
        Self::with_policy(rate, policy, clock)
    }

    /// Creates a [`SmoothRateLimiter`] using the warming-up policy with a
    /// custom [`Clock`]. Primarily useful for deterministic tests.
    pub fn warming_up_with_clock(
        rate: f64,
        warmup_period: Duration,
        cold_factor: f64,
        clock: C,
    ) -> Result<Self, Error> {
        if warmup_period.is_zero() {
            return Err(Error::new(
                ErrorKind::InvalidWarmupPeriod,
                "warmup_period must be > 0",
            ));
        }
        if !cold_factor.is_finite() || cold_factor <= 1.0 {
            return Err(Error::new(
                ErrorKind::InvalidColdFactor,
                "cold_factor must be finite and > 1.0",
            ));
        }
        let warmup_period_micros = warmup_period.as_micros() as f64;
        let policy = Box::new(WarmingUp::new(warmup_period_micros, cold_factor));
        Self::with_policy(rate, policy, clock)
    }

    fn with_policy(rate: f64, policy: Box<dyn Policy + Send>, clock: C) -> Result<Self, Error> {
        let mut state = State::fresh(policy);
        Self::validate_rate(rate)?;
        let now = clock.now_micros();
        state.resync(now);
        state.next_free_ticket_micros = now;
        state.apply_rate(rate);

        #[cfg(feature = "tracing")]
        tracing::debug!(rate, max_permits = state.max_permits, "rate limiter configured");

        Ok(Self {
            state: Mutex::new(state),
            clock,
        })
    }

    fn validate_rate(rate: f64) -> Result<(), Error> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(Error::new(ErrorKind::InvalidRate, "rate must be finite and > 0"));
        }
        Ok(())
    }

    /// Reconfigures the limiter's rate.
    ///
    /// Re-syncs against the old rate first (freezing accrual), then
    /// rescales `stored_permits` to preserve the *fraction* of capacity
    /// held.
    pub fn set_rate(&self, rate: f64) -> Result<(), Error> {
        Self::validate_rate(rate)?;
        let now = self.clock.now_micros();
        let mut state = self.state.lock().unwrap();
        state.resync(now);
        state.apply_rate(rate);

        #[cfg(feature = "tracing")]
        tracing::debug!(rate, max_permits = state.max_permits, "rate limiter rate changed");

        Ok(())
    }

    /// The currently configured rate, in permits per second.
    pub fn rate(&self) -> f64 {
        self.state.lock().unwrap().rate
    }

    /// Acquires `n` permits, blocking the calling thread until they are
    /// available, and returns how long the caller waited.
    pub fn acquire(&self, n: u32) -> Result<Duration, Error> {
        if n < 1 {
            return Err(Error::new(ErrorKind::InvalidPermits, "n must be >= 1"));
        }

        let call_start = self.clock.now_micros();
        let granted_at = {
            let mut state = self.state.lock().unwrap();
            state.reserve_earliest_available(n, call_start)
        };

        #[cfg(feature = "tracing")]
        tracing::trace!(n, granted_at, "permits reserved");

        self.clock.sleep_until(granted_at);
        Ok(Duration::from_micros(granted_at.saturating_sub(call_start)))
    }

    /// Attempts to acquire `n` permits without waiting longer than
    /// `timeout`.
    ///
    /// Returns `Ok(false)` without mutating any state if the reservation
    /// would require waiting longer than `timeout`. There is no partial
    /// grant: permits are reserved in full or not at all.
    pub fn try_acquire(&self, n: u32, timeout: Duration) -> Result<bool, Error> {
        if n < 1 {
            return Err(Error::new(ErrorKind::InvalidPermits, "n must be >= 1"));
        }

        let call_start = self.clock.now_micros();
        let timeout_micros = timeout.as_micros().try_into().unwrap_or(u64::MAX);

        let granted_at = {
            let mut state = self.state.lock().unwrap();
            state.resync(call_start);
            if state.next_free_ticket_micros > call_start.saturating_add(timeout_micros) {
                return Ok(false);
            }
            state.reserve_earliest_available(n, call_start)
        };

        #[cfg(feature = "tracing")]
        tracing::trace!(n, granted_at, "permits reserved (try_acquire)");

        self.clock.sleep_until(granted_at);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limiter::test_utils::MockClock;

    #[test]
    fn bursty_rejects_invalid_arguments() {
        assert!(SmoothRateLimiter::bursty(0.0, 1.0).is_err());
        assert!(SmoothRateLimiter::bursty(-1.0, 1.0).is_err());
        assert!(SmoothRateLimiter::bursty(f64::NAN, 1.0).is_err());
        assert!(SmoothRateLimiter::bursty(1.0, 0.0).is_err());
        assert!(SmoothRateLimiter::bursty(1.0, -1.0).is_err());
    }

    #[test]
    fn warming_up_rejects_invalid_arguments() {
        assert!(SmoothRateLimiter::warming_up(1.0, Duration::ZERO, 2.0).is_err());
        assert!(SmoothRateLimiter::warming_up(1.0, Duration::from_secs(1), 1.0).is_err());
        assert!(SmoothRateLimiter::warming_up(1.0, Duration::from_secs(1), 0.5).is_err());
    }

    #[test]
    fn acquire_rejects_zero_permits() {
        let clock = MockClock::new(0);
        let limiter = SmoothRateLimiter::bursty_with_clock(1.0, 1.0, clock).unwrap();
        assert!(limiter.acquire(0).is_err());
    }

    // rate = 5/s, max_burst_seconds = 1, clock frozen at 0 throughout.
    #[test]
    fn bursty_back_to_back_acquires_spread_out_by_stable_interval() {
        let clock = MockClock::at_micros(0);
        let limiter = SmoothRateLimiter::bursty_with_clock(5.0, 1.0, clock).unwrap();

        let expected: Vec<u64> = (0..10).map(|i| i * 200_000).collect();
        let observed: Vec<u64> = (0..10)
            .map(|_| limiter.acquire(1).unwrap().as_micros() as u64)
            .collect();

        assert_eq!(observed, expected);
    }

    // rate = 2/s, max_burst_seconds = 10 -> max_permits = 20.
    #[test]
    fn bursty_absorbs_burst_after_idling_then_pushes_cost_forward() {
        let clock = MockClock::at_micros(0);
        let limiter = SmoothRateLimiter::bursty_with_clock(2.0, 10.0, clock.clone()).unwrap();

        clock.advance_micros(10_000_000);

        let wait = limiter.acquire(20).unwrap();
        assert_eq!(wait, Duration::ZERO);

        // This call's own wait is still zero (it inherits the ticket the
        // acquire(20) above left untouched); its cost is pushed onto the
        // next caller's ticket instead.
        let wait = limiter.acquire(1).unwrap();
        assert_eq!(wait, Duration::ZERO);

        // The pushed cost becomes visible to a third caller at the same instant.
        let wait = limiter.acquire(1).unwrap();
        assert_eq!(wait, Duration::from_micros(500_000));
    }

    // rate = 1/s, warmup_period = 2s, cold_factor = 3.
    #[test]
    fn warming_up_cold_start_pushes_trapezoid_cost_onto_next_caller() {
        let clock = MockClock::at_micros(0);
        let limiter =
            SmoothRateLimiter::warming_up_with_clock(1.0, Duration::from_secs(2), 3.0, clock)
                .unwrap();

        let wait = limiter.acquire(1).unwrap();
        assert_eq!(wait, Duration::ZERO);

        let wait = limiter.acquire(1).unwrap();
        assert_eq!(wait, Duration::from_micros(4_000_000));
    }

    #[test]
    fn warming_up_saturated_burst_sums_trapezoid_and_flat_remainder() {
        let clock = MockClock::at_micros(0);
        let limiter =
            SmoothRateLimiter::warming_up_with_clock(1.0, Duration::from_secs(2), 3.0, clock)
                .unwrap();

        let wait = limiter.acquire(2).unwrap();
        assert_eq!(wait, Duration::ZERO);

        let wait = limiter.acquire(1).unwrap();
        assert_eq!(wait, Duration::from_micros(5_000_000));
    }

    #[test]
    fn try_acquire_rejects_when_required_wait_exceeds_timeout() {
        let clock = MockClock::at_micros(0);
        let limiter = SmoothRateLimiter::bursty_with_clock(1.0, 1.0, clock).unwrap();

        let wait = limiter.acquire(5).unwrap();
        assert_eq!(wait, Duration::ZERO);

        let rate_before = limiter.rate();
        let granted = limiter
            .try_acquire(1, Duration::from_micros(1_000_000))
            .unwrap();
        assert!(!granted);
        // state is unchanged on refusal
        assert_eq!(limiter.rate(), rate_before);
    }

    #[test]
    fn try_acquire_succeeds_when_deadline_already_met() {
        let clock = MockClock::at_micros(0);
        let limiter = SmoothRateLimiter::bursty_with_clock(1.0, 1.0, clock).unwrap();

        assert!(limiter.try_acquire(1, Duration::ZERO).unwrap());
    }

    #[test]
    fn set_rate_rescales_stored_permits_preserving_fraction_of_capacity() {
        let clock = MockClock::at_micros(0);
        let limiter = SmoothRateLimiter::bursty_with_clock(10.0, 1.0, clock.clone()).unwrap();

        // Idle for half the burst window: stored_permits -> 5 out of max 10.
        clock.advance_micros(500_000);
        limiter.set_rate(5.0).unwrap();
        assert_eq!(limiter.rate(), 5.0);

        // max_permits rescales to 1.0 * 5.0 = 5; stored_permits rescales to
        // 2.5, preserving the 50% fraction held before the rate change.
        // Both calls' own wait is zero: each inherits a ticket that is
        // already due, and pushes its cost onto whoever calls next.
        assert_eq!(limiter.acquire(2).unwrap(), Duration::ZERO);
        assert_eq!(limiter.acquire(1).unwrap(), Duration::ZERO);

        // The 0.5 stored + 0.5 fresh permit cost of the previous call, at
        // the new 200_000us stable interval, lands on this caller.
        assert_eq!(limiter.acquire(1).unwrap(), Duration::from_micros(100_000));
    }

    #[test]
    fn set_rate_rejects_non_positive_rate() {
        let clock = MockClock::new(0);
        let limiter = SmoothRateLimiter::bursty_with_clock(1.0, 1.0, clock).unwrap();
        assert!(limiter.set_rate(0.0).is_err());
        assert!(limiter.set_rate(-5.0).is_err());
    }

    #[test]
    fn rate_never_decreases_next_free_ticket_across_concurrent_threads() {
        use std::sync::Arc;
        use std::thread;

        let limiter = Arc::new(SmoothRateLimiter::bursty(1_000.0, 1.0).unwrap());
        let mut handles = vec![];
        for _ in 0..8 {
            let limiter = limiter.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..50 {
                    limiter.acquire(1).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
