//! Smooth permit accounting and the pacing policies built on top of it.
//!
//! This module defines the core traits and building blocks used by
//! both pacing policies provided by this crate.
//!
//! The primary abstraction is [`SmoothRateLimiter`], a stateful,
//! thread-safe limiter that hands out a forward-looking "grant time" for
//! each request rather than a simple yes/no answer, and blocks the caller
//! until that time arrives.
//!
//! ## Design principles
//!
//! - **Pay-later accounting** - a request is served as soon as possible,
//!   but its cost is reflected in the wait imposed on the *next* request,
//!   never the current one.
//! - **Policy-agnostic core** - the accounting core does not know whether
//!   it is pacing a bursty or warming-up policy; it only calls the
//!   four hooks defined by the internal `Policy` trait.
//! - **Time abstraction** - all time-dependent logic is driven by a
//!   pluggable [`Clock`] to allow deterministic testing.
//!
//! ## Thread safety
//!
//! [`SmoothRateLimiter`] is:
//!
//! - Safe to share between threads (`Send + Sync` whenever its `Clock` is)
//! - Designed so that sleeping callers never hold the internal mutex
//! - Free of any internal queue; fairness among contending callers is
//!   inherited entirely from mutex acquisition order
//!
//! ## Scope
//!
//! This module does **not** define partitioned or per-key limiting, nor
//! distributed coordination across processes. Run one limiter per logical
//! resource; those concerns are intentionally left to higher-level layers.

use std::time::{Duration, Instant};

pub use error::{Error, ErrorKind};
pub use accounting::SmoothRateLimiter;

mod error;
mod policy;
mod bursty;
mod warming_up;
mod accounting;

const MICROS_PER_SEC: u64 = 1_000_000;

/// A source of monotonic time and blocking sleep used by [`SmoothRateLimiter`].
///
/// This abstraction allows the limiter to be decoupled from the system
/// clock, enabling deterministic and fast unit tests.
///
/// Time is expressed in **microseconds** and must be **monotonic**
/// (non-decreasing).
pub trait Clock: Send + Sync {
    /// Returns a monotonic timestamp in microseconds.
    fn now_micros(&self) -> u64;

    /// Blocks the calling thread until the monotonic clock reaches
    /// `target_micros`. A no-op if that instant has already passed.
    fn sleep_until(&self, target_micros: u64);
}

/// Monotonic system clock backed by [`Instant`].
///
/// Uses an internal start anchor and returns elapsed microseconds since that
/// anchor. This avoids wall-clock jumps (NTP, manual adjustments, etc.).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl SystemClock {
    #[inline]
    fn anchor() -> Instant {
        // `Instant::now()` is cheap and monotonic.
        // We want a stable anchor shared across calls.
        // Using `OnceLock` gives us a process-wide start point.
        static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
        *START.get_or_init(Instant::now)
    }
}

impl Clock for SystemClock {
    #[inline]
    fn now_micros(&self) -> u64 {
        let elapsed = Self::anchor().elapsed();
        // Saturating conversion to be extra defensive (though practically safe).
        elapsed
            .as_micros()
            .try_into()
            .unwrap_or(u64::MAX)
    }

    #[inline]
    fn sleep_until(&self, target_micros: u64) {
        let now = self.now_micros();
        if target_micros <= now {
            return;
        }
        std::thread::sleep(Duration::from_micros(target_micros - now));
    }
}
