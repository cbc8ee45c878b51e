//! Smooth Rate Limiter
//!
//! A Rust library for pacing the issuance of abstract permits so their
//! long-run average rate stays at a configured ceiling

mod limiter;

pub use limiter::{
    SmoothRateLimiter,
    Clock,
    SystemClock,
    Error,
    ErrorKind,
};
