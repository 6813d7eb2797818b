//! Throttling primitives.
//!
//! Each primitive is plain in-memory arithmetic over epoch-millisecond
//! timestamps; none of them lock, sleep, or read a clock. The caller passes
//! `now` in, which keeps them deterministic under test and lets a
//! [`LimiterState`](crate::state::LimiterState) evaluate several of them
//! against one consistent instant.
//!
//! - [`TokenBucket`]: continuous refill, short windows (per minute).
//! - [`LeakyBucket`]: continuous leak, sustained rates (per hour).
//! - [`CalendarWindowCounter`]: fixed UTC day/hour quotas.
//! - [`CostWindowLedger`]: sliding window of weighted events.
//!
//! Time never runs backwards inside a primitive: a `now` earlier than the last
//! observation is treated as zero elapsed time.

pub mod calendar;
pub mod cost_window;
pub mod leaky_bucket;
pub mod token_bucket;

pub use calendar::{bucket_key, CalendarWindowCounter, Granularity};
pub use cost_window::CostWindowLedger;
pub use leaky_bucket::LeakyBucket;
pub use token_bucket::TokenBucket;

/// Absorbs float noise such as `1.0 / (60.0 / 3600.0) == 60.00000000000001`.
const EPSILON: f64 = 1e-9;

/// Seconds between two epoch-millisecond readings, clamped at zero.
pub(crate) fn elapsed_secs(now_ms: u64, last_ms: u64) -> f64 {
    now_ms.saturating_sub(last_ms) as f64 / 1000.0
}

/// Clamp negative or non-finite inputs to zero.
pub(crate) fn sanitize(value: f64) -> f64 {
    if value.is_finite() {
        value.max(0.0)
    } else {
        0.0
    }
}

/// Round a required wait up to whole seconds; any positive wait is at least 1s.
pub(crate) fn whole_seconds(secs: f64) -> u64 {
    if secs.is_nan() || secs <= EPSILON {
        return 0;
    }
    let rounded = (secs - EPSILON).ceil();
    if rounded >= u64::MAX as f64 {
        u64::MAX
    } else {
        (rounded as u64).max(1)
    }
}

/// Round a fractional amount up to whole units, ignoring float noise.
pub(crate) fn whole_units(amount: f64) -> u64 {
    if amount.is_nan() || amount <= EPSILON {
        return 0;
    }
    let rounded = (amount - EPSILON).ceil();
    if rounded >= u64::MAX as f64 {
        u64::MAX
    } else {
        rounded as u64
    }
}
