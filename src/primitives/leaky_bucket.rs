use super::{elapsed_secs, sanitize, whole_seconds, EPSILON};

/// Continuous-leak bucket for sustained rates.
///
/// Requests add load; load drains at `leak_per_sec`. A request is admitted
/// only if the drained level plus its weight stays within `capacity`.
/// `0 <= level <= capacity` holds after every call.
#[derive(Debug, Clone, PartialEq)]
pub struct LeakyBucket {
    capacity: f64,
    level: f64,
    leak_per_sec: f64,
    last_leak_ms: u64,
}

impl LeakyBucket {
    /// Create an empty bucket.
    pub fn new(capacity: f64, leak_per_sec: f64, now_ms: u64) -> Self {
        Self {
            capacity: sanitize(capacity),
            level: 0.0,
            leak_per_sec: sanitize(leak_per_sec),
            last_leak_ms: now_ms,
        }
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Load as of the last leak.
    pub fn level(&self) -> f64 {
        self.level
    }

    pub fn leak_per_sec(&self) -> f64 {
        self.leak_per_sec
    }

    pub fn last_leak_ms(&self) -> u64 {
        self.last_leak_ms
    }

    /// Drain load for the time elapsed since the last leak.
    pub fn leak(&mut self, now_ms: u64) {
        let leaked = elapsed_secs(now_ms, self.last_leak_ms) * self.leak_per_sec;
        self.level = (self.level - leaked).max(0.0);
        self.last_leak_ms = self.last_leak_ms.max(now_ms);
    }

    /// Leak, then add `weight` if it fits.
    pub fn try_add(&mut self, weight: f64, now_ms: u64) -> bool {
        self.leak(now_ms);
        let weight = sanitize(weight);
        if self.level + weight > self.capacity + EPSILON {
            return false;
        }
        self.level = (self.level + weight).min(self.capacity);
        true
    }

    /// True if an empty bucket could take `weight`.
    pub fn can_hold(&self, weight: f64) -> bool {
        sanitize(weight) <= self.capacity + EPSILON
    }

    /// Whole seconds until `weight` fits; 0 when it already does.
    ///
    /// `u64::MAX` when it never will: the bucket does not leak, or `weight`
    /// exceeds the capacity (see [`can_hold`](Self::can_hold)).
    pub fn time_until_capacity(&mut self, weight: f64, now_ms: u64) -> u64 {
        self.leak(now_ms);
        let excess = self.level + sanitize(weight) - self.capacity;
        if excess <= EPSILON {
            return 0;
        }
        if self.leak_per_sec <= 0.0 || !self.can_hold(weight) {
            return u64::MAX;
        }
        whole_seconds(excess / self.leak_per_sec)
    }

    /// Whole seconds until the bucket has fully drained.
    pub fn time_until_empty(&self) -> u64 {
        if self.level <= EPSILON {
            return 0;
        }
        if self.leak_per_sec <= 0.0 {
            return u64::MAX;
        }
        whole_seconds(self.level / self.leak_per_sec)
    }

    /// Apply new limits to a live bucket, keeping its load (settled at the old
    /// leak rate, clamped to the new capacity). Returns false when nothing changed.
    pub fn reconfigure(&mut self, capacity: f64, leak_per_sec: f64, now_ms: u64) -> bool {
        let capacity = sanitize(capacity);
        let leak_per_sec = sanitize(leak_per_sec);
        if capacity == self.capacity && leak_per_sec == self.leak_per_sec {
            return false;
        }
        self.leak(now_ms);
        self.capacity = capacity;
        self.leak_per_sec = leak_per_sec;
        self.level = self.level.min(capacity);
        true
    }

    pub fn reset(&mut self, now_ms: u64) {
        self.level = 0.0;
        self.last_leak_ms = now_ms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hourly_quota_of_sixty() {
        let mut bucket = LeakyBucket::new(60.0, 60.0 / 3600.0, 0);
        for i in 0..60 {
            assert!(bucket.try_add(1.0, 0), "add {i} should succeed");
        }
        assert!(!bucket.try_add(1.0, 0));
        assert_eq!(bucket.time_until_capacity(1.0, 0), 60);
        assert!(bucket.try_add(1.0, 60_000));
    }

    #[test]
    fn leak_is_linear_and_floored_at_zero() {
        let mut bucket = LeakyBucket::new(10.0, 2.0, 0);
        assert!(bucket.try_add(10.0, 0));
        bucket.leak(2_000);
        assert!((bucket.level() - 6.0).abs() < 1e-9);
        bucket.leak(60_000);
        assert_eq!(bucket.level(), 0.0);
    }

    #[test]
    fn rejected_add_leaves_level() {
        let mut bucket = LeakyBucket::new(3.0, 1.0, 0);
        assert!(bucket.try_add(2.0, 0));
        assert!(!bucket.try_add(2.0, 0));
        assert_eq!(bucket.level(), 2.0);
        assert_eq!(bucket.time_until_capacity(2.0, 0), 1);
        assert_eq!(bucket.time_until_empty(), 2);
    }

    #[test]
    fn oversized_weight_never_fits() {
        let mut bucket = LeakyBucket::new(3.0, 1.0, 0);
        assert!(!bucket.can_hold(4.0));
        assert!(!bucket.try_add(4.0, 0));
        assert_eq!(bucket.time_until_capacity(4.0, 0), u64::MAX);
        assert_eq!(bucket.time_until_capacity(4.0, 3_600_000), u64::MAX);
    }

    #[test]
    fn reconfigure_keeps_load_within_new_capacity() {
        let mut bucket = LeakyBucket::new(100.0, 100.0 / 3600.0, 0);
        assert!(bucket.try_add(10.0, 0));
        assert!(!bucket.reconfigure(100.0, 100.0 / 3600.0, 0));
        assert!(bucket.reconfigure(5.0, 5.0 / 3600.0, 0));
        assert_eq!(bucket.level(), 5.0);
        assert!(!bucket.try_add(1.0, 0));
        assert_eq!(bucket.time_until_capacity(1.0, 0), 720);

        assert!(bucket.reconfigure(50.0, 5.0 / 3600.0, 0));
        assert_eq!(bucket.level(), 5.0, "raising capacity keeps the load");
        assert!(bucket.try_add(1.0, 0));
    }

    #[test]
    fn clock_regression_does_not_leak() {
        let mut bucket = LeakyBucket::new(2.0, 1.0, 5_000);
        assert!(bucket.try_add(2.0, 5_000));
        assert!(!bucket.try_add(1.0, 1_000));
        assert_eq!(bucket.level(), 2.0);
        assert_eq!(bucket.last_leak_ms(), 5_000);
    }

    #[test]
    fn reset_empties() {
        let mut bucket = LeakyBucket::new(2.0, 0.001, 0);
        assert!(bucket.try_add(2.0, 0));
        bucket.reset(10);
        assert_eq!(bucket.level(), 0.0);
        assert!(bucket.try_add(2.0, 10));
    }

    #[test]
    fn bounds_hold_over_mixed_sequence() {
        let mut bucket = LeakyBucket::new(5.0, 0.25, 0);
        let mut now = 0;
        for step in 0..200u64 {
            now += (step * 211) % 3_700;
            let _ = bucket.try_add(((step % 4) as f64) * 0.75, now);
            assert!(bucket.level() >= 0.0 && bucket.level() <= bucket.capacity());
        }
    }
}
