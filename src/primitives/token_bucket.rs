use super::{elapsed_secs, sanitize, whole_seconds, EPSILON};

/// Continuous-refill token bucket.
///
/// Holds up to `capacity` tokens, replenished at `refill_per_sec`. An optional
/// burst reserve sits on top: it is only drawn from when the main tokens are
/// short, and it is refilled by whatever refill overflows a full bucket.
///
/// `0 <= available <= capacity` and `0 <= burst_available <= burst_capacity`
/// hold after every call.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenBucket {
    capacity: f64,
    available: f64,
    burst_capacity: f64,
    burst_available: f64,
    refill_per_sec: f64,
    last_refill_ms: u64,
}

impl TokenBucket {
    /// Create a full bucket. Negative or non-finite inputs are clamped to zero.
    pub fn new(capacity: f64, refill_per_sec: f64, now_ms: u64) -> Self {
        let capacity = sanitize(capacity);
        Self {
            capacity,
            available: capacity,
            burst_capacity: 0.0,
            burst_available: 0.0,
            refill_per_sec: sanitize(refill_per_sec),
            last_refill_ms: now_ms,
        }
    }

    /// Add a full burst reserve of `burst` tokens.
    pub fn with_burst(mut self, burst: f64) -> Self {
        self.burst_capacity = sanitize(burst);
        self.burst_available = self.burst_capacity;
        self
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn burst_capacity(&self) -> f64 {
        self.burst_capacity
    }

    pub fn refill_per_sec(&self) -> f64 {
        self.refill_per_sec
    }

    pub fn last_refill_ms(&self) -> u64 {
        self.last_refill_ms
    }

    /// Main tokens as of the last refill.
    pub fn available(&self) -> f64 {
        self.available
    }

    /// Burst reserve as of the last refill.
    pub fn burst_available(&self) -> f64 {
        self.burst_available
    }

    /// Main plus burst tokens as of the last refill.
    pub fn total_available(&self) -> f64 {
        self.available + self.burst_available
    }

    /// Credit tokens for the time elapsed since the last refill.
    pub fn refill(&mut self, now_ms: u64) {
        let added = elapsed_secs(now_ms, self.last_refill_ms) * self.refill_per_sec;
        let filled = self.available + added;
        if filled > self.capacity {
            let overflow = filled - self.capacity;
            self.available = self.capacity;
            self.burst_available = (self.burst_available + overflow).min(self.burst_capacity);
        } else {
            self.available = filled;
        }
        self.last_refill_ms = self.last_refill_ms.max(now_ms);
    }

    /// Refill, then take `tokens` if main plus burst tokens cover them.
    ///
    /// On failure nothing beyond the refill step is mutated.
    pub fn try_consume(&mut self, tokens: f64, now_ms: u64) -> bool {
        self.refill(now_ms);
        let tokens = sanitize(tokens);
        if self.total_available() + EPSILON < tokens {
            return false;
        }
        let from_main = tokens.min(self.available);
        self.available = (self.available - from_main).max(0.0);
        let from_burst = tokens - from_main;
        self.burst_available = (self.burst_available - from_burst).max(0.0);
        true
    }

    /// True if a full bucket (main plus burst) could cover `tokens`.
    pub fn can_hold(&self, tokens: f64) -> bool {
        sanitize(tokens) <= self.capacity + self.burst_capacity + EPSILON
    }

    /// Whole seconds until `tokens` could be consumed; 0 when already satisfiable.
    ///
    /// `u64::MAX` when no amount of waiting helps: the bucket never refills, or
    /// `tokens` exceeds what a full bucket holds (see [`can_hold`](Self::can_hold)).
    pub fn time_until_available(&mut self, tokens: f64, now_ms: u64) -> u64 {
        self.refill(now_ms);
        let missing = sanitize(tokens) - self.total_available();
        if missing <= EPSILON {
            return 0;
        }
        if self.refill_per_sec <= 0.0 || !self.can_hold(tokens) {
            return u64::MAX;
        }
        whole_seconds(missing / self.refill_per_sec)
    }

    /// Whole seconds until main and burst tokens are both full again.
    pub fn time_until_full(&self) -> u64 {
        let missing = (self.capacity - self.available) + (self.burst_capacity - self.burst_available);
        if missing <= EPSILON {
            return 0;
        }
        if self.refill_per_sec <= 0.0 {
            return u64::MAX;
        }
        whole_seconds(missing / self.refill_per_sec)
    }

    /// Apply new limits to a live bucket.
    ///
    /// Tokens earned so far are settled at the old rate, then the main tokens
    /// and burst reserve are clamped to the new capacities. Returns false and
    /// leaves the bucket untouched when nothing changed.
    pub fn reconfigure(&mut self, capacity: f64, burst: f64, refill_per_sec: f64, now_ms: u64) -> bool {
        let capacity = sanitize(capacity);
        let burst = sanitize(burst);
        let refill_per_sec = sanitize(refill_per_sec);
        if capacity == self.capacity
            && burst == self.burst_capacity
            && refill_per_sec == self.refill_per_sec
        {
            return false;
        }
        self.refill(now_ms);
        self.capacity = capacity;
        self.burst_capacity = burst;
        self.refill_per_sec = refill_per_sec;
        self.available = self.available.min(capacity);
        self.burst_available = self.burst_available.min(burst);
        true
    }

    /// Refill completely, as if the bucket had just been created.
    pub fn reset(&mut self, now_ms: u64) {
        self.available = self.capacity;
        self.burst_available = self.burst_capacity;
        self.last_refill_ms = now_ms;
    }
}
