use std::collections::BTreeMap;

use chrono::{DateTime, DurationRound, TimeDelta, Utc};

use super::whole_seconds;
use crate::clock::to_datetime;

/// Calendar bucket size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Granularity {
    /// UTC calendar day, keyed `YYYY-MM-DD`.
    Daily,
    /// UTC calendar hour, keyed `YYYY-MM-DD-HH`.
    Hourly,
}

impl Granularity {
    fn length(self) -> TimeDelta {
        match self {
            Granularity::Daily => TimeDelta::days(1),
            Granularity::Hourly => TimeDelta::hours(1),
        }
    }

    /// How far back closed buckets are kept.
    pub fn retention(self) -> TimeDelta {
        match self {
            Granularity::Daily => TimeDelta::days(7),
            Granularity::Hourly => TimeDelta::hours(48),
        }
    }

    /// Start of the bucket containing `instant`.
    pub fn bucket_start(self, instant: DateTime<Utc>) -> DateTime<Utc> {
        instant.duration_trunc(self.length()).unwrap_or(instant)
    }

    /// Start of the bucket after the one containing `instant`.
    pub fn next_bucket_start(self, instant: DateTime<Utc>) -> DateTime<Utc> {
        self.bucket_start(instant) + self.length()
    }

    fn format(self) -> &'static str {
        match self {
            Granularity::Daily => "%Y-%m-%d",
            Granularity::Hourly => "%Y-%m-%d-%H",
        }
    }
}

/// Human-readable key of the bucket containing `now_ms`, e.g. `2024-05-01-14`.
pub fn bucket_key(now_ms: u64, granularity: Granularity) -> String {
    to_datetime(now_ms).format(granularity.format()).to_string()
}

/// Fixed UTC day/hour counters.
///
/// Each add is an all-or-nothing reservation against the bucket containing
/// `now`. Buckets older than the granularity's retention are pruned on every
/// add.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CalendarWindowCounter {
    daily: BTreeMap<DateTime<Utc>, u64>,
    hourly: BTreeMap<DateTime<Utc>, u64>,
}

impl CalendarWindowCounter {
    pub fn new() -> Self {
        Self::default()
    }

    fn buckets(&self, granularity: Granularity) -> &BTreeMap<DateTime<Utc>, u64> {
        match granularity {
            Granularity::Daily => &self.daily,
            Granularity::Hourly => &self.hourly,
        }
    }

    fn buckets_mut(&mut self, granularity: Granularity) -> &mut BTreeMap<DateTime<Utc>, u64> {
        match granularity {
            Granularity::Daily => &mut self.daily,
            Granularity::Hourly => &mut self.hourly,
        }
    }

    /// Reserve `cost` in the current bucket unless it would exceed `limit`.
    pub fn try_add(&mut self, cost: u64, now_ms: u64, granularity: Granularity, limit: u64) -> bool {
        let now = to_datetime(now_ms);
        let start = granularity.bucket_start(now);
        self.prune(granularity, start);
        let buckets = self.buckets_mut(granularity);
        let current = buckets.get(&start).copied().unwrap_or(0);
        match current.checked_add(cost) {
            Some(total) if total <= limit => {
                buckets.insert(start, total);
                true
            }
            _ => false,
        }
    }

    /// Total reserved in the bucket containing `now_ms`.
    pub fn usage(&self, now_ms: u64, granularity: Granularity) -> u64 {
        let start = granularity.bucket_start(to_datetime(now_ms));
        self.buckets(granularity).get(&start).copied().unwrap_or(0)
    }

    /// Whole seconds until the next bucket opens.
    pub fn retry_after(&self, now_ms: u64, granularity: Granularity) -> u64 {
        let now = to_datetime(now_ms);
        let remaining = granularity.next_bucket_start(now) - now;
        whole_seconds(remaining.num_milliseconds() as f64 / 1000.0)
    }

    /// Number of buckets currently retained.
    pub fn entries(&self, granularity: Granularity) -> usize {
        self.buckets(granularity).len()
    }

    pub fn clear(&mut self) {
        self.daily.clear();
        self.hourly.clear();
    }

    fn prune(&mut self, granularity: Granularity, current_start: DateTime<Utc>) {
        let horizon = current_start - granularity.retention();
        let buckets = self.buckets_mut(granularity);
        let kept = buckets.split_off(&horizon);
        *buckets = kept;
    }
}
