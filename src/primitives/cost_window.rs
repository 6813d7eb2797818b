use std::collections::VecDeque;

use super::whole_seconds;

/// Sliding window of weighted events.
///
/// Entries are appended at `now` and therefore stay in chronological order;
/// entries older than the window are dropped before every evaluation. The sum
/// of live costs is kept incrementally.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CostWindowLedger {
    entries: VecDeque<(u64, u64)>,
    total: u64,
}

impl CostWindowLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop entries with `timestamp < now - window`.
    pub fn expire(&mut self, now_ms: u64, window_secs: u64) {
        let cutoff = now_ms.saturating_sub(window_secs.saturating_mul(1000));
        while let Some(&(at, cost)) = self.entries.front() {
            if at >= cutoff {
                break;
            }
            self.entries.pop_front();
            self.total = self.total.saturating_sub(cost);
        }
    }

    /// Expire, then append `(now, cost)` if the window total stays within `limit`.
    pub fn try_add(&mut self, cost: u64, now_ms: u64, window_secs: u64, limit: u64) -> bool {
        self.expire(now_ms, window_secs);
        match self.total.checked_add(cost) {
            Some(total) if total <= limit => {
                // Keep chronological order even if the clock stepped back.
                let at = self.entries.back().map_or(now_ms, |&(last, _)| last.max(now_ms));
                if cost > 0 {
                    self.entries.push_back((at, cost));
                }
                self.total = total;
                true
            }
            _ => false,
        }
    }

    /// Whole seconds until enough of the oldest entries expire for `cost` to fit.
    ///
    /// A cost larger than `limit` can never fit; the full window is reported.
    pub fn retry_after(&self, cost: u64, now_ms: u64, window_secs: u64, limit: u64) -> u64 {
        if cost > limit {
            return window_secs;
        }
        let window_ms = window_secs.saturating_mul(1000);
        let mut remaining = self.total;
        for &(at, entry_cost) in &self.entries {
            if remaining.saturating_add(cost) <= limit {
                break;
            }
            remaining = remaining.saturating_sub(entry_cost);
            if remaining.saturating_add(cost) <= limit {
                // entry leaves the window once `now - window > at`
                let expires_at = at.saturating_add(window_ms).saturating_add(1);
                return whole_seconds(expires_at.saturating_sub(now_ms) as f64 / 1000.0);
            }
        }
        0
    }

    /// Whole seconds until the oldest live entry expires; 0 when empty.
    pub fn time_until_oldest_expires(&self, now_ms: u64, window_secs: u64) -> u64 {
        self.entries.front().map_or(0, |&(at, _)| {
            let expires_at = at.saturating_add(window_secs.saturating_mul(1000));
            whole_seconds(expires_at.saturating_sub(now_ms) as f64 / 1000.0)
        })
    }

    /// Sum of live costs as of the last expiry.
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Timestamp of the newest entry.
    pub fn last_entry_ms(&self) -> Option<u64> {
        self.entries.back().map(|&(at, _)| at)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.total = 0;
    }
}
