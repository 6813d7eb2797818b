//! Per-(category, identifier) rate-limiting memory.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::clock::to_datetime;
use crate::decision::Cost;
use crate::primitives::{
    whole_units, CalendarWindowCounter, CostWindowLedger, Granularity, LeakyBucket, TokenBucket,
};
use crate::rule::{CalendarRule, CostRule, LeakRule, Rule, RuleKind, TokenRule};

/// Result of evaluating one rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleOutcome {
    pub kind: RuleKind,
    pub allowed: bool,
    /// Consumption after this evaluation, in whole units.
    pub usage: u64,
    pub limit: u64,
    /// Wait required by this rule; 0 when it passed.
    pub retry_after_secs: u64,
    /// Epoch milliseconds at which this rule's window is fully clear.
    pub resets_at_ms: u64,
}

/// Outcomes of every rule of a category, in catalog order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Evaluation {
    pub outcomes: Vec<RuleOutcome>,
    /// Largest wait among failing rules.
    pub retry_after_secs: u64,
}

impl Evaluation {
    /// A request passes only if every rule passed.
    pub fn allowed(&self) -> bool {
        self.outcomes.iter().all(|o| o.allowed)
    }
}

/// Point-in-time view of one limiter state, for stats and admin inspection.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
pub struct StateSnapshot {
    pub category: String,
    pub identifier: String,
    /// Main plus burst tokens, if a token bucket exists.
    pub available_tokens: Option<f64>,
    pub leak_level: Option<f64>,
    pub ledger_entries: usize,
    pub ledger_total: u64,
    pub daily_entries: usize,
    pub hourly_entries: usize,
    pub last_touched: DateTime<Utc>,
}

/// The primitives backing one `(category, identifier)` pair.
///
/// Token and leaky buckets are built from the first rule that needs them and
/// keep those parameters for the life of the state.
#[derive(Debug, Clone)]
pub struct LimiterState {
    token_bucket: Option<TokenBucket>,
    leaky_bucket: Option<LeakyBucket>,
    calendar: CalendarWindowCounter,
    ledger: CostWindowLedger,
    last_touched_ms: u64,
}

impl LimiterState {
    pub fn new(now_ms: u64) -> Self {
        Self {
            token_bucket: None,
            leaky_bucket: None,
            calendar: CalendarWindowCounter::new(),
            ledger: CostWindowLedger::new(),
            last_touched_ms: now_ms,
        }
    }

    pub fn touch(&mut self, now_ms: u64) {
        self.last_touched_ms = self.last_touched_ms.max(now_ms);
    }

    pub fn last_touched_ms(&self) -> u64 {
        self.last_touched_ms
    }

    /// True if untouched for longer than `idle_ms` as of `now_ms`.
    pub fn is_idle(&self, now_ms: u64, idle_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_touched_ms) > idle_ms
    }

    pub fn token_bucket(&self) -> Option<&TokenBucket> {
        self.token_bucket.as_ref()
    }

    pub fn leaky_bucket(&self) -> Option<&LeakyBucket> {
        self.leaky_bucket.as_ref()
    }

    pub fn calendar(&self) -> &CalendarWindowCounter {
        &self.calendar
    }

    pub fn ledger(&self) -> &CostWindowLedger {
        &self.ledger
    }

    /// Evaluate every rule in order; no rule is skipped after a failure so
    /// each primitive keeps accurate refill/leak accounting.
    pub fn evaluate(&mut self, rules: &[Rule], now_ms: u64, cost: Cost) -> Evaluation {
        self.touch(now_ms);
        let mut evaluation = Evaluation { outcomes: Vec::with_capacity(rules.len()), retry_after_secs: 0 };
        for rule in rules {
            let outcome = match rule {
                Rule::TokenPerMinute(r) => self.eval_token(r, now_ms, cost),
                Rule::LeakPerWindow(r) => self.eval_leak(r, now_ms, cost),
                Rule::CalendarDaily(r) => {
                    self.eval_calendar(r, RuleKind::CalendarDaily, Granularity::Daily, now_ms, cost)
                }
                Rule::CalendarHourly(r) => {
                    self.eval_calendar(r, RuleKind::CalendarHourly, Granularity::Hourly, now_ms, cost)
                }
                Rule::CostPerMinute(r) => self.eval_cost(r, now_ms, cost),
            };
            if !outcome.allowed {
                evaluation.retry_after_secs =
                    evaluation.retry_after_secs.max(outcome.retry_after_secs);
            }
            evaluation.outcomes.push(outcome);
        }
        evaluation
    }

    fn eval_token(&mut self, rule: &TokenRule, now_ms: u64, cost: Cost) -> RuleOutcome {
        let bucket = self.token_bucket.get_or_insert_with(|| {
            TokenBucket::new(rule.limit as f64, rule.refill_per_sec(), now_ms)
                .with_burst(rule.burst as f64)
        });
        if bucket.reconfigure(rule.limit as f64, rule.burst as f64, rule.refill_per_sec(), now_ms) {
            debug!(target: "turnstile::engine", limit = rule.limit, burst = rule.burst, "token bucket resized");
        }
        let tokens = cost.weight() * rule.cost_multiplier;
        let allowed = bucket.try_consume(tokens, now_ms);
        let retry_after_secs = if allowed {
            0
        } else if !bucket.can_hold(tokens) {
            oversized(RuleKind::TokenPerMinute, tokens, rule.window_secs)
        } else {
            bucket.time_until_available(tokens, now_ms)
        };
        let usage = whole_units(rule.limit as f64 - bucket.total_available()).min(rule.limit);
        RuleOutcome {
            kind: RuleKind::TokenPerMinute,
            allowed,
            usage,
            limit: rule.limit,
            retry_after_secs,
            resets_at_ms: after_secs(now_ms, bucket.time_until_full()),
        }
    }

    fn eval_leak(&mut self, rule: &LeakRule, now_ms: u64, cost: Cost) -> RuleOutcome {
        let bucket = self
            .leaky_bucket
            .get_or_insert_with(|| LeakyBucket::new(rule.limit as f64, rule.leak_per_sec(), now_ms));
        if bucket.reconfigure(rule.limit as f64, rule.leak_per_sec(), now_ms) {
            debug!(target: "turnstile::engine", limit = rule.limit, "leaky bucket resized");
        }
        let weight = cost.weight() * rule.cost_multiplier;
        let allowed = bucket.try_add(weight, now_ms);
        let retry_after_secs = if allowed {
            0
        } else if !bucket.can_hold(weight) {
            oversized(RuleKind::LeakPerWindow, weight, rule.window_secs)
        } else {
            bucket.time_until_capacity(weight, now_ms)
        };
        RuleOutcome {
            kind: RuleKind::LeakPerWindow,
            allowed,
            usage: whole_units(bucket.level()).min(rule.limit),
            limit: rule.limit,
            retry_after_secs,
            resets_at_ms: after_secs(now_ms, bucket.time_until_empty()),
        }
    }

    fn eval_calendar(
        &mut self,
        rule: &CalendarRule,
        kind: RuleKind,
        granularity: Granularity,
        now_ms: u64,
        cost: Cost,
    ) -> RuleOutcome {
        let amount = whole_units(cost.weight() * rule.cost_multiplier);
        let allowed = self.calendar.try_add(amount, now_ms, granularity, rule.limit);
        let retry_after_secs =
            if allowed { 0 } else { self.calendar.retry_after(now_ms, granularity) };
        let next = granularity.next_bucket_start(to_datetime(now_ms));
        RuleOutcome {
            kind,
            allowed,
            usage: self.calendar.usage(now_ms, granularity),
            limit: rule.limit,
            retry_after_secs,
            resets_at_ms: u64::try_from(next.timestamp_millis()).unwrap_or(now_ms),
        }
    }

    fn eval_cost(&mut self, rule: &CostRule, now_ms: u64, cost: Cost) -> RuleOutcome {
        let units = cost.units().unwrap_or_else(|| whole_units(cost.weight() * rule.cost_multiplier));
        let allowed = self.ledger.try_add(units, now_ms, rule.window_secs, rule.limit);
        let retry_after_secs = if allowed {
            0
        } else {
            self.ledger.retry_after(units, now_ms, rule.window_secs, rule.limit)
        };
        RuleOutcome {
            kind: RuleKind::CostPerMinute,
            allowed,
            usage: self.ledger.total(),
            limit: rule.limit,
            retry_after_secs,
            resets_at_ms: after_secs(
                now_ms,
                self.ledger.time_until_oldest_expires(now_ms, rule.window_secs),
            ),
        }
    }

    /// Return every primitive to its initial, unconsumed state.
    pub fn reset(&mut self, now_ms: u64) {
        if let Some(bucket) = self.token_bucket.as_mut() {
            bucket.reset(now_ms);
        }
        if let Some(bucket) = self.leaky_bucket.as_mut() {
            bucket.reset(now_ms);
        }
        self.calendar.clear();
        self.ledger.clear();
        self.touch(now_ms);
    }

    pub fn snapshot(&self, category: &str, identifier: &str) -> StateSnapshot {
        StateSnapshot {
            category: category.to_string(),
            identifier: identifier.to_string(),
            available_tokens: self.token_bucket.as_ref().map(TokenBucket::total_available),
            leak_level: self.leaky_bucket.as_ref().map(LeakyBucket::level),
            ledger_entries: self.ledger.len(),
            ledger_total: self.ledger.total(),
            daily_entries: self.calendar.entries(Granularity::Daily),
            hourly_entries: self.calendar.entries(Granularity::Hourly),
            last_touched: to_datetime(self.last_touched_ms),
        }
    }
}

/// A request heavier than the rule's whole capacity can never pass; report the
/// full window, as cost windows do.
fn oversized(kind: RuleKind, weight: f64, window_secs: u64) -> u64 {
    debug!(target: "turnstile::engine", rule = %kind, weight, "request exceeds rule capacity");
    window_secs
}

fn after_secs(now_ms: u64, secs: u64) -> u64 {
    now_ms.saturating_add(secs.saturating_mul(1000))
}
