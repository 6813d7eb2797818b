//! Request cost and admission decisions.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::clock::to_datetime;
use crate::rule::RuleKind;
use crate::state::RuleOutcome;

/// Weight of one admission check.
///
/// `weight` scales every rule through its cost multiplier; `units` is an
/// explicit magnitude (e.g. estimated generation tokens) charged against
/// cost-window rules instead of the scaled weight.
///
/// Malformed weights never fail a check: non-finite values become `1.0` and
/// negative values become `0.0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cost {
    weight: f64,
    units: Option<u64>,
}

impl Cost {
    /// One request of weight 1 with no explicit cost units.
    pub const UNIT: Cost = Cost { weight: 1.0, units: None };

    pub fn weighted(weight: f64) -> Self {
        let weight = if !weight.is_finite() {
            1.0
        } else if weight < 0.0 {
            0.0
        } else {
            weight
        };
        Self { weight, units: None }
    }

    /// Attach an explicit cost-unit estimate.
    pub fn with_units(mut self, units: u64) -> Self {
        self.units = Some(units);
        self
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn units(&self) -> Option<u64> {
        self.units
    }
}

impl Default for Cost {
    fn default() -> Self {
        Cost::UNIT
    }
}

/// Outcome of [`AdmissionEngine::check`](crate::engine::AdmissionEngine::check).
///
/// Denial is a normal outcome, not an error. Maps are keyed by rule kind and
/// cover every rule of the category, passing or failing.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
pub struct Decision {
    pub allowed: bool,
    /// Largest wait among failing rules; 0 when allowed.
    pub retry_after_secs: u64,
    /// Current consumption per rule after this check.
    pub usage: BTreeMap<RuleKind, u64>,
    pub limits: BTreeMap<RuleKind, u64>,
    /// When each rule's window is fully clear again.
    pub reset_times: BTreeMap<RuleKind, DateTime<Utc>>,
    /// Category the decision was made for.
    pub category: String,
}

impl Decision {
    /// An allow with no rule details (unconfigured or empty category).
    pub fn allow(category: impl Into<String>) -> Self {
        Self {
            allowed: true,
            retry_after_secs: 0,
            usage: BTreeMap::new(),
            limits: BTreeMap::new(),
            reset_times: BTreeMap::new(),
            category: category.into(),
        }
    }

    /// A denial with no rule details.
    pub fn deny(category: impl Into<String>, retry_after_secs: u64) -> Self {
        Self { allowed: false, retry_after_secs: retry_after_secs.max(1), ..Self::allow(category) }
    }

    pub(crate) fn from_outcomes(
        category: &str,
        outcomes: &[RuleOutcome],
        retry_after_secs: u64,
    ) -> Self {
        let mut decision = Self::allow(category);
        for outcome in outcomes {
            decision.allowed &= outcome.allowed;
            decision.usage.insert(outcome.kind, outcome.usage);
            decision.limits.insert(outcome.kind, outcome.limit);
            decision.reset_times.insert(outcome.kind, to_datetime(outcome.resets_at_ms));
        }
        decision.retry_after_secs = if decision.allowed { 0 } else { retry_after_secs.max(1) };
        decision
    }

    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    pub fn retry_after(&self) -> Duration {
        Duration::from_secs(self.retry_after_secs)
    }

    /// The rule with the least headroom left, if any rules were evaluated.
    pub fn binding_rule(&self) -> Option<RuleKind> {
        self.limits
            .iter()
            .min_by_key(|(kind, limit)| {
                let used = self.usage.get(*kind).copied().unwrap_or(0);
                (limit.saturating_sub(used), std::cmp::Reverse(**limit))
            })
            .map(|(kind, _)| *kind)
    }

    /// Headroom of the binding rule.
    pub fn remaining(&self) -> Option<u64> {
        let kind = self.binding_rule()?;
        let limit = self.limits.get(&kind).copied().unwrap_or(0);
        Some(limit.saturating_sub(self.usage.get(&kind).copied().unwrap_or(0)))
    }

    /// Latest reset across all rules.
    pub fn reset_at(&self) -> Option<DateTime<Utc>> {
        self.reset_times.values().max().copied()
    }

    /// Transport-neutral rate-limit headers derived from the binding rule.
    pub fn headers(&self) -> RateLimitHeaders {
        let binding = self.binding_rule();
        let limit = binding.and_then(|k| self.limits.get(&k).copied());
        let reset = binding.and_then(|k| self.reset_times.get(&k).copied());
        RateLimitHeaders {
            retry_after: (!self.allowed).then_some(self.retry_after_secs),
            limit,
            remaining: self.remaining(),
            reset_epoch_secs: reset.map(|r| r.timestamp().max(0) as u64),
        }
    }
}

/// Values for `Retry-After` and `X-RateLimit-*` response headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RateLimitHeaders {
    /// Set only for denials.
    pub retry_after: Option<u64>,
    pub limit: Option<u64>,
    pub remaining: Option<u64>,
    /// Unix seconds at which the binding rule resets.
    pub reset_epoch_secs: Option<u64>,
}

impl RateLimitHeaders {
    /// Header name/value pairs, skipping values that are unknown.
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::with_capacity(4);
        if let Some(v) = self.retry_after {
            pairs.push(("Retry-After", v.to_string()));
        }
        if let Some(v) = self.limit {
            pairs.push(("X-RateLimit-Limit", v.to_string()));
        }
        if let Some(v) = self.remaining {
            pairs.push(("X-RateLimit-Remaining", v.to_string()));
        }
        if let Some(v) = self.reset_epoch_secs {
            pairs.push(("X-RateLimit-Reset", v.to_string()));
        }
        pairs
    }
}
