//! Throttling rules.
//!
//! A [`Rule`] is one immutable throttling dimension. Each variant carries only
//! the parameters its primitive needs and is evaluated against exactly one
//! primitive of a [`LimiterState`](crate::state::LimiterState):
//!
//! | Variant | Primitive |
//! |---|---|
//! | [`Rule::TokenPerMinute`] | [`TokenBucket`](crate::primitives::TokenBucket) |
//! | [`Rule::LeakPerWindow`] | [`LeakyBucket`](crate::primitives::LeakyBucket) |
//! | [`Rule::CalendarDaily`] / [`Rule::CalendarHourly`] | [`CalendarWindowCounter`](crate::primitives::CalendarWindowCounter) |
//! | [`Rule::CostPerMinute`] | [`CostWindowLedger`](crate::primitives::CostWindowLedger) |

use std::fmt;

use crate::error::RuleError;

/// Discriminant of a [`Rule`]; used as the key of decision maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "config", serde(rename_all = "snake_case"))]
pub enum RuleKind {
    /// Continuous-refill short-window limit.
    TokenPerMinute,
    /// Continuous-leak long-window limit.
    LeakPerWindow,
    /// Quota per UTC calendar day.
    CalendarDaily,
    /// Quota per UTC calendar hour.
    CalendarHourly,
    /// Cost-weighted sliding window.
    CostPerMinute,
}

impl RuleKind {
    /// Stable snake_case name.
    pub fn as_str(self) -> &'static str {
        match self {
            RuleKind::TokenPerMinute => "token_per_minute",
            RuleKind::LeakPerWindow => "leak_per_window",
            RuleKind::CalendarDaily => "calendar_daily",
            RuleKind::CalendarHourly => "calendar_hourly",
            RuleKind::CostPerMinute => "cost_per_minute",
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of a token-bucket rule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenRule {
    pub(crate) limit: u64,
    pub(crate) window_secs: u64,
    pub(crate) burst: u64,
    pub(crate) cost_multiplier: f64,
}

impl TokenRule {
    pub fn limit(&self) -> u64 {
        self.limit
    }
    pub fn window_secs(&self) -> u64 {
        self.window_secs
    }
    /// Extra tokens available for spikes on top of `limit`.
    pub fn burst(&self) -> u64 {
        self.burst
    }
    /// Tokens replenished per second.
    pub fn refill_per_sec(&self) -> f64 {
        self.limit as f64 / self.window_secs as f64
    }
}

/// Parameters of a leaky-bucket rule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LeakRule {
    pub(crate) limit: u64,
    pub(crate) window_secs: u64,
    pub(crate) cost_multiplier: f64,
}

impl LeakRule {
    pub fn limit(&self) -> u64 {
        self.limit
    }
    pub fn window_secs(&self) -> u64 {
        self.window_secs
    }
    /// Load drained per second.
    pub fn leak_per_sec(&self) -> f64 {
        self.limit as f64 / self.window_secs as f64
    }
}

/// Parameters of a calendar quota; the window is implied by the variant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalendarRule {
    pub(crate) limit: u64,
    pub(crate) cost_multiplier: f64,
}

impl CalendarRule {
    pub fn limit(&self) -> u64 {
        self.limit
    }
}

/// Parameters of a cost-weighted sliding window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostRule {
    pub(crate) limit: u64,
    pub(crate) window_secs: u64,
    pub(crate) cost_multiplier: f64,
}

impl CostRule {
    pub fn limit(&self) -> u64 {
        self.limit
    }
    pub fn window_secs(&self) -> u64 {
        self.window_secs
    }
}

/// One throttling dimension of a category.
///
/// Build rules through the validating constructors; a constructed rule always
/// has `limit > 0` and `window_secs > 0`.
///
/// ```
/// use turnstile::rule::{Rule, RuleKind};
///
/// let per_minute = Rule::token_per_minute(5, 60, 2).unwrap();
/// assert_eq!(per_minute.kind(), RuleKind::TokenPerMinute);
///
/// let tokens = Rule::cost_per_minute(10_000, 60)
///     .and_then(|r| r.with_cost_multiplier(1000.0))
///     .unwrap();
/// assert_eq!(tokens.cost_multiplier(), 1000.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "config", serde(try_from = "RuleSpec", into = "RuleSpec"))]
pub enum Rule {
    TokenPerMinute(TokenRule),
    LeakPerWindow(LeakRule),
    CalendarDaily(CalendarRule),
    CalendarHourly(CalendarRule),
    CostPerMinute(CostRule),
}

impl Rule {
    /// Token bucket holding `limit` tokens refilled over `window_secs`, plus `burst`.
    pub fn token_per_minute(limit: u64, window_secs: u64, burst: u64) -> Result<Self, RuleError> {
        check_limit(RuleKind::TokenPerMinute, limit)?;
        check_window(RuleKind::TokenPerMinute, window_secs)?;
        Ok(Rule::TokenPerMinute(TokenRule { limit, window_secs, burst, cost_multiplier: 1.0 }))
    }

    /// Leaky bucket of capacity `limit` draining fully over `window_secs`.
    pub fn leak_per_window(limit: u64, window_secs: u64) -> Result<Self, RuleError> {
        check_limit(RuleKind::LeakPerWindow, limit)?;
        check_window(RuleKind::LeakPerWindow, window_secs)?;
        Ok(Rule::LeakPerWindow(LeakRule { limit, window_secs, cost_multiplier: 1.0 }))
    }

    pub fn calendar_daily(limit: u64) -> Result<Self, RuleError> {
        check_limit(RuleKind::CalendarDaily, limit)?;
        Ok(Rule::CalendarDaily(CalendarRule { limit, cost_multiplier: 1.0 }))
    }

    pub fn calendar_hourly(limit: u64) -> Result<Self, RuleError> {
        check_limit(RuleKind::CalendarHourly, limit)?;
        Ok(Rule::CalendarHourly(CalendarRule { limit, cost_multiplier: 1.0 }))
    }

    /// At most `limit` cost units within any trailing `window_secs`.
    pub fn cost_per_minute(limit: u64, window_secs: u64) -> Result<Self, RuleError> {
        check_limit(RuleKind::CostPerMinute, limit)?;
        check_window(RuleKind::CostPerMinute, window_secs)?;
        Ok(Rule::CostPerMinute(CostRule { limit, window_secs, cost_multiplier: 1.0 }))
    }

    /// Scale the request weight charged against this rule.
    pub fn with_cost_multiplier(mut self, multiplier: f64) -> Result<Self, RuleError> {
        if !multiplier.is_finite() || multiplier < 0.0 {
            return Err(RuleError::InvalidCostMultiplier { kind: self.kind(), value: multiplier });
        }
        match &mut self {
            Rule::TokenPerMinute(r) => r.cost_multiplier = multiplier,
            Rule::LeakPerWindow(r) => r.cost_multiplier = multiplier,
            Rule::CalendarDaily(r) | Rule::CalendarHourly(r) => r.cost_multiplier = multiplier,
            Rule::CostPerMinute(r) => r.cost_multiplier = multiplier,
        }
        Ok(self)
    }

    pub fn kind(&self) -> RuleKind {
        match self {
            Rule::TokenPerMinute(_) => RuleKind::TokenPerMinute,
            Rule::LeakPerWindow(_) => RuleKind::LeakPerWindow,
            Rule::CalendarDaily(_) => RuleKind::CalendarDaily,
            Rule::CalendarHourly(_) => RuleKind::CalendarHourly,
            Rule::CostPerMinute(_) => RuleKind::CostPerMinute,
        }
    }

    pub fn limit(&self) -> u64 {
        match self {
            Rule::TokenPerMinute(r) => r.limit,
            Rule::LeakPerWindow(r) => r.limit,
            Rule::CalendarDaily(r) | Rule::CalendarHourly(r) => r.limit,
            Rule::CostPerMinute(r) => r.limit,
        }
    }

    /// Window length; calendar rules report the length of their bucket.
    pub fn window_secs(&self) -> u64 {
        match self {
            Rule::TokenPerMinute(r) => r.window_secs,
            Rule::LeakPerWindow(r) => r.window_secs,
            Rule::CalendarDaily(_) => 86_400,
            Rule::CalendarHourly(_) => 3_600,
            Rule::CostPerMinute(r) => r.window_secs,
        }
    }

    pub fn burst(&self) -> u64 {
        match self {
            Rule::TokenPerMinute(r) => r.burst,
            _ => 0,
        }
    }

    pub fn cost_multiplier(&self) -> f64 {
        match self {
            Rule::TokenPerMinute(r) => r.cost_multiplier,
            Rule::LeakPerWindow(r) => r.cost_multiplier,
            Rule::CalendarDaily(r) | Rule::CalendarHourly(r) => r.cost_multiplier,
            Rule::CostPerMinute(r) => r.cost_multiplier,
        }
    }
}

fn check_limit(kind: RuleKind, limit: u64) -> Result<(), RuleError> {
    if limit == 0 {
        return Err(RuleError::ZeroLimit { kind });
    }
    Ok(())
}

fn check_window(kind: RuleKind, window_secs: u64) -> Result<(), RuleError> {
    if window_secs == 0 {
        return Err(RuleError::ZeroWindow { kind });
    }
    Ok(())
}

/// Flat wire form of a rule used by policy documents.
#[cfg(feature = "config")]
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct RuleSpec {
    kind: RuleKind,
    limit: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    window_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    burst: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cost_multiplier: Option<f64>,
}

#[cfg(feature = "config")]
impl TryFrom<RuleSpec> for Rule {
    type Error = RuleError;

    fn try_from(spec: RuleSpec) -> Result<Self, Self::Error> {
        let rule = match spec.kind {
            RuleKind::TokenPerMinute => Rule::token_per_minute(
                spec.limit,
                spec.window_secs.unwrap_or(60),
                spec.burst.unwrap_or(0),
            )?,
            RuleKind::LeakPerWindow => {
                Rule::leak_per_window(spec.limit, spec.window_secs.unwrap_or(3_600))?
            }
            RuleKind::CalendarDaily => Rule::calendar_daily(spec.limit)?,
            RuleKind::CalendarHourly => Rule::calendar_hourly(spec.limit)?,
            RuleKind::CostPerMinute => {
                Rule::cost_per_minute(spec.limit, spec.window_secs.unwrap_or(60))?
            }
        };
        match spec.cost_multiplier {
            Some(m) => rule.with_cost_multiplier(m),
            None => Ok(rule),
        }
    }
}

#[cfg(feature = "config")]
impl From<Rule> for RuleSpec {
    fn from(rule: Rule) -> Self {
        let window_secs = match rule {
            Rule::CalendarDaily(_) | Rule::CalendarHourly(_) => None,
            _ => Some(rule.window_secs()),
        };
        let burst = match rule {
            Rule::TokenPerMinute(r) if r.burst > 0 => Some(r.burst),
            _ => None,
        };
        let cost_multiplier = Some(rule.cost_multiplier()).filter(|m| *m != 1.0);
        RuleSpec { kind: rule.kind(), limit: rule.limit(), window_secs, burst, cost_multiplier }
    }
}
