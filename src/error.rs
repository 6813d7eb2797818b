//! Error types for rule construction, catalog updates, engine configuration
//! and the admission middleware.
use std::fmt;
use std::time::Duration;

use crate::decision::Decision;
use crate::rule::RuleKind;

/// Rejected rule parameters.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum RuleError {
    /// Every rule needs a positive limit.
    #[error("{kind} rule requires limit > 0")]
    ZeroLimit {
        /// Kind of the offending rule.
        kind: RuleKind,
    },
    /// Rolling windows must be at least one second long.
    #[error("{kind} rule requires window_secs > 0")]
    ZeroWindow {
        /// Kind of the offending rule.
        kind: RuleKind,
    },
    /// Cost multipliers must be finite and non-negative.
    #[error("{kind} rule has invalid cost multiplier {value}")]
    InvalidCostMultiplier {
        /// Kind of the offending rule.
        kind: RuleKind,
        /// Value provided by caller.
        value: f64,
    },
}

/// Rejected catalog updates.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum CatalogError {
    /// Category names must be non-empty.
    #[error("category name must not be empty")]
    EmptyCategory,
    /// Each category holds at most one rule per kind.
    #[error("category '{category}' lists more than one {kind} rule")]
    DuplicateKind {
        /// Category being configured.
        category: String,
        /// Kind that appeared twice.
        kind: RuleKind,
    },
    /// A rule failed validation.
    #[error("invalid rule: {0}")]
    Rule(#[from] RuleError),
    /// The policy document could not be parsed.
    #[cfg(feature = "config")]
    #[error("invalid policy document: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Rejected engine configuration.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// Idle threshold must be > 0.
    #[error("idle_threshold must be > 0")]
    ZeroIdleThreshold,
    /// Sweep interval must be > 0.
    #[error("sweep_interval must be > 0")]
    ZeroSweepInterval,
}

/// Error returned by [`AdmissionService`](crate::middleware::AdmissionService).
#[derive(Debug, Clone)]
pub enum AdmissionError<E> {
    /// The engine denied the request; the decision carries retry and quota details.
    Denied(Box<Decision>),
    /// The wrapped service failed.
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for AdmissionError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Denied(decision) => write!(
                f,
                "admission denied for category '{}'; retry after {}s",
                decision.category, decision.retry_after_secs
            ),
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for AdmissionError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            Self::Denied(_) => None,
        }
    }
}

impl<E> AdmissionError<E> {
    /// Check if this error is an admission denial.
    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Denied(_))
    }
    /// Borrow the denial decision if present.
    pub fn decision(&self) -> Option<&Decision> {
        match self {
            Self::Denied(d) => Some(d),
            Self::Inner(_) => None,
        }
    }
    /// How long the caller must wait, for denials.
    pub fn retry_after(&self) -> Option<Duration> {
        self.decision().map(Decision::retry_after)
    }
    /// Get the inner error if this is an Inner variant
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            Self::Denied(_) => None,
        }
    }
    /// Borrow the inner error if present.
    pub fn as_inner(&self) -> Option<&E> {
        match self {
            Self::Inner(e) => Some(e),
            Self::Denied(_) => None,
        }
    }
}
