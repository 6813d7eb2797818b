#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # Turnstile
//!
//! In-memory admission control: decide, per request, whether a caller may
//! proceed, based on the endpoint category it hits and what it has consumed
//! recently.
//!
//! ## Features
//!
//! - **Token buckets** with a burst reserve for per-minute limits
//! - **Leaky buckets** for sustained per-hour rates
//! - **Calendar quotas** reset at UTC day and hour boundaries
//! - **Cost windows** for weighted budgets such as generation tokens
//! - **Hot-swappable rule catalog** with a built-in default policy table
//! - **Idle-state eviction** on a background tokio task
//! - **Tower middleware** returning the denial decision as an error
//!
//! A category's rules are all evaluated on every check; the request is admitted
//! only if each of them admits it, and the reported retry-after is the longest
//! wait among the failing ones. Categories with no rules fail open.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use turnstile::{AdmissionEngine, EngineConfig, Rule};
//!
//! #[tokio::main]
//! async fn main() {
//!     let engine = Arc::new(
//!         AdmissionEngine::builder()
//!             .config(EngineConfig::default().with_idle_threshold(Duration::from_secs(600)))
//!             .build()
//!             .unwrap(),
//!     );
//!     let _sweeper = engine.spawn_eviction();
//!
//!     engine
//!         .set_category_rules("exports", vec![Rule::token_per_minute(2, 60, 0).unwrap()])
//!         .unwrap();
//!     assert!(engine.check("alice", "exports").allowed);
//!     assert!(engine.check("alice", "exports").allowed);
//!
//!     let denied = engine.check("alice", "exports");
//!     assert!(!denied.allowed);
//!     assert_eq!(denied.retry_after_secs, 30);
//! }
//! ```

pub mod catalog;
pub mod clock;
pub mod decision;
pub mod engine;
pub mod error;
pub mod middleware;
pub mod policy;
pub mod primitives;
pub mod rule;
pub mod state;

// Re-exports
pub use catalog::RuleCatalog;
pub use clock::{Clock, ManualClock, SystemClock};
pub use decision::{Cost, Decision, RateLimitHeaders};
pub use engine::{
    AdmissionEngine, AdmissionEngineBuilder, EngineConfig, EngineStats, EvictionTask,
    UnknownCategoryPolicy,
};
pub use error::{AdmissionError, CatalogError, ConfigError, RuleError};
pub use middleware::{AdmissionLayer, AdmissionService};
pub use rule::{Rule, RuleKind};
pub use state::{LimiterState, StateSnapshot};
