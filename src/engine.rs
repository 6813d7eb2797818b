//! The admission engine.
//!
//! [`AdmissionEngine`] owns the [`RuleCatalog`] and a registry of
//! [`LimiterState`]s keyed by category and identifier. Each check looks up (or
//! lazily creates) the state for its pair, evaluates every rule of the category
//! against it, and returns a [`Decision`].
//!
//! # Locking
//!
//! - The registry mutex is held only to look up or insert a state and by the
//!   eviction sweep.
//! - Each state has its own mutex, held for the whole rule evaluation, so one
//!   pair's read-modify-write is atomic while distinct pairs run in parallel.
//! - The catalog is read without locking (pointer swap on update).
//!
//! Lock order is always registry → state.
//!
//! # Example
//!
//! ```
//! use turnstile::{AdmissionEngine, Cost};
//! use turnstile::policy;
//!
//! let engine = AdmissionEngine::new();
//! let decision = engine.check("10.0.0.7", policy::OPTIMIZATION);
//! assert!(decision.allowed);
//!
//! let tokens = policy::estimate_generation_tokens(4);
//! let decision =
//!     engine.check_with("user-42", policy::EXPENSIVE_GENERATION, Cost::UNIT.with_units(tokens));
//! assert!(decision.allowed);
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::catalog::RuleCatalog;
use crate::clock::{Clock, SystemClock};
use crate::decision::{Cost, Decision};
use crate::error::{CatalogError, ConfigError};
use crate::rule::Rule;
use crate::state::{LimiterState, StateSnapshot};

const DEFAULT_IDLE_THRESHOLD: Duration = Duration::from_secs(3_600);
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);
const DEFAULT_FAIL_CLOSED_RETRY_SECS: u64 = 60;
const DEFAULT_STATS_SAMPLE: usize = 10;

/// What to do with checks against a category the catalog does not know.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownCategoryPolicy {
    /// Allow the request; a missing policy must not become an outage.
    #[default]
    FailOpen,
    /// Deny the request with the configured retry-after.
    FailClosed,
}

/// Engine tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    idle_threshold: Duration,
    sweep_interval: Duration,
    unknown_category: UnknownCategoryPolicy,
    fail_closed_retry_secs: u64,
    stats_sample: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            idle_threshold: DEFAULT_IDLE_THRESHOLD,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            unknown_category: UnknownCategoryPolicy::FailOpen,
            fail_closed_retry_secs: DEFAULT_FAIL_CLOSED_RETRY_SECS,
            stats_sample: DEFAULT_STATS_SAMPLE,
        }
    }
}

impl EngineConfig {
    /// States untouched for longer than this are evicted.
    pub fn with_idle_threshold(mut self, idle: Duration) -> Self {
        self.idle_threshold = idle;
        self
    }

    /// Period of the background sweep started by [`AdmissionEngine::spawn_eviction`].
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_unknown_category(mut self, policy: UnknownCategoryPolicy) -> Self {
        self.unknown_category = policy;
        self
    }

    /// Retry-after reported when failing closed.
    pub fn with_fail_closed_retry(mut self, retry: Duration) -> Self {
        self.fail_closed_retry_secs = retry.as_secs().max(1);
        self
    }

    /// Maximum number of state snapshots included in [`EngineStats`].
    pub fn with_stats_sample(mut self, sample: usize) -> Self {
        self.stats_sample = sample;
        self
    }

    pub fn idle_threshold(&self) -> Duration {
        self.idle_threshold
    }

    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    pub fn unknown_category(&self) -> UnknownCategoryPolicy {
        self.unknown_category
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.idle_threshold.is_zero() {
            return Err(ConfigError::ZeroIdleThreshold);
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::ZeroSweepInterval);
        }
        Ok(())
    }
}

/// Aggregate engine statistics.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
pub struct EngineStats {
    pub total_checks: u64,
    pub total_denials: u64,
    /// `total_denials / total_checks`, 0 before the first check.
    pub denial_rate: f64,
    pub live_states: usize,
    /// States removed by eviction since startup.
    pub evicted_states: u64,
    pub category_rules: BTreeMap<String, usize>,
    /// Bounded sample of live states, ordered by category then identifier.
    pub sample: Vec<StateSnapshot>,
}

type SharedState = Arc<Mutex<LimiterState>>;
type Registry = HashMap<String, HashMap<String, SharedState>>;

#[derive(Debug, Default)]
struct Counters {
    checks: AtomicU64,
    denials: AtomicU64,
    evicted: AtomicU64,
}

/// Top-level admission orchestrator; share it behind an `Arc`.
#[derive(Debug)]
pub struct AdmissionEngine {
    catalog: RuleCatalog,
    states: Mutex<Registry>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    counters: Counters,
    warned_categories: Mutex<HashSet<String>>,
}

impl Default for AdmissionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl AdmissionEngine {
    /// Engine with the built-in policy table, wall clock and default config.
    pub fn new() -> Self {
        Self::from_parts(RuleCatalog::with_defaults(), Arc::new(SystemClock), EngineConfig::default())
    }

    pub fn builder() -> AdmissionEngineBuilder {
        AdmissionEngineBuilder::default()
    }

    fn from_parts(catalog: RuleCatalog, clock: Arc<dyn Clock>, config: EngineConfig) -> Self {
        Self {
            catalog,
            states: Mutex::new(Registry::new()),
            clock,
            config,
            counters: Counters::default(),
            warned_categories: Mutex::new(HashSet::new()),
        }
    }

    pub fn catalog(&self) -> &RuleCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Check one request of unit weight.
    pub fn check(&self, identifier: &str, category: &str) -> Decision {
        self.check_with(identifier, category, Cost::UNIT)
    }

    /// Check one request of the given cost. Never fails and never blocks on I/O.
    pub fn check_with(&self, identifier: &str, category: &str, cost: Cost) -> Decision {
        self.counters.checks.fetch_add(1, Ordering::Relaxed);

        let Some(rules) = self.catalog.rules(category) else {
            return self.unknown_category(category);
        };
        if rules.is_empty() {
            return Decision::allow(category);
        }

        // Normalize again in case the caller built the cost by hand.
        let cost = match cost.units() {
            Some(units) => Cost::weighted(cost.weight()).with_units(units),
            None => Cost::weighted(cost.weight()),
        };

        let state = self.state_for(category, identifier);
        let now = self.clock.now_millis();
        let evaluation = lock(&state).evaluate(&rules, now, cost);
        let decision =
            Decision::from_outcomes(category, &evaluation.outcomes, evaluation.retry_after_secs);

        if !decision.allowed {
            self.counters.denials.fetch_add(1, Ordering::Relaxed);
            debug!(
                target: "turnstile::engine",
                category = %category,
                identifier = %identifier,
                retry_after_secs = decision.retry_after_secs,
                "request denied"
            );
        }
        decision
    }

    fn unknown_category(&self, category: &str) -> Decision {
        let first_sighting = lock(&self.warned_categories).insert(category.to_string());
        if first_sighting {
            warn!(
                target: "turnstile::engine",
                category = %category,
                policy = ?self.config.unknown_category,
                "no rate limit rules configured for category"
            );
        }
        match self.config.unknown_category {
            UnknownCategoryPolicy::FailOpen => Decision::allow(category),
            UnknownCategoryPolicy::FailClosed => {
                self.counters.denials.fetch_add(1, Ordering::Relaxed);
                Decision::deny(category, self.config.fail_closed_retry_secs)
            }
        }
    }

    /// Look up or create the state for a pair. The registry lock is released
    /// before the caller evaluates.
    fn state_for(&self, category: &str, identifier: &str) -> SharedState {
        let mut registry = lock(&self.states);
        if let Some(state) = registry.get(category).and_then(|m| m.get(identifier)) {
            return state.clone();
        }
        let now = self.clock.now_millis();
        let state = Arc::new(Mutex::new(LimiterState::new(now)));
        registry
            .entry(category.to_string())
            .or_default()
            .insert(identifier.to_string(), state.clone());
        state
    }

    fn existing_state(&self, category: &str, identifier: &str) -> Option<SharedState> {
        lock(&self.states).get(category).and_then(|m| m.get(identifier)).cloned()
    }

    /// Replace the rules of a category. Existing states keep their primitives.
    pub fn set_category_rules(&self, category: &str, rules: Vec<Rule>) -> Result<(), CatalogError> {
        self.catalog.replace(category, rules)?;
        lock(&self.warned_categories).remove(category);
        Ok(())
    }

    /// Drop a category from the catalog; its checks then follow the unknown-category policy.
    pub fn remove_category_rules(&self, category: &str) -> bool {
        self.catalog.remove(category)
    }

    /// Zero every primitive of a pair. False if the category is not configured
    /// or the pair has no state.
    pub fn reset_identifier(&self, identifier: &str, category: &str) -> bool {
        if !self.catalog.contains(category) {
            return false;
        }
        let Some(state) = self.existing_state(category, identifier) else {
            return false;
        };
        lock(&state).reset(self.clock.now_millis());
        info!(target: "turnstile::engine", category = %category, identifier = %identifier, "rate limits reset");
        true
    }

    /// Forget a pair entirely; the next check starts from fresh state.
    /// Returns false if there was nothing to remove.
    pub fn evict_identifier(&self, identifier: &str, category: &str) -> bool {
        let mut registry = lock(&self.states);
        let Some(pairs) = registry.get_mut(category) else {
            return false;
        };
        let removed = pairs.remove(identifier).is_some();
        if pairs.is_empty() {
            registry.remove(category);
        }
        if removed {
            self.counters.evicted.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// Remove states idle past the configured threshold; returns how many.
    ///
    /// A state referenced by an in-flight check is never removed.
    pub fn evict_idle(&self) -> usize {
        let now = self.clock.now_millis();
        let idle_ms = u64::try_from(self.config.idle_threshold.as_millis()).unwrap_or(u64::MAX);
        let mut removed = 0;
        {
            let mut registry = lock(&self.states);
            registry.retain(|_, pairs| {
                pairs.retain(|_, state| {
                    // the registry holds the only reference unless a check is running
                    let keep = Arc::strong_count(state) > 1 || !lock(state).is_idle(now, idle_ms);
                    if !keep {
                        removed += 1;
                    }
                    keep
                });
                !pairs.is_empty()
            });
        }
        if removed > 0 {
            self.counters.evicted.fetch_add(removed as u64, Ordering::Relaxed);
            info!(target: "turnstile::engine", evicted = removed, "evicted idle rate limit states");
        }
        removed
    }

    /// Run [`evict_idle`](Self::evict_idle) every `sweep_interval` on the current
    /// tokio runtime. The task holds only a weak reference and stops once the
    /// engine is dropped.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn spawn_eviction(self: &Arc<Self>) -> EvictionTask {
        let engine: Weak<Self> = Arc::downgrade(self);
        let period = self.config.sweep_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match engine.upgrade() {
                    Some(engine) => {
                        engine.evict_idle();
                    }
                    None => break,
                }
            }
        });
        EvictionTask { handle }
    }

    /// Inspect one pair without touching it.
    pub fn snapshot(&self, identifier: &str, category: &str) -> Option<StateSnapshot> {
        let state = self.existing_state(category, identifier)?;
        let snapshot = lock(&state).snapshot(category, identifier);
        Some(snapshot)
    }

    /// Number of live states.
    pub fn live_states(&self) -> usize {
        lock(&self.states).values().map(HashMap::len).sum()
    }

    pub fn stats(&self) -> EngineStats {
        let total_checks = self.counters.checks.load(Ordering::Relaxed);
        let total_denials = self.counters.denials.load(Ordering::Relaxed);
        let denial_rate =
            if total_checks == 0 { 0.0 } else { total_denials as f64 / total_checks as f64 };

        let (live_states, sampled) = {
            let registry = lock(&self.states);
            let live = registry.values().map(HashMap::len).sum();
            let mut pairs: Vec<(&String, &String, &SharedState)> = registry
                .iter()
                .flat_map(|(c, m)| m.iter().map(move |(i, s)| (c, i, s)))
                .collect();
            pairs.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
            let sampled: Vec<(String, String, SharedState)> = pairs
                .into_iter()
                .take(self.config.stats_sample)
                .map(|(c, i, s)| (c.clone(), i.clone(), s.clone()))
                .collect();
            (live, sampled)
        };
        let sample = sampled
            .iter()
            .map(|(category, identifier, state)| lock(state).snapshot(category, identifier))
            .collect();

        EngineStats {
            total_checks,
            total_denials,
            denial_rate,
            live_states,
            evicted_states: self.counters.evicted.load(Ordering::Relaxed),
            category_rules: self.catalog.rule_counts(),
            sample,
        }
    }
}

/// Builder for [`AdmissionEngine`].
#[derive(Debug, Default)]
pub struct AdmissionEngineBuilder {
    catalog: Option<RuleCatalog>,
    clock: Option<Arc<dyn Clock>>,
    config: EngineConfig,
}

impl AdmissionEngineBuilder {
    /// Use `catalog` instead of the built-in policy table.
    pub fn catalog(mut self, catalog: RuleCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Override the clock (useful for deterministic tests).
    pub fn clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<AdmissionEngine, ConfigError> {
        self.config.validate()?;
        Ok(AdmissionEngine::from_parts(
            self.catalog.unwrap_or_else(RuleCatalog::with_defaults),
            self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            self.config,
        ))
    }
}

/// Handle to the background eviction task; aborts the task when dropped.
#[derive(Debug)]
pub struct EvictionTask {
    handle: tokio::task::JoinHandle<()>,
}

impl EvictionTask {
    /// Stop the sweep.
    pub fn shutdown(self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for EvictionTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Lock a mutex, recovering the data if a previous holder panicked. Every
/// critical section leaves the primitives within their bounds, so a poisoned
/// guard is still usable.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
