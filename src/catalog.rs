//! Category → rules mapping with lock-free reads.
//!
//! The whole table is an immutable `HashMap` behind an `ArcSwap`: readers take
//! a cheap snapshot, writers build a new table and swap the pointer. A rule
//! list handed out by [`RuleCatalog::rules`] is never mutated afterwards.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::info;

use crate::error::CatalogError;
use crate::rule::Rule;

type Table = HashMap<String, Arc<[Rule]>>;

/// Policy table shared by every check.
#[derive(Debug)]
pub struct RuleCatalog {
    table: ArcSwap<Table>,
}

impl Default for RuleCatalog {
    fn default() -> Self {
        Self::empty()
    }
}

impl Clone for RuleCatalog {
    fn clone(&self) -> Self {
        Self { table: ArcSwap::new(self.table.load_full()) }
    }
}

impl RuleCatalog {
    /// Catalog with no categories; every check fails open (or closed) by policy.
    pub fn empty() -> Self {
        Self { table: ArcSwap::from_pointee(Table::new()) }
    }

    /// Catalog seeded with the built-in policy table.
    pub fn with_defaults() -> Self {
        let table = crate::policy::default_rules()
            .into_iter()
            .map(|(category, rules)| (category.to_string(), Arc::<[Rule]>::from(rules)))
            .collect::<Table>();
        Self { table: ArcSwap::from_pointee(table) }
    }

    /// Build a catalog from `(category, rules)` pairs, validating each entry.
    pub fn from_entries<I, S>(entries: I) -> Result<Self, CatalogError>
    where
        I: IntoIterator<Item = (S, Vec<Rule>)>,
        S: Into<String>,
    {
        let mut table = Table::new();
        for (category, rules) in entries {
            let category = category.into();
            validate(&category, &rules)?;
            table.insert(category, Arc::from(rules));
        }
        Ok(Self { table: ArcSwap::from_pointee(table) })
    }

    /// Load a policy document of the form
    /// `{"categories": {"admin": [{"kind": "token_per_minute", "limit": 20, "window_secs": 60, "burst": 5}]}}`.
    #[cfg(feature = "config")]
    pub fn from_json(document: &str) -> Result<Self, CatalogError> {
        #[derive(serde::Deserialize)]
        struct PolicyDocument {
            categories: BTreeMap<String, Vec<Rule>>,
        }
        let doc: PolicyDocument = serde_json::from_str(document)?;
        Self::from_entries(doc.categories)
    }

    /// Snapshot of a category's rules, in evaluation order.
    pub fn rules(&self, category: &str) -> Option<Arc<[Rule]>> {
        self.table.load().get(category).cloned()
    }

    pub fn contains(&self, category: &str) -> bool {
        self.table.load().contains_key(category)
    }

    /// Atomically install a new rule list for `category`.
    pub fn replace(&self, category: &str, rules: Vec<Rule>) -> Result<(), CatalogError> {
        validate(category, &rules)?;
        let count = rules.len();
        let rules: Arc<[Rule]> = Arc::from(rules);
        self.table.rcu(|current| {
            let mut next = Table::clone(current);
            next.insert(category.to_string(), rules.clone());
            next
        });
        info!(target: "turnstile::catalog", category = %category, rules = count, "category rules replaced");
        Ok(())
    }

    /// Remove a category; returns false if it was not configured.
    pub fn remove(&self, category: &str) -> bool {
        let previous = self.table.rcu(|current| {
            let mut next = Table::clone(current);
            next.remove(category);
            next
        });
        let removed = previous.contains_key(category);
        if removed {
            info!(target: "turnstile::catalog", category = %category, "category rules removed");
        }
        removed
    }

    /// Configured category names, sorted.
    pub fn categories(&self) -> Vec<String> {
        let mut names: Vec<String> = self.table.load().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of rules per category.
    pub fn rule_counts(&self) -> BTreeMap<String, usize> {
        self.table.load().iter().map(|(k, v)| (k.clone(), v.len())).collect()
    }

    pub fn len(&self) -> usize {
        self.table.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.load().is_empty()
    }
}

fn validate(category: &str, rules: &[Rule]) -> Result<(), CatalogError> {
    if category.trim().is_empty() {
        return Err(CatalogError::EmptyCategory);
    }
    let mut seen = HashSet::with_capacity(rules.len());
    for rule in rules {
        if !seen.insert(rule.kind()) {
            return Err(CatalogError::DuplicateKind {
                category: category.to_string(),
                kind: rule.kind(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy;
    use crate::rule::RuleKind;

    #[test]
    fn defaults_cover_builtin_categories() {
        let catalog = RuleCatalog::with_defaults();
        assert_eq!(
            catalog.categories(),
            vec![
                policy::ADMIN,
                policy::EXPENSIVE_GENERATION,
                policy::FACTOR_REBUILD,
                policy::OPTIMIZATION,
                policy::TASK_TRIGGER,
            ]
        );
        assert_eq!(catalog.rule_counts()[policy::EXPENSIVE_GENERATION], 3);
    }

    #[test]
    fn replace_swaps_without_touching_old_snapshot() {
        let catalog = RuleCatalog::with_defaults();
        let before = catalog.rules(policy::ADMIN).unwrap();
        catalog
            .replace(policy::ADMIN, vec![Rule::calendar_hourly(100).unwrap()])
            .unwrap();
        let after = catalog.rules(policy::ADMIN).unwrap();
        assert_eq!(before[0].kind(), RuleKind::TokenPerMinute);
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].kind(), RuleKind::CalendarHourly);
    }

    #[test]
    fn rejects_duplicate_kinds_and_empty_names() {
        let catalog = RuleCatalog::empty();
        let dup = vec![Rule::calendar_daily(1).unwrap(), Rule::calendar_daily(2).unwrap()];
        assert!(matches!(
            catalog.replace("x", dup),
            Err(CatalogError::DuplicateKind { kind: RuleKind::CalendarDaily, .. })
        ));
        assert!(matches!(catalog.replace("  ", vec![]), Err(CatalogError::EmptyCategory)));
        assert!(catalog.is_empty());
    }

    #[test]
    fn remove_reports_presence() {
        let catalog =
            RuleCatalog::from_entries([("a", vec![Rule::calendar_daily(1).unwrap()])]).unwrap();
        assert!(catalog.contains("a"));
        assert!(catalog.remove("a"));
        assert!(!catalog.remove("a"));
        assert_eq!(catalog.len(), 0);
    }

    #[test]
    fn clone_is_independent() {
        let catalog = RuleCatalog::with_defaults();
        let copy = catalog.clone();
        catalog.remove(policy::ADMIN);
        assert!(copy.contains(policy::ADMIN));
    }
}
