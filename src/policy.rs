//! Built-in policy table.
//!
//! | Category | Rule | Limit | Window | Burst |
//! |---|---|---|---|---|
//! | `expensive-generation` | TokenPerMinute | 5 | 60s | 2 |
//! | `expensive-generation` | LeakPerWindow | 30 | 3600s | |
//! | `expensive-generation` | CostPerMinute (×1000 per request) | 10000 | 60s | |
//! | `optimization` | TokenPerMinute | 10 | 60s | 3 |
//! | `optimization` | LeakPerWindow | 60 | 3600s | |
//! | `admin` | TokenPerMinute | 20 | 60s | 5 |
//! | `factor-rebuild` | LeakPerWindow | 5 | 3600s | |
//! | `factor-rebuild` | CalendarDaily | 20 | 1 day | |
//! | `task-trigger` | TokenPerMinute | 10 | 60s | |
//! | `task-trigger` | LeakPerWindow | 50 | 3600s | |

use crate::rule::{CalendarRule, CostRule, LeakRule, Rule, TokenRule};

/// LLM-backed generation endpoints.
pub const EXPENSIVE_GENERATION: &str = "expensive-generation";
/// Portfolio optimization endpoints.
pub const OPTIMIZATION: &str = "optimization";
/// Administrative endpoints.
pub const ADMIN: &str = "admin";
/// Factor model rebuilds.
pub const FACTOR_REBUILD: &str = "factor-rebuild";
/// Background task triggers.
pub const TASK_TRIGGER: &str = "task-trigger";

/// Estimated generation tokens charged per request when no estimate is supplied.
pub const TOKENS_PER_GENERATION: f64 = 1_000.0;

const BASE_PROMPT_TOKENS: u64 = 500;
const TOKENS_PER_ITEM: u64 = 100;
const MAX_ESTIMATED_TOKENS: u64 = 10_000;

const fn token(limit: u64, window_secs: u64, burst: u64) -> Rule {
    Rule::TokenPerMinute(TokenRule { limit, window_secs, burst, cost_multiplier: 1.0 })
}

const fn leak(limit: u64, window_secs: u64) -> Rule {
    Rule::LeakPerWindow(LeakRule { limit, window_secs, cost_multiplier: 1.0 })
}

/// The default table, in evaluation order per category.
pub fn default_rules() -> Vec<(&'static str, Vec<Rule>)> {
    vec![
        (
            EXPENSIVE_GENERATION,
            vec![
                token(5, 60, 2),
                leak(30, 3_600),
                Rule::CostPerMinute(CostRule {
                    limit: 10_000,
                    window_secs: 60,
                    cost_multiplier: TOKENS_PER_GENERATION,
                }),
            ],
        ),
        (OPTIMIZATION, vec![token(10, 60, 3), leak(60, 3_600)]),
        (ADMIN, vec![token(20, 60, 5)]),
        (
            FACTOR_REBUILD,
            vec![
                leak(5, 3_600),
                Rule::CalendarDaily(CalendarRule { limit: 20, cost_multiplier: 1.0 }),
            ],
        ),
        (TASK_TRIGGER, vec![token(10, 60, 0), leak(50, 3_600)]),
    ]
}

/// Rough generation-token estimate for a request covering `items` selections.
///
/// `500 + 100 × items`, capped at 10 000.
pub fn estimate_generation_tokens(items: usize) -> u64 {
    let items = u64::try_from(items).unwrap_or(u64::MAX);
    BASE_PROMPT_TOKENS
        .saturating_add(items.saturating_mul(TOKENS_PER_ITEM))
        .min(MAX_ESTIMATED_TOKENS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::RuleKind;

    #[test]
    fn default_rules_are_valid_and_unique_per_category() {
        for (category, rules) in default_rules() {
            let kinds: std::collections::HashSet<RuleKind> = rules.iter().map(Rule::kind).collect();
            assert_eq!(kinds.len(), rules.len(), "{category} repeats a rule kind");
            for rule in &rules {
                assert!(rule.limit() > 0 && rule.window_secs() > 0, "{category}: {rule:?}");
            }
        }
    }

    #[test]
    fn expensive_generation_matches_table() {
        let (_, rules) =
            default_rules().into_iter().find(|(c, _)| *c == EXPENSIVE_GENERATION).unwrap();
        assert_eq!(rules[0], Rule::token_per_minute(5, 60, 2).unwrap());
        assert_eq!(rules[1], Rule::leak_per_window(30, 3_600).unwrap());
        assert_eq!(rules[2].limit(), 10_000);
        assert_eq!(rules[2].cost_multiplier(), TOKENS_PER_GENERATION);
    }

    #[test]
    fn token_estimate_is_capped() {
        assert_eq!(estimate_generation_tokens(0), 500);
        assert_eq!(estimate_generation_tokens(6), 1_100);
        assert_eq!(estimate_generation_tokens(1_000), 10_000);
        assert_eq!(estimate_generation_tokens(usize::MAX), 10_000);
    }
}
