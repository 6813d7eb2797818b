#![cfg(feature = "config")]
use turnstile::{AdmissionEngine, CatalogError, ManualClock, Rule, RuleCatalog, RuleKind};

const DOCUMENT: &str = r#"{
  "categories": {
    "exports": [
      { "kind": "token_per_minute", "limit": 3, "window_secs": 60, "burst": 1 },
      { "kind": "calendar_daily", "limit": 50 }
    ],
    "llm": [
      { "kind": "cost_per_minute", "limit": 5000, "cost_multiplier": 250.0 }
    ]
  }
}"#;

#[test]
fn loads_policy_document() {
    let catalog = RuleCatalog::from_json(DOCUMENT).unwrap();
    assert_eq!(catalog.categories(), vec!["exports", "llm"]);

    let exports = catalog.rules("exports").unwrap();
    assert_eq!(exports[0], Rule::token_per_minute(3, 60, 1).unwrap());
    assert_eq!(exports[1].kind(), RuleKind::CalendarDaily);

    let llm = catalog.rules("llm").unwrap();
    assert_eq!(llm[0].window_secs(), 60, "cost window defaults to a minute");
    assert_eq!(llm[0].cost_multiplier(), 250.0);
}

#[test]
fn loaded_catalog_drives_the_engine() {
    let engine = AdmissionEngine::builder()
        .catalog(RuleCatalog::from_json(DOCUMENT).unwrap())
        .clock(ManualClock::new(0))
        .build()
        .unwrap();
    let admitted = (0..10).filter(|_| engine.check("u", "exports").allowed).count();
    assert_eq!(admitted, 4);
    let admitted = (0..30).filter(|_| engine.check("u", "llm").allowed).count();
    assert_eq!(admitted, 20);
}

#[test]
fn rejects_invalid_documents() {
    let zero = r#"{"categories": {"x": [{"kind": "leak_per_window", "limit": 0}]}}"#;
    assert!(matches!(RuleCatalog::from_json(zero), Err(CatalogError::Parse(_))));

    let dup = r#"{"categories": {"x": [
        {"kind": "calendar_hourly", "limit": 1},
        {"kind": "calendar_hourly", "limit": 2}
    ]}}"#;
    assert!(matches!(RuleCatalog::from_json(dup), Err(CatalogError::DuplicateKind { .. })));

    let unknown = r#"{"categories": {"x": [{"kind": "per_fortnight", "limit": 1}]}}"#;
    assert!(RuleCatalog::from_json(unknown).is_err());
}

#[test]
fn decisions_and_rules_serialize() {
    let rule = Rule::token_per_minute(5, 60, 2).unwrap();
    let json = serde_json::to_value(rule).unwrap();
    assert_eq!(json, serde_json::json!({"kind": "token_per_minute", "limit": 5, "window_secs": 60, "burst": 2}));
    let back: Rule = serde_json::from_value(json).unwrap();
    assert_eq!(back, rule);

    let engine = AdmissionEngine::builder().clock(ManualClock::new(0)).build().unwrap();
    let decision = engine.check("u", "admin");
    let json = serde_json::to_value(&decision).unwrap();
    assert_eq!(json["allowed"], true);
    assert_eq!(json["limits"]["token_per_minute"], 20);
    let stats = serde_json::to_value(engine.stats()).unwrap();
    assert_eq!(stats["total_checks"], 1);
}
