use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tower::{service_fn, Layer, Service, ServiceBuilder, ServiceExt};
use turnstile::{AdmissionEngine, AdmissionLayer, Cost, ManualClock, Rule, RuleCatalog, RuleKind};

#[derive(Debug, Clone)]
struct Request {
    user: &'static str,
    items: u64,
}

fn engine(rules: Vec<Rule>) -> Arc<AdmissionEngine> {
    Arc::new(
        AdmissionEngine::builder()
            .catalog(RuleCatalog::from_entries([("api", rules)]).unwrap())
            .clock(ManualClock::new(0))
            .build()
            .unwrap(),
    )
}

#[tokio::test]
async fn denied_requests_never_reach_the_inner_service() {
    let engine = engine(vec![Rule::token_per_minute(2, 60, 0).unwrap()]);
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let inner = service_fn(move |req: Request| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Infallible>(req.user)
        }
    });
    let mut svc = ServiceBuilder::new()
        .layer(AdmissionLayer::new(engine, "api", |req: &Request| req.user.to_string()))
        .service(inner);

    for _ in 0..2 {
        let reply = svc.ready().await.unwrap().call(Request { user: "ana", items: 1 }).await;
        assert_eq!(reply.unwrap(), "ana");
    }
    let err = svc
        .ready()
        .await
        .unwrap()
        .call(Request { user: "ana", items: 1 })
        .await
        .unwrap_err();
    assert!(err.is_denied());
    let decision = err.decision().unwrap();
    assert_eq!(decision.retry_after_secs, 30);
    assert_eq!(decision.headers().remaining, Some(0));
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // another caller is unaffected
    let reply = svc.ready().await.unwrap().call(Request { user: "ben", items: 1 }).await;
    assert!(reply.is_ok());
}

#[tokio::test]
async fn request_cost_is_charged_against_cost_rules() {
    let engine = engine(vec![Rule::cost_per_minute(1_000, 60).unwrap()]);
    let layer = AdmissionLayer::new(engine.clone(), "api", |req: &Request| req.user.to_string())
        .with_cost(|req: &Request| Cost::UNIT.with_units(req.items * 100));
    let svc = layer.layer(service_fn(|_req: Request| async { Ok::<_, Infallible>(()) }));

    svc.clone().oneshot(Request { user: "ana", items: 6 }).await.unwrap();
    let err = svc.clone().oneshot(Request { user: "ana", items: 5 }).await.unwrap_err();
    assert_eq!(err.decision().unwrap().usage[&RuleKind::CostPerMinute], 600);
    svc.oneshot(Request { user: "ana", items: 4 }).await.unwrap();
    assert_eq!(engine.snapshot("ana", "api").unwrap().ledger_total, 1_000);
}

#[tokio::test]
async fn inner_errors_are_wrapped() {
    let engine = engine(vec![Rule::calendar_daily(10).unwrap()]);
    let svc = AdmissionLayer::new(engine, "api", |req: &Request| req.user.to_string()).layer(
        service_fn(|_req: Request| async {
            Err::<(), _>(std::io::Error::new(std::io::ErrorKind::Other, "backend down"))
        }),
    );
    let err = svc.oneshot(Request { user: "ana", items: 0 }).await.unwrap_err();
    assert!(!err.is_denied());
    assert_eq!(err.to_string(), "backend down");
}
