use std::sync::Arc;
use std::time::Duration;
use turnstile::{AdmissionEngine, EngineConfig, ManualClock};
use turnstile::policy;

const SWEEP: Duration = Duration::from_secs(300);

fn engine(clock: &ManualClock) -> Arc<AdmissionEngine> {
    Arc::new(
        AdmissionEngine::builder()
            .clock(clock.clone())
            .config(
                EngineConfig::default()
                    .with_idle_threshold(Duration::from_secs(3_600))
                    .with_sweep_interval(SWEEP),
            )
            .build()
            .unwrap(),
    )
}

async fn next_sweep() {
    tokio::time::sleep(SWEEP + Duration::from_millis(1)).await;
    tokio::task::yield_now().await;
}

#[tokio::test(start_paused = true)]
async fn background_sweep_removes_idle_states() {
    let clock = ManualClock::new(0);
    let engine = engine(&clock);
    let task = engine.spawn_eviction();

    engine.check("idle", policy::ADMIN);
    engine.check("busy", policy::OPTIMIZATION);
    clock.advance(Duration::from_secs(3_000));
    engine.check("busy", policy::OPTIMIZATION);

    next_sweep().await;
    assert_eq!(engine.live_states(), 2, "nothing idle yet");

    clock.advance(Duration::from_secs(601));
    next_sweep().await;
    assert_eq!(engine.live_states(), 1);
    assert!(engine.snapshot("busy", policy::OPTIMIZATION).is_some());
    assert_eq!(engine.stats().evicted_states, 1);

    task.shutdown();
}

#[tokio::test(start_paused = true)]
async fn sweep_stops_when_engine_is_dropped() {
    let clock = ManualClock::new(0);
    let engine = engine(&clock);
    let task = engine.spawn_eviction();
    assert!(!task.is_finished());

    drop(engine);
    next_sweep().await;
    assert!(task.is_finished());
}

#[tokio::test(start_paused = true)]
async fn dropping_the_handle_stops_the_sweep() {
    let clock = ManualClock::new(0);
    let engine = engine(&clock);
    engine.check("idle", policy::ADMIN);
    clock.advance(Duration::from_secs(7_200));

    drop(engine.spawn_eviction());
    next_sweep().await;
    assert_eq!(engine.live_states(), 1, "aborted task never swept");
    assert_eq!(engine.evict_idle(), 1);
}
