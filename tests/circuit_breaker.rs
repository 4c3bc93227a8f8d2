//! Circuit breaker behaviour through the command path.

use std::time::Duration;

use futures_util::future::join_all;
use resilience_engine::config::EngineConfig;
use resilience_engine::resilience::CircuitState;
use resilience_engine::CommandError;

use common::{FakeDependency, Reply};

mod common;

fn tuned(config: &mut EngineConfig) {
    config.defaults.command.request_volume_threshold = 10;
    config.defaults.command.error_threshold_percentage = 50;
    config.defaults.command.sleep_window_ms = 1_000;
}

#[tokio::test(start_paused = true)]
async fn test_stays_closed_below_volume_threshold() {
    // Default volume threshold is 20.
    let engine = common::engine_with(|_| {});
    let dependency = FakeDependency::new(Reply::Fail);
    let command = common::command(&engine, "GetUser", &dependency);

    for i in 0..19 {
        let err = command.execute(format!("u{i}")).await.unwrap_err();
        assert!(matches!(err, CommandError::Failure { .. }));
    }

    assert_eq!(dependency.calls(), 19);
    assert_eq!(engine.circuit_state("GetUser"), CircuitState::Closed);
    assert_eq!(engine.snapshot("GetUser").window.error_percentage(), 100);
}

#[tokio::test(start_paused = true)]
async fn test_opens_on_tenth_request_and_short_circuits() {
    let engine = common::engine_with(tuned);
    let dependency = FakeDependency::new(Reply::Ok);
    dependency.script([Reply::Fail; 6]);
    let command = common::command(&engine, "GetUser", &dependency);

    for i in 0..9 {
        let _ = command.execute(format!("u{i}")).await;
        assert_eq!(engine.circuit_state("GetUser"), CircuitState::Closed, "request {i}");
    }
    command.execute("u9".into()).await.unwrap();
    assert_eq!(engine.circuit_state("GetUser"), CircuitState::Open);

    let err = command.execute("u10".into()).await.unwrap_err();
    assert!(matches!(err, CommandError::ShortCircuited { .. }));
    assert_eq!(dependency.calls(), 10);

    let snap = engine.snapshot("GetUser");
    assert_eq!(snap.window.short_circuited, 1);
    assert_eq!(snap.window.failure, 6);
    assert_eq!(snap.window.success, 4);
}

#[tokio::test(start_paused = true)]
async fn test_short_circuit_uses_fallback() {
    let engine = common::engine_with(tuned);
    let dependency = FakeDependency::new(Reply::Fail);
    let dep = dependency.clone();
    let command = engine
        .command("Search", move |q: String| dep.clone().call(q))
        .fallback_value("cached results".to_string())
        .build();

    for _ in 0..10 {
        assert_eq!(command.execute("rust".into()).await.unwrap(), "cached results");
    }
    assert_eq!(engine.circuit_state("Search"), CircuitState::Open);

    assert_eq!(command.execute("rust".into()).await.unwrap(), "cached results");
    assert_eq!(dependency.calls(), 10);
}

#[tokio::test(start_paused = true)]
async fn test_half_open_admits_a_single_probe() {
    let engine = common::engine_with(tuned);
    let dependency = FakeDependency::new(Reply::Ok);
    dependency.script([Reply::Fail; 10]);
    let command = common::command(&engine, "GetUser", &dependency);

    for _ in 0..10 {
        let _ = command.execute("u".into()).await;
    }
    assert_eq!(engine.circuit_state("GetUser"), CircuitState::Open);

    tokio::time::advance(Duration::from_millis(1_001)).await;
    dependency.script([Reply::Slow(Duration::from_millis(50))]);

    let probe = command.queue("probe".into());
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(engine.circuit_state("GetUser"), CircuitState::HalfOpen);

    let err = command.execute("concurrent".into()).await.unwrap_err();
    assert!(matches!(err, CommandError::ShortCircuited { .. }));

    assert_eq!(probe.await.unwrap(), "reply:probe");
    assert_eq!(engine.circuit_state("GetUser"), CircuitState::Closed);
    assert_eq!(dependency.calls(), 11);

    // Closing resets the window.
    let snap = engine.snapshot("GetUser");
    assert_eq!(snap.window.failure, 0);
    command.execute("after".into()).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_half_open_short_circuits_every_simultaneous_caller() {
    let engine = common::engine_with(tuned);
    let dependency = FakeDependency::new(Reply::Ok);
    dependency.script([Reply::Fail; 10]);
    let command = common::command(&engine, "GetUser", &dependency);

    for _ in 0..10 {
        let _ = command.execute("u".into()).await;
    }
    assert_eq!(engine.circuit_state("GetUser"), CircuitState::Open);

    tokio::time::advance(Duration::from_millis(1_001)).await;
    dependency.script([Reply::Slow(Duration::from_millis(50))]);

    let queued: Vec<_> = (0..50).map(|i| command.queue(format!("caller-{i}"))).collect();
    let results = join_all(queued).await;

    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    let short_circuited = results
        .iter()
        .filter(|r| matches!(r, Err(CommandError::ShortCircuited { .. })))
        .count();
    assert_eq!(succeeded, 1);
    assert_eq!(short_circuited, 49);
    assert_eq!(dependency.calls(), 11);
    assert_eq!(engine.circuit_state("GetUser"), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_failed_probe_reopens_with_fresh_sleep_window() {
    let engine = common::engine_with(tuned);
    let dependency = FakeDependency::new(Reply::Fail);
    let command = common::command(&engine, "GetUser", &dependency);

    for _ in 0..10 {
        let _ = command.execute("u".into()).await;
    }
    tokio::time::advance(Duration::from_millis(1_001)).await;

    let err = command.execute("probe".into()).await.unwrap_err();
    assert!(matches!(err, CommandError::Failure { .. }));
    assert_eq!(engine.circuit_state("GetUser"), CircuitState::Open);
    assert_eq!(dependency.calls(), 11);

    tokio::time::advance(Duration::from_millis(500)).await;
    let err = command.execute("too-early".into()).await.unwrap_err();
    assert!(matches!(err, CommandError::ShortCircuited { .. }));
    assert_eq!(dependency.calls(), 11);

    tokio::time::advance(Duration::from_millis(501)).await;
    let _ = command.execute("second-probe".into()).await;
    assert_eq!(dependency.calls(), 12);
}

#[tokio::test(start_paused = true)]
async fn test_bad_requests_never_open_the_circuit() {
    let engine = common::engine_with(tuned);
    let dependency = FakeDependency::new(Reply::BadRequest);
    let command = common::command(&engine, "Validate", &dependency);

    for _ in 0..30 {
        let err = command.execute("bad".into()).await.unwrap_err();
        assert!(matches!(err, CommandError::BadRequest { .. }));
    }
    assert_eq!(engine.circuit_state("Validate"), CircuitState::Closed);
    assert_eq!(engine.snapshot("Validate").window.bad_request, 30);
}

#[tokio::test(start_paused = true)]
async fn test_forced_states() {
    let engine = common::engine_with(|config| {
        tuned(config);
        config.commands.insert(
            "Forced".into(),
            toml::from_str("force_open = true").unwrap(),
        );
        config.commands.insert(
            "Pinned".into(),
            toml::from_str("force_closed = true").unwrap(),
        );
    });
    let dependency = FakeDependency::new(Reply::Fail);

    let forced = common::command(&engine, "Forced", &dependency);
    let err = forced.execute("x".into()).await.unwrap_err();
    assert!(matches!(err, CommandError::ShortCircuited { .. }));
    assert_eq!(dependency.calls(), 0);

    let pinned = common::command(&engine, "Pinned", &dependency);
    for _ in 0..20 {
        let _ = pinned.execute("x".into()).await;
    }
    assert_eq!(dependency.calls(), 20);
    assert_eq!(engine.circuit_state("Pinned"), CircuitState::Closed);
}
