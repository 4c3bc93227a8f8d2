//! Request collapsing end to end.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use resilience_engine::config::EngineConfig;
use resilience_engine::command::BoxError;
use resilience_engine::{CommandError, Engine, InvokeError};

mod common;

fn engine(delay_ms: u64) -> Engine {
    common::engine_with(|config: &mut EngineConfig| {
        config.defaults.collapser.collapsing_delay_ms = delay_ms;
    })
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_requests_collapse_into_one_ordered_batch() {
    let engine = engine(10);
    let batches = Arc::new(Mutex::new(Vec::<Vec<u64>>::new()));
    let seen = batches.clone();
    let collapser = engine
        .collapser("GetProfile", move |ids: Vec<u64>| {
            seen.lock().unwrap().push(ids.clone());
            async move { Ok::<_, InvokeError>(ids.iter().map(|id| id * 10).collect()) }
        })
        .build();

    let callers: Vec<_> = (1..=8u64)
        .map(|id| {
            let collapser = collapser.clone();
            tokio::spawn(async move { (id, collapser.submit(id).await) })
        })
        .collect();

    for caller in callers {
        let (id, result) = caller.await.unwrap();
        assert_eq!(result.unwrap(), id * 10);
    }

    let batches = batches.lock().unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 8);
}

#[tokio::test(start_paused = true)]
async fn test_requests_after_a_flush_start_a_new_window() {
    let engine = engine(10);
    let dispatched = Arc::new(AtomicUsize::new(0));
    let counter = dispatched.clone();
    let collapser = engine
        .collapser("GetProfile", move |ids: Vec<u64>| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, InvokeError>(ids) }
        })
        .build();

    let first = collapser.submit(1);
    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = collapser.submit(2);

    assert_eq!(first.await.unwrap(), 1);
    assert_eq!(second.await.unwrap(), 2);
    assert_eq!(dispatched.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_batch_failure_reaches_every_caller() {
    let engine = engine(10);
    let collapser = engine
        .collapser("GetProfile", |_: Vec<u64>| async {
            Err::<Vec<String>, _>(InvokeError::failure("profile service unavailable"))
        })
        .build();

    let futures: Vec<_> = (0..3).map(|id| collapser.submit(id)).collect();
    for future in futures {
        let err = future.await.unwrap_err();
        assert!(matches!(err, CommandError::Failure { ref command, .. } if command == "GetProfile"));
    }
    assert_eq!(engine.snapshot("GetProfile").window.failure, 1);
}

#[tokio::test(start_paused = true)]
async fn test_batch_fallback_resolves_callers() {
    let engine = engine(10);
    let collapser = engine
        .collapser("GetProfile", |_: Vec<u64>| async {
            Err::<Vec<String>, _>(InvokeError::failure("down"))
        })
        .fallback(|_| async { Ok::<_, BoxError>(vec!["anonymous".to_string(); 2]) })
        .build();

    let a = collapser.submit(1);
    let b = collapser.submit(2);
    assert_eq!(a.await.unwrap(), "anonymous");
    assert_eq!(b.await.unwrap(), "anonymous");
}

#[tokio::test(start_paused = true)]
async fn test_batch_timeout_applies_to_the_whole_batch() {
    let engine = common::engine_with(|config| {
        config.defaults.collapser.collapsing_delay_ms = 10;
        config.defaults.command.timeout_ms = 50;
    });
    let collapser = engine
        .collapser("GetProfile", |ids: Vec<u64>| async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok::<_, InvokeError>(ids)
        })
        .build();

    let a = collapser.submit(1);
    let b = collapser.submit(2);
    assert!(matches!(a.await, Err(CommandError::Timeout { .. })));
    assert!(matches!(b.await, Err(CommandError::Timeout { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_pending_counts_the_live_window() {
    let engine = engine(100);
    let collapser = engine
        .collapser("GetProfile", |ids: Vec<u64>| async move { Ok::<_, InvokeError>(ids) })
        .build();

    assert_eq!(collapser.pending(), 0);
    let a = collapser.submit(1);
    let b = collapser.submit(2);
    assert_eq!(collapser.pending(), 2);

    a.await.unwrap();
    b.await.unwrap();
    assert_eq!(collapser.pending(), 0);
}
