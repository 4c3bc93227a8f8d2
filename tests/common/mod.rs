//! Shared fakes for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use resilience_engine::config::EngineConfig;
use resilience_engine::{Command, Engine, InvokeError};

/// What the fake dependency does for one call.
#[derive(Debug, Clone, Copy)]
pub enum Reply {
    /// Echo the argument back, prefixed.
    Ok,
    /// Fail with a dependency error.
    Fail,
    /// Reject the argument as invalid.
    BadRequest,
    /// Wait, then echo.
    Slow(Duration),
    /// Wait, then fail.
    SlowFail(Duration),
}

/// A programmable remote dependency that records how it was called.
#[derive(Debug)]
pub struct FakeDependency {
    script: Mutex<VecDeque<Reply>>,
    fallback_reply: Reply,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl FakeDependency {
    /// Answers every call with `reply` unless a scripted reply is queued.
    pub fn new(reply: Reply) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            fallback_reply: reply,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        })
    }

    /// Queue replies for the next calls, in order.
    pub fn script(&self, replies: impl IntoIterator<Item = Reply>) {
        self.script.lock().unwrap().extend(replies);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub async fn call(self: Arc<Self>, argument: String) -> Result<String, InvokeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.fallback_reply);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        match reply {
            Reply::Ok => Ok(format!("reply:{argument}")),
            Reply::Fail => Err(InvokeError::failure(format!("dependency failed for {argument}"))),
            Reply::BadRequest => Err(InvokeError::bad_request(format!("invalid argument {argument}"))),
            Reply::Slow(delay) => {
                tokio::time::sleep(delay).await;
                Ok(format!("reply:{argument}"))
            }
            Reply::SlowFail(delay) => {
                tokio::time::sleep(delay).await;
                Err(InvokeError::failure("dependency failed slowly"))
            }
        }
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Engine built from the default config after `tune` adjusts it.
pub fn engine_with(tune: impl FnOnce(&mut EngineConfig)) -> Engine {
    let mut config = EngineConfig::default();
    tune(&mut config);
    Engine::new(config).unwrap()
}

/// A command that forwards to `dependency`.
pub fn command(engine: &Engine, key: &str, dependency: &Arc<FakeDependency>) -> Command<String, String> {
    let dependency = Arc::clone(dependency);
    engine
        .command(key, move |argument: String| Arc::clone(&dependency).call(argument))
        .build()
}
