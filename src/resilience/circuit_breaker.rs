//! Circuit breaker for dependency protection.
//!
//! # States
//! - Closed: normal operation, calls pass through and are recorded
//! - Open: dependency assumed down, calls short-circuit
//! - Half-Open: one probe call is testing whether the dependency recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: volume >= request_volume_threshold
//!                and error % >= error_threshold_percentage
//! Open → Half-Open: first caller after sleep_window (wins a CAS)
//! Half-Open → Closed: probe succeeds (window reset)
//! Half-Open → Open: probe fails (fresh sleep window)
//! ```
//!
//! # Design Decisions
//! - One breaker per command key, shared by all concurrent executions
//! - State and the probe gate are a single atomic; no lock is taken
//! - Properties are passed on every call so reloaded thresholds apply

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::command::Outcome;
use crate::config::CommandProperties;
use crate::observability::metrics;
use crate::resilience::rolling::{RollingWindow, WindowSnapshot};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(val: u8) -> Self {
        match val {
            0 => CircuitState::Closed,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Open,
        }
    }
}

/// Decision returned by [`CircuitBreaker::allow`].
#[derive(Debug)]
pub enum Admission {
    Pass(BreakerTicket),
    ShortCircuit,
}

/// Per-key circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    key: String,
    state: AtomicU8,
    /// Milliseconds since `origin` when the circuit last opened.
    opened_at_ms: AtomicU64,
    origin: Instant,
    window: RollingWindow,
}

impl CircuitBreaker {
    pub fn new(key: impl Into<String>, props: &CommandProperties) -> Self {
        Self {
            key: key.into(),
            state: AtomicU8::new(CircuitState::Closed as u8),
            opened_at_ms: AtomicU64::new(0),
            origin: Instant::now(),
            window: RollingWindow::new(
                Duration::from_millis(props.rolling_window_ms),
                props.rolling_buckets,
            ),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    pub fn snapshot(&self) -> WindowSnapshot {
        self.window.snapshot()
    }

    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    /// Decide whether a call may proceed.
    ///
    /// At most one caller receives a probe ticket per sleep window.
    pub fn allow(self: &Arc<Self>, props: &CommandProperties) -> Admission {
        if props.force_open {
            return Admission::ShortCircuit;
        }
        if !props.circuit_breaker_enabled || props.force_closed {
            return Admission::Pass(self.ticket(false));
        }

        match self.state() {
            CircuitState::Closed => Admission::Pass(self.ticket(false)),
            CircuitState::HalfOpen => Admission::ShortCircuit,
            CircuitState::Open => {
                let opened_at = self.opened_at_ms.load(Ordering::Acquire);
                if self.now_ms().saturating_sub(opened_at) < props.sleep_window_ms {
                    return Admission::ShortCircuit;
                }
                match self.state.compare_exchange(
                    CircuitState::Open as u8,
                    CircuitState::HalfOpen as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        tracing::info!(command = %self.key, "Circuit half-open, sending probe");
                        metrics::record_circuit_state(&self.key, CircuitState::HalfOpen);
                        Admission::Pass(self.ticket(true))
                    }
                    Err(_) => Admission::ShortCircuit,
                }
            }
        }
    }

    fn ticket(self: &Arc<Self>, probe: bool) -> BreakerTicket {
        BreakerTicket {
            breaker: Arc::clone(self),
            probe,
            settled: false,
        }
    }

    /// Record an outcome that did not go through a ticket
    /// (short-circuits, or callers feeding external results).
    pub fn record(&self, outcome: Outcome, props: &CommandProperties) {
        self.window.record(outcome);
        self.evaluate(props);
    }

    /// Trip the circuit if the window crossed the thresholds.
    fn evaluate(&self, props: &CommandProperties) {
        if !props.circuit_breaker_enabled || props.force_closed {
            return;
        }
        if self.state() != CircuitState::Closed {
            return;
        }
        let snapshot = self.window.snapshot();
        if snapshot.total < props.request_volume_threshold
            || snapshot.error_percentage() < u64::from(props.error_threshold_percentage)
        {
            return;
        }

        // opened_at is published before the state so a reader that sees
        // Open never pairs it with a stale timestamp.
        self.opened_at_ms.store(self.now_ms(), Ordering::Release);
        if self
            .state
            .compare_exchange(
                CircuitState::Closed as u8,
                CircuitState::Open as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            tracing::warn!(
                command = %self.key,
                total = snapshot.total,
                error_percentage = snapshot.error_percentage(),
                "Circuit opened"
            );
            metrics::record_circuit_state(&self.key, CircuitState::Open);
        }
    }

    fn settle_probe(&self, outcome: Outcome) {
        let (next, fresh_window) = match outcome {
            Outcome::Success => (CircuitState::Closed, false),
            // Not a health signal: give the probe slot back without
            // restarting the sleep window.
            Outcome::BadRequest => (CircuitState::Open, false),
            _ => (CircuitState::Open, true),
        };
        if fresh_window {
            self.opened_at_ms.store(self.now_ms(), Ordering::Release);
        }
        if self
            .state
            .compare_exchange(
                CircuitState::HalfOpen as u8,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return;
        }

        match next {
            CircuitState::Closed => {
                self.window.reset();
                tracing::info!(command = %self.key, "Probe succeeded, circuit closed");
            }
            _ => {
                tracing::warn!(command = %self.key, outcome = %outcome, "Probe failed, circuit re-opened");
            }
        }
        metrics::record_circuit_state(&self.key, next);
    }

    /// Abandoned probe: reopen without a fresh sleep window so the next
    /// caller can probe immediately.
    fn release_probe(&self) {
        if self
            .state
            .compare_exchange(
                CircuitState::HalfOpen as u8,
                CircuitState::Open as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            tracing::debug!(command = %self.key, "Probe abandoned");
            metrics::record_circuit_state(&self.key, CircuitState::Open);
        }
    }
}

/// Permission to run one call. Reports the call's outcome back to the
/// breaker; a probe ticket dropped without an outcome releases the probe.
#[derive(Debug)]
pub struct BreakerTicket {
    breaker: Arc<CircuitBreaker>,
    probe: bool,
    settled: bool,
}

impl BreakerTicket {
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn complete(mut self, outcome: Outcome, props: &CommandProperties) {
        self.settled = true;
        self.breaker.window.record(outcome);
        if self.probe {
            self.breaker.settle_probe(outcome);
        } else {
            self.breaker.evaluate(props);
        }
    }
}

impl Drop for BreakerTicket {
    fn drop(&mut self) {
        if self.probe && !self.settled {
            self.breaker.release_probe();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props() -> CommandProperties {
        CommandProperties {
            request_volume_threshold: 10,
            error_threshold_percentage: 50,
            sleep_window_ms: 1_000,
            ..Default::default()
        }
    }

    fn pass(breaker: &Arc<CircuitBreaker>, props: &CommandProperties) -> BreakerTicket {
        match breaker.allow(props) {
            Admission::Pass(ticket) => ticket,
            Admission::ShortCircuit => panic!("expected the call to pass"),
        }
    }

    fn trip(breaker: &Arc<CircuitBreaker>, props: &CommandProperties) {
        for _ in 0..10 {
            pass(breaker, props).complete(Outcome::Failure, props);
        }
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_on_tenth_outcome() {
        let props = props();
        let breaker = Arc::new(CircuitBreaker::new("cmd", &props));

        for _ in 0..6 {
            pass(&breaker, &props).complete(Outcome::Failure, &props);
        }
        for _ in 0..3 {
            pass(&breaker, &props).complete(Outcome::Success, &props);
        }
        assert_eq!(breaker.state(), CircuitState::Closed);

        pass(&breaker, &props).complete(Outcome::Success, &props);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(matches!(breaker.allow(&props), Admission::ShortCircuit));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_requests_do_not_trip() {
        let props = props();
        let breaker = Arc::new(CircuitBreaker::new("cmd", &props));
        for _ in 0..50 {
            pass(&breaker, &props).complete(Outcome::BadRequest, &props);
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.snapshot().total, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_probe_after_sleep_window() {
        let props = props();
        let breaker = Arc::new(CircuitBreaker::new("cmd", &props));
        trip(&breaker, &props);

        tokio::time::advance(Duration::from_millis(999)).await;
        assert!(matches!(breaker.allow(&props), Admission::ShortCircuit));

        tokio::time::advance(Duration::from_millis(1)).await;
        let probe = pass(&breaker, &props);
        assert!(probe.is_probe());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(matches!(breaker.allow(&props), Admission::ShortCircuit));

        probe.complete(Outcome::Success, &props);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.snapshot().total, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_probe_restarts_sleep_window() {
        let props = props();
        let breaker = Arc::new(CircuitBreaker::new("cmd", &props));
        trip(&breaker, &props);

        tokio::time::advance(Duration::from_secs(1)).await;
        pass(&breaker, &props).complete(Outcome::Timeout, &props);
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(matches!(breaker.allow(&props), Admission::ShortCircuit));

        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(pass(&breaker, &props).is_probe());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_probe_is_released() {
        let props = props();
        let breaker = Arc::new(CircuitBreaker::new("cmd", &props));
        trip(&breaker, &props);
        tokio::time::advance(Duration::from_secs(1)).await;

        drop(pass(&breaker, &props));
        assert_eq!(breaker.state(), CircuitState::Open);
        // The old opened_at is kept, so the next caller probes right away.
        assert!(pass(&breaker, &props).is_probe());
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_states() {
        let mut props = props();
        let breaker = Arc::new(CircuitBreaker::new("cmd", &props));

        props.force_open = true;
        assert!(matches!(breaker.allow(&props), Admission::ShortCircuit));

        props.force_open = false;
        props.force_closed = true;
        for _ in 0..20 {
            pass(&breaker, &props).complete(Outcome::Failure, &props);
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.snapshot().failure, 20);
    }
}
