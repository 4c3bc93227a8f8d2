//! Engine registry.
//!
//! # Responsibilities
//! - Own per-command breakers (with their rolling windows) and per-pool
//!   bulkheads, created lazily on first use and kept for the engine's life
//! - Hold the live configuration behind an `ArcSwap`
//! - Run the collapser scheduler and broadcast shutdown
//! - Serve the metrics read API (`snapshot`, `snapshots`, `pool_snapshots`)

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tokio::runtime::{Handle, TryCurrentError};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::collapser::scheduler::Scheduler;
use crate::collapser::CollapserBuilder;
use crate::command::{CommandBuilder, InvokeError, Outcome};
use crate::config::{
    load_config, CollapserProperties, CommandProperties, ConfigError, EngineConfig,
    PoolProperties,
};
use crate::resilience::{CircuitBreaker, CircuitState, IsolationPool, PoolSnapshot, WindowSnapshot};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine must be created inside a Tokio runtime: {0}")]
    NoRuntime(#[from] TryCurrentError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Health view of one command key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandSnapshot {
    pub key: String,
    pub state: CircuitState,
    #[serde(flatten)]
    pub window: WindowSnapshot,
}

/// Registry shared by every command and collapser built from it.
///
/// Cloning is cheap; all clones share the same state.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: ArcSwap<EngineConfig>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    pools: DashMap<String, Arc<IsolationPool>>,
    scheduler: Scheduler,
    runtime: Handle,
    shutdown: broadcast::Sender<()>,
}

impl Engine {
    /// Create an engine. Must be called from within a Tokio runtime.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let runtime = Handle::try_current()?;
        let (shutdown, _) = broadcast::channel(1);
        let scheduler = Scheduler::spawn(&runtime, shutdown.subscribe());

        tracing::info!(
            commands = config.commands.len(),
            pools = config.pools.len(),
            collapsers = config.collapsers.len(),
            "Engine initialized"
        );

        Ok(Self {
            inner: Arc::new(EngineInner {
                config: ArcSwap::from_pointee(config),
                breakers: DashMap::new(),
                pools: DashMap::new(),
                scheduler,
                runtime,
                shutdown,
            }),
        })
    }

    /// Create an engine from a TOML file.
    pub fn from_path(path: &Path) -> Result<Self, EngineError> {
        Self::new(load_config(path)?)
    }

    pub fn config(&self) -> Arc<EngineConfig> {
        self.inner.config.load_full()
    }

    /// Replace the configuration. Existing breakers and pools keep their
    /// window shape and capacity.
    pub fn update_config(&self, config: EngineConfig) {
        self.inner.config.store(Arc::new(config));
        tracing::info!("Engine configuration updated");
    }

    /// Apply every configuration revision received on `updates`.
    pub fn follow_config_updates(
        &self,
        mut updates: mpsc::UnboundedReceiver<EngineConfig>,
    ) -> JoinHandle<()> {
        let engine = self.clone();
        let mut shutdown = self.shutdown_signal();
        self.inner.runtime.spawn(async move {
            loop {
                tokio::select! {
                    update = updates.recv() => match update {
                        Some(config) => engine.update_config(config),
                        None => break,
                    },
                    _ = shutdown.recv() => break,
                }
            }
        })
    }

    pub fn command_properties(&self, key: &str) -> CommandProperties {
        self.inner.config.load().command(key)
    }

    pub fn pool_properties(&self, key: &str) -> PoolProperties {
        self.inner.config.load().pool(key)
    }

    pub fn collapser_properties(&self, key: &str) -> CollapserProperties {
        self.inner.config.load().collapser(key)
    }

    /// Start building a command around `invoke`.
    pub fn command<A, T, F, Fut>(&self, key: impl Into<String>, invoke: F) -> CommandBuilder<A, T>
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, InvokeError>> + Send + 'static,
        A: Send + 'static,
        T: Send + 'static,
    {
        CommandBuilder::new(self.clone(), key.into(), invoke)
    }

    /// Start building a collapser whose batches are sent to `invoke_batch`.
    pub fn collapser<A, T, F, Fut>(
        &self,
        key: impl Into<String>,
        invoke_batch: F,
    ) -> CollapserBuilder<A, T>
    where
        F: Fn(Vec<A>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<T>, InvokeError>> + Send + 'static,
        A: Send + 'static,
        T: Send + 'static,
    {
        CollapserBuilder::new(self.clone(), key.into(), invoke_batch)
    }

    pub(crate) fn breaker(&self, key: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.inner.breakers.get(key) {
            return Arc::clone(breaker.value());
        }
        self.inner
            .breakers
            .entry(key.to_string())
            .or_insert_with(|| {
                tracing::debug!(command = %key, "Creating circuit breaker");
                Arc::new(CircuitBreaker::new(key, &self.command_properties(key)))
            })
            .clone()
    }

    pub(crate) fn pool(&self, key: &str) -> Arc<IsolationPool> {
        if let Some(pool) = self.inner.pools.get(key) {
            return Arc::clone(pool.value());
        }
        self.inner
            .pools
            .entry(key.to_string())
            .or_insert_with(|| {
                let size = self.pool_properties(key).size;
                tracing::debug!(pool = %key, size, "Creating isolation pool");
                Arc::new(IsolationPool::new(key, size))
            })
            .clone()
    }

    pub(crate) fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    pub(crate) fn runtime(&self) -> &Handle {
        &self.inner.runtime
    }

    /// Record an externally observed outcome for `key`.
    pub fn record(&self, key: &str, outcome: Outcome) {
        self.breaker(key).record(outcome, &self.command_properties(key));
    }

    /// Health of `key`; zero volume if the key was never used.
    pub fn snapshot(&self, key: &str) -> CommandSnapshot {
        self.find_snapshot(key).unwrap_or_else(|| CommandSnapshot {
            key: key.to_string(),
            state: CircuitState::Closed,
            window: WindowSnapshot::default(),
        })
    }

    /// Health of `key` if it has been used.
    pub fn find_snapshot(&self, key: &str) -> Option<CommandSnapshot> {
        self.inner.breakers.get(key).map(|breaker| CommandSnapshot {
            key: key.to_string(),
            state: breaker.state(),
            window: breaker.snapshot(),
        })
    }

    /// Health of every known command key, sorted by key.
    pub fn snapshots(&self) -> Vec<CommandSnapshot> {
        let mut snapshots: Vec<_> = self
            .inner
            .breakers
            .iter()
            .map(|entry| CommandSnapshot {
                key: entry.key().clone(),
                state: entry.value().state(),
                window: entry.value().snapshot(),
            })
            .collect();
        snapshots.sort_by(|a, b| a.key.cmp(&b.key));
        snapshots
    }

    pub fn circuit_state(&self, key: &str) -> CircuitState {
        self.inner
            .breakers
            .get(key)
            .map(|breaker| breaker.state())
            .unwrap_or(CircuitState::Closed)
    }

    pub fn pool_snapshot(&self, key: &str) -> Option<PoolSnapshot> {
        self.inner.pools.get(key).map(|pool| pool.snapshot())
    }

    pub fn pool_snapshots(&self) -> Vec<PoolSnapshot> {
        let mut snapshots: Vec<_> = self
            .inner
            .pools
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect();
        snapshots.sort_by(|a, b| a.key.cmp(&b.key));
        snapshots
    }

    /// Subscribe to the shutdown signal.
    pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.inner.shutdown.subscribe()
    }

    /// Flush pending collapser windows and stop background tasks.
    pub fn shutdown(&self) {
        tracing::info!("Engine shutting down");
        let _ = self.inner.shutdown.send(());
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("breakers", &self.inner.breakers.len())
            .field("pools", &self.inner.pools.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::PoolOverrides;

    #[tokio::test]
    async fn test_lazy_registry() {
        let mut config = EngineConfig::default();
        config.pools.insert("small".into(), PoolOverrides { size: Some(1) });
        let engine = Engine::new(config).unwrap();

        assert!(engine.find_snapshot("cmd").is_none());
        assert_eq!(engine.snapshot("cmd").window.total, 0);

        engine.record("cmd", Outcome::Failure);
        engine.record("cmd", Outcome::Success);
        let snap = engine.find_snapshot("cmd").unwrap();
        assert_eq!(snap.window.total, 2);
        assert_eq!(snap.window.error_count, 1);

        assert_eq!(engine.pool("small").capacity(), 1);
        assert_eq!(engine.pool("other").capacity(), 10);
        assert!(Arc::ptr_eq(&engine.pool("small"), &engine.pool("small")));
        assert_eq!(engine.pool_snapshots().len(), 2);
    }

    #[test]
    fn test_requires_runtime() {
        let err = Engine::new(EngineConfig::default()).unwrap_err();
        assert!(matches!(err, EngineError::NoRuntime(_)));
    }

    #[tokio::test]
    async fn test_config_update_applies_to_new_lookups() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let follower = engine.follow_config_updates(rx);

        let mut config = EngineConfig::default();
        config.defaults.command.timeout_ms = 42;
        tx.send(config).unwrap();
        drop(tx);
        follower.await.unwrap();

        assert_eq!(engine.command_properties("any").timeout_ms, 42);
    }

    #[tokio::test]
    async fn test_snapshot_serializes_flat() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        engine.record("cmd", Outcome::Timeout);
        let json = serde_json::to_value(engine.snapshot("cmd")).unwrap();
        assert_eq!(json["key"], "cmd");
        assert_eq!(json["state"], "closed");
        assert_eq!(json["timeout"], 1);
        assert_eq!(json["total"], 1);
    }
}
