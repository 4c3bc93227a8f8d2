//! Command construction and execution.
//!
//! # Execution Path
//! ```text
//! allow (breaker) ──short-circuit──────────────┐
//!   → try_acquire (pool) ──rejected────────────┤
//!   → invoke under deadline                    │
//!   → classify + record outcome                │
//!   → success ─→ value                         ▼
//!   → anything else ─────────────────→ fallback (if enabled)
//!                                      └─ fails → original error
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cache::RequestScope;
use crate::command::error::{BoxError, CommandError, InvokeError, Outcome};
use crate::command::stream::{CommandFuture, CommandStream};
use crate::config::{CommandProperties, IsolationStrategy};
use crate::engine::Engine;
use crate::observability::metrics;
use crate::resilience::timeouts::{race_deadline, WorkerTask};
use crate::resilience::Admission;

pub type InvokeFn<A, T> =
    Arc<dyn Fn(A) -> BoxFuture<'static, Result<T, InvokeError>> + Send + Sync>;
pub type FallbackFn<T> =
    Arc<dyn Fn(CommandError) -> BoxFuture<'static, Result<T, BoxError>> + Send + Sync>;
pub type CacheKeyFn<A> = Arc<dyn Fn(&A) -> String + Send + Sync>;

/// Builder returned by [`Engine::command`].
pub struct CommandBuilder<A, T> {
    engine: Engine,
    key: String,
    group: Option<String>,
    pool: Option<String>,
    invoke: InvokeFn<A, T>,
    fallback: Option<FallbackFn<T>>,
    cache_key: Option<CacheKeyFn<A>>,
}

impl<A: Send + 'static, T: Send + 'static> CommandBuilder<A, T> {
    pub(crate) fn new<F, Fut>(engine: Engine, key: String, invoke: F) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, InvokeError>> + Send + 'static,
    {
        Self {
            engine,
            key,
            group: None,
            pool: None,
            invoke: Arc::new(move |argument| invoke(argument).boxed()),
            fallback: None,
            cache_key: None,
        }
    }

    /// Group key. Names the isolation pool unless [`Self::pool`] is set.
    /// Defaults to the command key.
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Dedicated pool key, separate from the group.
    pub fn pool(mut self, pool: impl Into<String>) -> Self {
        self.pool = Some(pool.into());
        self
    }

    /// Degraded result computed from the error that caused it.
    pub fn fallback<F, Fut>(mut self, fallback: F) -> Self
    where
        F: Fn(CommandError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
    {
        self.fallback = Some(Arc::new(move |error| fallback(error).boxed()));
        self
    }

    /// Constant degraded result.
    pub fn fallback_value(self, value: T) -> Self
    where
        T: Clone + Sync,
    {
        self.fallback(move |_| {
            let value = value.clone();
            async move { Ok::<T, BoxError>(value) }
        })
    }

    /// Key used by [`Command::execute_in`] to memoize results per scope.
    pub fn cache_key<F>(mut self, cache_key: F) -> Self
    where
        F: Fn(&A) -> String + Send + Sync + 'static,
    {
        self.cache_key = Some(Arc::new(cache_key));
        self
    }

    pub fn build(self) -> Command<A, T> {
        let group = self.group.unwrap_or_else(|| self.key.clone());
        let pool = self.pool.unwrap_or_else(|| group.clone());
        Command {
            engine: self.engine,
            key: self.key.into(),
            group: group.into(),
            pool: pool.into(),
            invoke: self.invoke,
            fallback: self.fallback,
            cache_key: self.cache_key,
        }
    }
}

/// A remote call protected by a breaker, a bulkhead, a deadline and an
/// optional fallback. Cheap to clone.
pub struct Command<A, T> {
    engine: Engine,
    key: Arc<str>,
    group: Arc<str>,
    pool: Arc<str>,
    invoke: InvokeFn<A, T>,
    fallback: Option<FallbackFn<T>>,
    cache_key: Option<CacheKeyFn<A>>,
}

impl<A, T> Clone for Command<A, T> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            key: Arc::clone(&self.key),
            group: Arc::clone(&self.group),
            pool: Arc::clone(&self.pool),
            invoke: Arc::clone(&self.invoke),
            fallback: self.fallback.clone(),
            cache_key: self.cache_key.clone(),
        }
    }
}

impl<A, T> std::fmt::Debug for Command<A, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("key", &self.key)
            .field("group", &self.group)
            .field("pool", &self.pool)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

impl<A: Send + 'static, T: Send + 'static> Command<A, T> {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn pool(&self) -> &str {
        &self.pool
    }

    /// Run the command on the current task.
    pub async fn execute(&self, argument: A) -> Result<T, CommandError> {
        let props = self.engine.command_properties(&self.key);
        let start = Instant::now();

        let result = self.run(argument, &props).await;
        if let Err(err) = &result {
            if let Some(outcome) = err.outcome() {
                metrics::record_execution(&self.key, outcome, start);
            }
        } else {
            metrics::record_execution(&self.key, Outcome::Success, start);
        }

        match result {
            Ok(value) => Ok(value),
            Err(err) => self.recover(err, &props).await,
        }
    }

    /// Run the command through `scope`'s result cache when a cache key is
    /// configured and caching is enabled for this command.
    pub async fn execute_in(&self, scope: &RequestScope, argument: A) -> Result<T, CommandError>
    where
        T: Clone + Sync,
    {
        let cache_key = match &self.cache_key {
            Some(cache_key) if self.engine.command_properties(&self.key).request_cache_enabled => {
                cache_key(&argument)
            }
            _ => return self.execute(argument).await,
        };
        scope
            .get_or_compute(&self.key, &cache_key, || self.execute(argument))
            .await
    }

    /// Drop the cached result for `argument` from `scope`.
    pub fn invalidate(&self, scope: &RequestScope, argument: &A) {
        if let Some(cache_key) = &self.cache_key {
            scope.invalidate(&self.key, &cache_key(argument));
        }
    }

    /// Run the command from synchronous code.
    ///
    /// Blocks the calling thread; must not be called from inside an async
    /// task (use `spawn_blocking` or a plain thread).
    pub fn execute_blocking(&self, argument: A) -> Result<T, CommandError> {
        self.engine.runtime().block_on(self.execute(argument))
    }

    /// Start the command on its own task and return a handle to its result.
    pub fn queue(&self, argument: A) -> CommandFuture<T> {
        let command = self.clone();
        let handle = self
            .engine
            .runtime()
            .spawn(async move { command.execute(argument).await });
        CommandFuture::new(self.key.to_string(), handle)
    }

    /// Cold single-subscription stream: nothing runs until it is first polled.
    pub fn observe(&self, argument: A) -> CommandStream<A, T> {
        CommandStream::cold(self.clone(), argument)
    }

    /// Hot stream: the command starts now and its result is replayed to the
    /// subscriber.
    pub fn observe_eager(&self, argument: A) -> CommandStream<A, T> {
        CommandStream::hot(self.clone(), argument)
    }

    pub(crate) fn spawn_execute(
        &self,
        argument: A,
        token: CancellationToken,
    ) -> JoinHandle<Result<T, CommandError>> {
        let command = self.clone();
        self.engine.runtime().spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!(command = %command.key, "Execution cancelled");
                    Err(CommandError::Cancelled { command: command.key.to_string() })
                }
                result = command.execute(argument) => result,
            }
        })
    }

    async fn run(&self, argument: A, props: &CommandProperties) -> Result<T, CommandError> {
        let breaker = self.engine.breaker(&self.key);
        let ticket = match breaker.allow(props) {
            Admission::Pass(ticket) => ticket,
            Admission::ShortCircuit => {
                tracing::debug!(command = %self.key, "Short-circuited");
                breaker.record(Outcome::ShortCircuited, props);
                return Err(CommandError::ShortCircuited {
                    command: self.key.to_string(),
                });
            }
        };

        let Some(permit) = self.engine.pool(&self.pool).try_acquire() else {
            tracing::debug!(command = %self.key, pool = %self.pool, "Rejected by isolation pool");
            ticket.complete(Outcome::Rejected, props);
            return Err(CommandError::Rejected {
                command: self.key.to_string(),
                pool: self.pool.to_string(),
            });
        };

        let deadline = props
            .execution_timeout_enabled
            .then(|| Duration::from_millis(props.timeout_ms));
        let invocation = (self.invoke)(argument);

        let raced = match props.isolation_strategy {
            IsolationStrategy::Semaphore => {
                let raced = race_deadline(deadline, invocation).await;
                drop(permit);
                raced
            }
            IsolationStrategy::Worker => {
                let task = WorkerTask::spawn(async move {
                    let _permit = permit;
                    invocation.await
                });
                task.join(deadline).await.map(|joined| {
                    joined.unwrap_or_else(|e| Err(InvokeError::failure(format!("worker task failed: {e}"))))
                })
            }
        };

        let (outcome, result) = match raced {
            Ok(Ok(value)) => (Outcome::Success, Ok(value)),
            Ok(Err(error)) => {
                let error = CommandError::from_invoke(&self.key, error);
                tracing::debug!(command = %self.key, error = %error, "Invocation failed");
                (error.outcome().unwrap_or(Outcome::Failure), Err(error))
            }
            Err(_) => {
                tracing::debug!(command = %self.key, timeout_ms = props.timeout_ms, "Invocation timed out");
                (
                    Outcome::Timeout,
                    Err(CommandError::Timeout {
                        command: self.key.to_string(),
                        timeout_ms: props.timeout_ms,
                    }),
                )
            }
        };

        tracing::trace!(command = %self.key, outcome = %outcome, probe = ticket.is_probe(), "Execution finished");
        ticket.complete(outcome, props);
        result
    }

    async fn recover(&self, error: CommandError, props: &CommandProperties) -> Result<T, CommandError> {
        if !error.is_recoverable() || !props.fallback_enabled {
            return Err(error);
        }
        let Some(fallback) = &self.fallback else {
            return Err(error);
        };

        match fallback(error.clone()).await {
            Ok(value) => {
                tracing::debug!(command = %self.key, cause = %error, "Fallback used");
                metrics::record_fallback(&self.key, true);
                Ok(value)
            }
            Err(fallback_error) => {
                tracing::warn!(
                    command = %self.key,
                    cause = %error,
                    fallback_error = %fallback_error,
                    "Fallback failed"
                );
                metrics::record_fallback(&self.key, false);
                Err(error)
            }
        }
    }
}
