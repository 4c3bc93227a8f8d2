//! Collapser handle and batch dispatch.
//!
//! [`Collapser::submit`] appends to the live window and arms its flush on
//! the engine scheduler. A flush runs the batch as an ordinary command, so
//! the batch has its own breaker, pool and fallback, then maps
//! `response[i]` back to the caller of `argument[i]`.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::oneshot;

use crate::collapser::window::{BatchWindow, PendingRequest, Push};
use crate::command::{BoxError, Command, CommandBuilder, CommandError, InvokeError};
use crate::engine::Engine;
use crate::observability::metrics;

/// Builder returned by [`Engine::collapser`].
///
/// The batch runs as a regular command keyed by the collapser key, so it
/// gets its own breaker, pool and fallback.
pub struct CollapserBuilder<A, T> {
    engine: Engine,
    key: String,
    batch: CommandBuilder<Vec<A>, Vec<T>>,
}

impl<A: Send + 'static, T: Send + 'static> CollapserBuilder<A, T> {
    pub(crate) fn new<F, Fut>(engine: Engine, key: String, invoke_batch: F) -> Self
    where
        F: Fn(Vec<A>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<T>, InvokeError>> + Send + 'static,
    {
        let batch = CommandBuilder::new(engine.clone(), key.clone(), invoke_batch);
        Self { engine, key, batch }
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.batch = self.batch.group(group);
        self
    }

    pub fn pool(mut self, pool: impl Into<String>) -> Self {
        self.batch = self.batch.pool(pool);
        self
    }

    /// Fallback for a failed batch. Must return one response per request.
    pub fn fallback<F, Fut>(mut self, fallback: F) -> Self
    where
        F: Fn(CommandError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<T>, BoxError>> + Send + 'static,
    {
        self.batch = self.batch.fallback(fallback);
        self
    }

    pub fn build(self) -> Collapser<A, T> {
        let max_batch_size = self.engine.collapser_properties(&self.key).max_batch_size;
        Collapser {
            inner: Arc::new(CollapserInner {
                window: ArcSwap::from_pointee(BatchWindow::new(0, max_batch_size)),
                next_window: AtomicU64::new(1),
                batch: self.batch.build(),
                engine: self.engine,
                key: self.key,
            }),
        }
    }
}

/// Merges concurrent single-argument requests into batch calls.
///
/// Arguments are handed to the batch function in submission order, and
/// `response[i]` resolves the caller that submitted `argument[i]`. The batch
/// function must preserve that order; only the response count is checked.
pub struct Collapser<A, T> {
    inner: Arc<CollapserInner<A, T>>,
}

impl<A, T> Clone for Collapser<A, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct CollapserInner<A, T> {
    key: String,
    engine: Engine,
    batch: Command<Vec<A>, Vec<T>>,
    window: ArcSwap<BatchWindow<A, T>>,
    next_window: AtomicU64,
}

impl<A: Send + 'static, T: Send + 'static> Collapser<A, T> {
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    /// Requests waiting in the live window.
    pub fn pending(&self) -> usize {
        self.inner.window.load().len()
    }

    /// Queue `argument` for the next batch.
    pub fn submit(&self, argument: A) -> CollapsedFuture<T> {
        let (promise, receiver) = oneshot::channel();
        let mut request = PendingRequest { argument, promise };

        loop {
            let window = self.inner.window.load_full();
            match window.try_push(request) {
                Push::Accepted { len } => {
                    if window.max_batch_size() == Some(len) {
                        let inner = Arc::clone(&self.inner);
                        self.inner
                            .engine
                            .scheduler()
                            .run_now(move || inner.flush(window));
                    } else if len == 1 {
                        let delay = Duration::from_millis(
                            self.inner
                                .engine
                                .collapser_properties(&self.inner.key)
                                .collapsing_delay_ms,
                        );
                        let inner = Arc::clone(&self.inner);
                        self.inner
                            .engine
                            .scheduler()
                            .schedule(delay, move || inner.flush(window));
                    }
                    break;
                }
                Push::Full(returned) => {
                    request = returned;
                    self.inner.detach(&window);
                }
                // Already detached by its flush; the reload sees the fresh one.
                Push::Sealed(returned) => request = returned,
            }
        }

        CollapsedFuture {
            command: self.inner.key.clone(),
            receiver,
        }
    }
}

impl<A: Send + 'static, T: Send + 'static> CollapserInner<A, T> {
    /// Install a fresh window if `stale` is still the live one.
    fn detach(&self, stale: &Arc<BatchWindow<A, T>>) {
        let max_batch_size = self.engine.collapser_properties(&self.key).max_batch_size;
        let fresh = Arc::new(BatchWindow::new(
            self.next_window.fetch_add(1, Ordering::Relaxed),
            max_batch_size,
        ));
        let previous = self.window.compare_and_swap(stale, fresh);
        if Arc::ptr_eq(&*previous, stale) {
            tracing::trace!(collapser = %self.key, window = stale.id(), "Window detached");
        }
    }

    fn flush(self: Arc<Self>, window: Arc<BatchWindow<A, T>>) {
        self.detach(&window);
        let requests = window.seal();
        if requests.is_empty() {
            return;
        }
        tracing::debug!(
            collapser = %self.key,
            window = window.id(),
            size = requests.len(),
            "Dispatching batch"
        );
        let runtime = self.engine.runtime().clone();
        runtime.spawn(async move { self.dispatch(requests).await });
    }

    async fn dispatch(&self, requests: Vec<PendingRequest<A, T>>) {
        let (arguments, promises): (Vec<A>, Vec<_>) = requests
            .into_iter()
            .map(|request| (request.argument, request.promise))
            .unzip();
        let expected = arguments.len();
        metrics::record_batch(&self.key, expected);

        match self.batch.execute(arguments).await {
            Ok(responses) if responses.len() == expected => {
                for (promise, response) in promises.into_iter().zip(responses) {
                    let _ = promise.send(Ok(response));
                }
            }
            Ok(responses) => {
                let error = CommandError::BatchProtocolViolation {
                    command: self.key.clone(),
                    expected,
                    actual: responses.len(),
                };
                tracing::error!(collapser = %self.key, error = %error, "Batch response length mismatch");
                for promise in promises {
                    let _ = promise.send(Err(error.clone()));
                }
            }
            Err(error) => {
                tracing::debug!(collapser = %self.key, error = %error, "Batch failed");
                for promise in promises {
                    let _ = promise.send(Err(error.clone()));
                }
            }
        }
    }
}

impl<A, T> std::fmt::Debug for Collapser<A, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collapser")
            .field("key", &self.inner.key)
            .finish()
    }
}

/// Resolves once the batch holding the request completes.
#[must_use = "the request is still dispatched, but its response is lost if this is dropped"]
#[derive(Debug)]
pub struct CollapsedFuture<T> {
    command: String,
    receiver: oneshot::Receiver<Result<T, CommandError>>,
}

impl<T> Future for CollapsedFuture<T> {
    type Output = Result<T, CommandError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match std::task::ready!(Pin::new(&mut self.receiver).poll(cx)) {
            Ok(result) => Poll::Ready(result),
            // The batch task went away without answering (runtime shutdown).
            Err(_) => Poll::Ready(Err(CommandError::Cancelled {
                command: self.command.clone(),
            })),
        }
    }
}
