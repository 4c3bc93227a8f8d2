//! Asynchronous execution forms: a spawned future and a single-item stream.
//!
//! # Design Decisions
//! - `CommandStream` owns a `CancellationToken`; cancelling it (or dropping
//!   the stream) abandons the in-flight attempt and yields `Cancelled`
//! - A cancelled attempt is never recorded as an outcome

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::command::error::CommandError;
use crate::command::executor::Command;

fn settle<T>(command: &str, joined: Result<Result<T, CommandError>, JoinError>) -> Result<T, CommandError> {
    match joined {
        Ok(result) => result,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(_) => Err(CommandError::Cancelled {
            command: command.to_string(),
        }),
    }
}

/// Handle to a queued execution.
#[must_use = "a queued command keeps running, but its result is lost if the future is dropped"]
#[derive(Debug)]
pub struct CommandFuture<T> {
    command: String,
    handle: JoinHandle<Result<T, CommandError>>,
}

impl<T> CommandFuture<T> {
    pub(crate) fn new(command: String, handle: JoinHandle<Result<T, CommandError>>) -> Self {
        Self { command, handle }
    }

    /// Abort the execution. Awaiting the future afterwards yields
    /// `Cancelled` unless the result was already produced.
    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl<T> Future for CommandFuture<T> {
    type Output = Result<T, CommandError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let joined = std::task::ready!(Pin::new(&mut self.handle).poll(cx));
        Poll::Ready(settle(&self.command, joined))
    }
}

enum State<A, T> {
    Idle { command: Command<A, T>, argument: A },
    Running(JoinHandle<Result<T, CommandError>>),
    Done,
}

/// Single-subscription stream that yields exactly one result.
pub struct CommandStream<A, T> {
    command: String,
    token: CancellationToken,
    state: State<A, T>,
}

// Only the `JoinHandle` is ever polled, and it is `Unpin`.
impl<A, T> Unpin for CommandStream<A, T> {}

impl<A: Send + 'static, T: Send + 'static> CommandStream<A, T> {
    pub(crate) fn cold(command: Command<A, T>, argument: A) -> Self {
        Self {
            command: command.key().to_string(),
            token: CancellationToken::new(),
            state: State::Idle { command, argument },
        }
    }

    pub(crate) fn hot(command: Command<A, T>, argument: A) -> Self {
        let token = CancellationToken::new();
        let handle = command.spawn_execute(argument, token.clone());
        Self {
            command: command.key().to_string(),
            token,
            state: State::Running(handle),
        }
    }

    /// Whether the execution has started.
    pub fn is_started(&self) -> bool {
        !matches!(self.state, State::Idle { .. })
    }
}

impl<A, T> CommandStream<A, T> {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Token that cancels this stream's execution when triggered.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl<A: Send + 'static, T: Send + 'static> Stream for CommandStream<A, T> {
    type Item = Result<T, CommandError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match std::mem::replace(&mut this.state, State::Done) {
                State::Idle { command, argument } => {
                    if this.token.is_cancelled() {
                        return Poll::Ready(Some(Err(CommandError::Cancelled {
                            command: this.command.clone(),
                        })));
                    }
                    this.state = State::Running(command.spawn_execute(argument, this.token.clone()));
                }
                State::Running(mut handle) => match Pin::new(&mut handle).poll(cx) {
                    Poll::Pending => {
                        this.state = State::Running(handle);
                        return Poll::Pending;
                    }
                    Poll::Ready(joined) => return Poll::Ready(Some(settle(&this.command, joined))),
                },
                State::Done => return Poll::Ready(None),
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self.state {
            State::Done => (0, Some(0)),
            _ => (1, Some(1)),
        }
    }
}

impl<A, T> Drop for CommandStream<A, T> {
    fn drop(&mut self) {
        if matches!(self.state, State::Running(_)) {
            self.token.cancel();
        }
    }
}

impl<A, T> std::fmt::Debug for CommandStream<A, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            State::Idle { .. } => "idle",
            State::Running(_) => "running",
            State::Done => "done",
        };
        f.debug_struct("CommandStream")
            .field("command", &self.command)
            .field("state", &state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::InvokeError;
    use crate::config::EngineConfig;
    use crate::engine::Engine;
    use futures_util::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn counting(engine: &Engine, calls: Arc<AtomicUsize>) -> Command<u32, u32> {
        engine
            .command("stream", move |n: u32| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok::<_, InvokeError>(n * 2)
                }
            })
            .build()
    }

    #[tokio::test(start_paused = true)]
    async fn test_cold_stream_is_lazy() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let command = counting(&engine, calls.clone());

        let mut stream = command.observe(21);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!stream.is_started());

        assert_eq!(stream.next().await.unwrap().unwrap(), 42);
        assert!(stream.next().await.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hot_stream_starts_immediately() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let command = counting(&engine, calls.clone());

        let mut stream = command.observe_eager(5);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(stream.next().await.unwrap().unwrap(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_stream_is_not_recorded() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let command = counting(&engine, Arc::new(AtomicUsize::new(0)));

        let mut stream = command.observe(1);
        let token = stream.cancellation_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token.cancel();
        });

        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(err, CommandError::Cancelled { .. }));
        assert_eq!(engine.snapshot("stream").window.total, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_and_cancel() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let command = counting(&engine, Arc::new(AtomicUsize::new(0)));

        assert_eq!(command.queue(4).await.unwrap(), 8);

        let queued = command.queue(4);
        queued.cancel();
        assert!(matches!(queued.await, Err(CommandError::Cancelled { .. })));
    }
}
