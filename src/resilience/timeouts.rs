//! Deadline enforcement.
//!
//! # Responsibilities
//! - Race an invocation against its deadline
//! - Run worker-isolated invocations on their own task
//! - Abandon (not cancel) an invocation that lost the race
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - A worker task that times out is detached and keeps its pool slot until
//!   the underlying call finishes; a caller that goes away aborts it instead

use std::future::Future;
use std::time::Duration;

use tokio::task::{AbortHandle, JoinError, JoinHandle};
use tokio::time::error::Elapsed;

/// Await `fut`, giving up after `deadline` when one is set.
pub async fn race_deadline<F: Future>(deadline: Option<Duration>, fut: F) -> Result<F::Output, Elapsed> {
    match deadline {
        Some(limit) => tokio::time::timeout(limit, fut).await,
        None => Ok(fut.await),
    }
}

/// An invocation running on its own task.
///
/// Dropping the handle while it is still armed aborts the task; a handle
/// that lost the deadline race is disarmed first so the call is merely
/// abandoned.
pub struct WorkerTask<T> {
    handle: JoinHandle<T>,
    abort: Option<AbortHandle>,
}

impl<T: Send + 'static> WorkerTask<T> {
    pub fn spawn<F>(fut: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        let handle = tokio::spawn(fut);
        let abort = Some(handle.abort_handle());
        Self { handle, abort }
    }

    /// Wait for the task under `deadline`.
    pub async fn join(mut self, deadline: Option<Duration>) -> Result<Result<T, JoinError>, Elapsed> {
        let joined = race_deadline(deadline, &mut self.handle).await;
        // Either finished or abandoned: in both cases nothing left to abort.
        self.abort = None;
        joined
    }
}

impl<T> Drop for WorkerTask<T> {
    fn drop(&mut self) {
        if let Some(abort) = self.abort.take() {
            abort.abort();
        }
    }
}
