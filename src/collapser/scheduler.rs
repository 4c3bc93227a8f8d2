//! Single timer task driving every collapser flush.
//!
//! # Data Flow
//! ```text
//! schedule(delay, job) ──mpsc──▶ scheduler task (min-heap by deadline)
//!                                  ├─ deadline reached → run job
//!                                  └─ shutdown → run every queued job, exit
//! ```

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep_until, Instant};

pub(crate) type Job = Box<dyn FnOnce() + Send>;

struct Scheduled {
    deadline: Instant,
    seq: u64,
    job: Job,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

// Reversed: `BinaryHeap` is a max-heap and the earliest job must surface first.
impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        (other.deadline, other.seq).cmp(&(self.deadline, self.seq))
    }
}

/// Handle to the scheduler task.
pub struct Scheduler {
    tx: mpsc::UnboundedSender<Scheduled>,
    seq: AtomicU64,
}

impl Scheduler {
    pub(crate) fn spawn(runtime: &Handle, shutdown: broadcast::Receiver<()>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        runtime.spawn(run(rx, shutdown));
        Self {
            tx,
            seq: AtomicU64::new(0),
        }
    }

    /// Run `job` on the scheduler task once `delay` has passed.
    ///
    /// After the scheduler has stopped the job runs inline on the caller.
    pub(crate) fn schedule(&self, delay: Duration, job: impl FnOnce() + Send + 'static) {
        let scheduled = Scheduled {
            deadline: Instant::now() + delay,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            job: Box::new(job),
        };
        if let Err(mpsc::error::SendError(scheduled)) = self.tx.send(scheduled) {
            tracing::debug!("Scheduler stopped, running job inline");
            (scheduled.job)();
        }
    }

    pub(crate) fn run_now(&self, job: impl FnOnce() + Send + 'static) {
        self.schedule(Duration::ZERO, job);
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("running", &!self.tx.is_closed())
            .finish()
    }
}

async fn run(mut rx: mpsc::UnboundedReceiver<Scheduled>, mut shutdown: broadcast::Receiver<()>) {
    let mut queue = BinaryHeap::new();

    loop {
        let next = queue.peek().map(|scheduled: &Scheduled| scheduled.deadline);
        tokio::select! {
            biased;
            _ = shutdown.recv() => break,
            received = rx.recv() => match received {
                Some(scheduled) => queue.push(scheduled),
                None => break,
            },
            _ = sleep_until(next.unwrap_or_else(Instant::now)), if next.is_some() => {}
        }

        let now = Instant::now();
        while queue.peek().is_some_and(|scheduled| scheduled.deadline <= now) {
            if let Some(scheduled) = queue.pop() {
                (scheduled.job)();
            }
        }
    }

    rx.close();
    while let Ok(scheduled) = rx.try_recv() {
        queue.push(scheduled);
    }
    if !queue.is_empty() {
        tracing::info!(jobs = queue.len(), "Scheduler stopping, running pending jobs now");
    }
    while let Some(scheduled) = queue.pop() {
        (scheduled.job)();
    }
}
