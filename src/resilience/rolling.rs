//! Bucketed rolling window of execution outcomes.
//!
//! The window is a ring of `buckets` slots, each covering `window / buckets`
//! of wall-clock time. A slot is tagged with the time slice it holds; a write
//! into a slot whose tag is stale claims it, clears the counters and retags
//! it. Reads only sum slots whose tag falls inside the live window, so
//! expired buckets drop out without a background sweeper.
//!
//! Writers never wait. One that loses the race to retag a slot counts into
//! it straight away, so an outcome recorded at the instant its slot rolls
//! over can be cleared along with the stale counts.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::command::Outcome;

/// Tag of a slot that holds nothing.
const EMPTY: u64 = 0;
/// Tag held while one writer clears a slot for a new time slice.
const CLAIMED: u64 = u64::MAX;

struct Bucket {
    /// Time slice + 1, or one of the sentinels above.
    tag: AtomicU64,
    counts: [AtomicU64; Outcome::ALL.len()],
}

impl Bucket {
    fn new() -> Self {
        Self {
            tag: AtomicU64::new(EMPTY),
            counts: Default::default(),
        }
    }
}

/// Aggregated counts over the live window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct WindowSnapshot {
    /// Health-relevant requests (everything except bad requests).
    pub total: u64,
    pub error_count: u64,
    /// `error_count / total`, 0.0 when the window is empty.
    pub error_ratio: f64,
    pub success: u64,
    pub failure: u64,
    pub timeout: u64,
    pub rejected: u64,
    pub short_circuited: u64,
    pub bad_request: u64,
}

impl WindowSnapshot {
    /// Error ratio as a whole percentage, rounded down.
    pub fn error_percentage(&self) -> u64 {
        if self.total == 0 {
            0
        } else {
            self.error_count * 100 / self.total
        }
    }

    fn add(&mut self, outcome: Outcome, count: u64) {
        match outcome {
            Outcome::Success => self.success += count,
            Outcome::Failure => self.failure += count,
            Outcome::Timeout => self.timeout += count,
            Outcome::Rejected => self.rejected += count,
            Outcome::ShortCircuited => self.short_circuited += count,
            Outcome::BadRequest => self.bad_request += count,
        }
        if outcome != Outcome::BadRequest {
            self.total += count;
        }
        if outcome.is_error() {
            self.error_count += count;
        }
    }
}

/// Rolling outcome counters for one command key.
pub struct RollingWindow {
    origin: Instant,
    bucket_ms: u64,
    buckets: Box<[Bucket]>,
}

impl RollingWindow {
    /// Create a window of `window` split into `buckets` slices.
    pub fn new(window: Duration, buckets: u32) -> Self {
        let buckets = buckets.max(1);
        let bucket_ms = (window.as_millis() as u64 / u64::from(buckets)).max(1);
        Self {
            origin: Instant::now(),
            bucket_ms,
            buckets: (0..buckets).map(|_| Bucket::new()).collect(),
        }
    }

    fn current_slice(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64 / self.bucket_ms
    }

    /// Count one outcome in the current time slice.
    pub fn record(&self, outcome: Outcome) {
        let slice = self.current_slice();
        let tag = slice + 1;
        let bucket = &self.buckets[(slice % self.buckets.len() as u64) as usize];

        let seen = bucket.tag.load(Ordering::Acquire);
        // CLAIMED: another writer is retagging this slot; count into it
        // without waiting. A newer tag means the clock moved on while we
        // were reading it, and counting into the newer slice is harmless.
        if seen != CLAIMED
            && seen < tag
            && bucket
                .tag
                .compare_exchange(seen, CLAIMED, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            for count in &bucket.counts {
                count.store(0, Ordering::Relaxed);
            }
            bucket.tag.store(tag, Ordering::Release);
        }

        bucket.counts[outcome as usize].fetch_add(1, Ordering::Relaxed);
    }

    /// Sum the buckets that are still inside the window.
    pub fn snapshot(&self) -> WindowSnapshot {
        let newest = self.current_slice() + 1;
        let oldest = (newest + 1).saturating_sub(self.buckets.len() as u64).max(1);

        let mut snapshot = WindowSnapshot::default();
        for bucket in self.buckets.iter() {
            let tag = bucket.tag.load(Ordering::Acquire);
            if tag == EMPTY || tag == CLAIMED || tag < oldest || tag > newest {
                continue;
            }
            for outcome in Outcome::ALL {
                snapshot.add(outcome, bucket.counts[outcome as usize].load(Ordering::Relaxed));
            }
        }
        if snapshot.total > 0 {
            snapshot.error_ratio = snapshot.error_count as f64 / snapshot.total as f64;
        }
        snapshot
    }

    /// Forget everything recorded so far.
    pub fn reset(&self) {
        for bucket in self.buckets.iter() {
            let seen = bucket.tag.load(Ordering::Acquire);
            if seen != CLAIMED {
                // Losing this race only means a concurrent writer already
                // reclaimed the slot for the current slice.
                let _ = bucket.tag.compare_exchange(seen, EMPTY, Ordering::AcqRel, Ordering::Acquire);
            }
        }
    }
}

impl std::fmt::Debug for RollingWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RollingWindow")
            .field("bucket_ms", &self.bucket_ms)
            .field("buckets", &self.buckets.len())
            .finish()
    }
}
