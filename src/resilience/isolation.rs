//! Execution isolation (bulkhead).
//!
//! # Responsibilities
//! - Bound concurrent invocations per pool key
//! - Reject immediately when saturated (never queue)
//! - Release slots through an RAII permit

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::observability::metrics;

/// A bounded concurrency limiter for one pool key.
#[derive(Debug)]
pub struct IsolationPool {
    key: String,
    /// Maximum concurrent invocations, fixed for the pool's lifetime.
    capacity: usize,
    in_flight: AtomicUsize,
    rejected: AtomicU64,
}

/// Point-in-time view of a pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolSnapshot {
    pub key: String,
    pub capacity: usize,
    pub in_flight: usize,
    pub rejected_total: u64,
}

impl IsolationPool {
    pub fn new(key: impl Into<String>, capacity: usize) -> Self {
        Self {
            key: key.into(),
            capacity,
            in_flight: AtomicUsize::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Try to take a slot without waiting.
    pub fn try_acquire(self: &Arc<Self>) -> Option<PoolPermit> {
        let mut prev = self.in_flight.load(Ordering::Relaxed);
        loop {
            if prev >= self.capacity {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                metrics::record_pool_rejection(&self.key);
                return None;
            }
            match self.in_flight.compare_exchange_weak(
                prev,
                prev + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(x) => prev = x,
            }
        }
        metrics::record_pool_in_flight(&self.key, prev + 1);
        Some(PoolPermit {
            pool: Arc::clone(self),
        })
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            key: self.key.clone(),
            capacity: self.capacity,
            in_flight: self.in_flight(),
            rejected_total: self.rejected.load(Ordering::Relaxed),
        }
    }
}

/// A held pool slot. Dropping it releases the slot.
#[derive(Debug)]
pub struct PoolPermit {
    pool: Arc<IsolationPool>,
}

impl PoolPermit {
    pub fn pool(&self) -> &str {
        &self.pool.key
    }
}

impl Drop for PoolPermit {
    fn drop(&mut self) {
        let remaining = self.pool.in_flight.fetch_sub(1, Ordering::AcqRel) - 1;
        metrics::record_pool_in_flight(&self.pool.key, remaining);
    }
}
