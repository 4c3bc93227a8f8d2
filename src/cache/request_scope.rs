//! The [`RequestScope`] cache itself.
//!
//! Each entry is a `OnceCell` holding a boxed `Result<T, CommandError>`.
//! The first lookup of a key runs the computation; lookups that arrive while
//! it runs wait on the same cell. Bad requests and cancellations are never
//! stored, so a later lookup retries them.

use std::any::Any;
use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::command::{BoxError, CommandError};
use crate::observability::metrics;

type Slot = Arc<OnceCell<Box<dyn Any + Send + Sync>>>;

/// Per-request result cache.
///
/// Entries are keyed by `(command key, cache key)` and live as long as the
/// scope. Concurrent lookups of the same pair share one computation.
pub struct RequestScope {
    id: Uuid,
    entries: DashMap<(String, String), Slot>,
}

impl RequestScope {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            entries: DashMap::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Return the stored result for `(key, argument)` or run `compute` and
    /// store its result.
    ///
    /// Bad requests and cancellations are handed back without being stored,
    /// so the next lookup computes again.
    pub async fn get_or_compute<T, F, Fut>(
        &self,
        key: &str,
        argument: &str,
        compute: F,
    ) -> Result<T, CommandError>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, CommandError>>,
    {
        let slot = self
            .entries
            .entry((key.to_string(), argument.to_string()))
            .or_default()
            .clone();

        if let Some(stored) = slot.get() {
            tracing::trace!(scope = %self.id, command = %key, cache_key = %argument, "Request cache hit");
            metrics::record_cache_hit(key);
            return Self::read(key, &**stored);
        }

        let stored = slot
            .get_or_try_init(|| async move {
                match compute().await {
                    Err(e) if !Self::is_cacheable(&e) => Err(e),
                    result => Ok(Box::new(result) as Box<dyn Any + Send + Sync>),
                }
            })
            .await?;
        Self::read(key, &**stored)
    }

    /// Drop the entry for `(key, argument)`. Missing entries are ignored.
    pub fn invalidate(&self, key: &str, argument: &str) {
        if self
            .entries
            .remove(&(key.to_string(), argument.to_string()))
            .is_some()
        {
            tracing::debug!(scope = %self.id, command = %key, cache_key = %argument, "Request cache entry invalidated");
        }
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    fn is_cacheable(error: &CommandError) -> bool {
        !matches!(
            error,
            CommandError::BadRequest { .. } | CommandError::Cancelled { .. }
        )
    }

    fn read<T: Clone + 'static>(
        key: &str,
        stored: &(dyn Any + Send + Sync),
    ) -> Result<T, CommandError> {
        match stored.downcast_ref::<Result<T, CommandError>>() {
            Some(result) => result.clone(),
            None => {
                let cause: BoxError = format!(
                    "cached entry holds a different type than {}",
                    std::any::type_name::<T>()
                )
                .into();
                Err(CommandError::BadRequest {
                    command: key.to_string(),
                    cause: Arc::from(cause),
                })
            }
        }
    }
}

impl Default for RequestScope {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RequestScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestScope")
            .field("id", &self.id)
            .field("entries", &self.entries.len())
            .finish()
    }
}
