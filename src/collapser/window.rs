//! The batch window: requests waiting for the next flush.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;

use crate::command::CommandError;

/// One caller waiting on a batch.
pub(crate) struct PendingRequest<A, T> {
    pub argument: A,
    pub promise: oneshot::Sender<Result<T, CommandError>>,
}

/// Result of appending to a window.
pub(crate) enum Push<A, T> {
    /// Appended; `len` is the window size including this request.
    Accepted { len: usize },
    /// The window hit its size limit; the request is handed back.
    Full(PendingRequest<A, T>),
    /// The window was already taken for dispatch; the request is handed back.
    Sealed(PendingRequest<A, T>),
}

struct Slots<A, T> {
    requests: Vec<PendingRequest<A, T>>,
    sealed: bool,
}

pub(crate) struct BatchWindow<A, T> {
    id: u64,
    max_batch_size: Option<usize>,
    slots: Mutex<Slots<A, T>>,
}

impl<A, T> BatchWindow<A, T> {
    pub fn new(id: u64, max_batch_size: Option<usize>) -> Self {
        Self {
            id,
            max_batch_size,
            slots: Mutex::new(Slots {
                requests: Vec::new(),
                sealed: false,
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn max_batch_size(&self) -> Option<usize> {
        self.max_batch_size
    }

    // A panic while holding the lock cannot leave the slots half-written,
    // so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, Slots<A, T>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn try_push(&self, request: PendingRequest<A, T>) -> Push<A, T> {
        let mut slots = self.lock();
        if slots.sealed {
            return Push::Sealed(request);
        }
        if self
            .max_batch_size
            .is_some_and(|max| slots.requests.len() >= max)
        {
            return Push::Full(request);
        }
        slots.requests.push(request);
        Push::Accepted {
            len: slots.requests.len(),
        }
    }

    /// Close the window and take its requests. Later calls return nothing.
    pub fn seal(&self) -> Vec<PendingRequest<A, T>> {
        let mut slots = self.lock();
        slots.sealed = true;
        std::mem::take(&mut slots.requests)
    }

    pub fn len(&self) -> usize {
        self.lock().requests.len()
    }
}
