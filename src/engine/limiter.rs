// src/engine/limiter.rs

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Counts one outstanding request (queued or holding a slot) until dropped.
struct Outstanding(Arc<AtomicUsize>);

impl Outstanding {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for Outstanding {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Slot handed out by [`ConcurrencyLimiter::gen_task`].
///
/// The slot is released on [`resolve`](Self::resolve) or when dropped,
/// whichever comes first.
pub struct TaskHandle {
    _permit: OwnedSemaphorePermit,
    _outstanding: Outstanding,
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle").finish_non_exhaustive()
    }
}

impl TaskHandle {
    /// Release the slot.
    pub fn resolve(self) {}
}

/// FIFO limiter bounding how many sessions run at once.
#[derive(Clone)]
pub struct ConcurrencyLimiter {
    capacity: usize,
    semaphore: Arc<Semaphore>,
    outstanding: Arc<AtomicUsize>,
}

impl fmt::Debug for ConcurrencyLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrencyLimiter")
            .field("capacity", &self.capacity)
            .field("active", &self.active())
            .field("size", &self.size())
            .finish()
    }
}

impl ConcurrencyLimiter {
    /// Capacity is clamped to at least 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            semaphore: Arc::new(Semaphore::new(capacity)),
            outstanding: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Wait for a free slot. Waiters are served in request order.
    ///
    /// Returns `None` only after [`close`](Self::close).
    pub async fn gen_task(&self) -> Option<TaskHandle> {
        let outstanding = Outstanding::new(&self.outstanding);
        match Arc::clone(&self.semaphore).acquire_owned().await {
            Ok(permit) => Some(TaskHandle {
                _permit: permit,
                _outstanding: outstanding,
            }),
            Err(_) => {
                debug!("limiter closed; no slot granted");
                None
            }
        }
    }

    /// Refuse all queued and future requests.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently held.
    pub fn active(&self) -> usize {
        self.capacity - self.semaphore.available_permits().min(self.capacity)
    }

    /// Active plus queued requests.
    pub fn size(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// The limiter with the fewest outstanding requests; earliest on ties.
    pub fn least_loaded(limiters: &[ConcurrencyLimiter]) -> Option<&ConcurrencyLimiter> {
        limiters.iter().min_by_key(|l| l.size())
    }
}
