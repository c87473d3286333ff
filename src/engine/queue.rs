// src/engine/queue.rs

use std::fmt;
use std::sync::Mutex;

use tokio::sync::Notify;
use tracing::debug;

use crate::types::lock;

struct QueueState<K> {
    /// Fixed priority order; the flag marks a pending key.
    order: Vec<(K, bool)>,
}

/// Awaitable set of pending keys, drained in a fixed priority order.
///
/// Only keys present in the current ordering are accepted. A key is pending
/// at most once; re-adding a pending key has no further effect.
pub struct WorkQueue<K> {
    state: Mutex<QueueState<K>>,
    added: Notify,
}

impl<K: fmt::Debug> fmt::Debug for WorkQueue<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = lock(&self.state);
        f.debug_struct("WorkQueue")
            .field("order", &st.order)
            .finish_non_exhaustive()
    }
}

impl<K> Default for WorkQueue<K> {
    fn default() -> Self {
        Self {
            state: Mutex::new(QueueState { order: Vec::new() }),
            added: Notify::new(),
        }
    }
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + fmt::Debug + Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the ordering. Pending flags of keys that remain are kept;
    /// keys that were dropped from the ordering lose theirs.
    pub fn use_order<I>(&self, keys: I)
    where
        I: IntoIterator<Item = K>,
    {
        let mut st = lock(&self.state);
        let previous = std::mem::take(&mut st.order);
        st.order = keys
            .into_iter()
            .map(|key| {
                let pending = previous.iter().any(|(k, p)| *p && *k == key);
                (key, pending)
            })
            .collect();
    }

    /// Mark `key` as pending and wake one blocked consumer.
    ///
    /// Returns `false` if `key` is not part of the ordering.
    pub fn add(&self, key: K) -> bool {
        {
            let mut st = lock(&self.state);
            let Some(pos) = st.order.iter().position(|(k, _)| *k == key) else {
                debug!(?key, "key not in current ordering; ignoring");
                return false;
            };
            st.order[pos].1 = true;
        }
        self.added.notify_one();
        true
    }

    /// Highest-priority pending key, waiting for one if none is pending.
    ///
    /// Cancel-safe: a key stays pending until the poll that returns it. A
    /// wakeup received by a dropped `next()` passes on to another waiter.
    pub async fn next(&self) -> K {
        loop {
            let notified = self.added.notified();
            tokio::pin!(notified);
            // Register before checking so an `add` in between is not missed.
            notified.as_mut().enable();

            if let Some(key) = take_first_pending(&mut lock(&self.state).order) {
                return key;
            }
            notified.await;
        }
    }

    /// Non-blocking variant of [`next`](Self::next).
    pub fn try_next(&self) -> Option<K> {
        take_first_pending(&mut lock(&self.state).order)
    }

    pub fn has_remaining(&self) -> bool {
        lock(&self.state).order.iter().any(|(_, pending)| *pending)
    }

    /// Pending keys in priority order.
    pub fn remaining(&self) -> Vec<K> {
        lock(&self.state)
            .order
            .iter()
            .filter(|(_, pending)| *pending)
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn order(&self) -> Vec<K> {
        lock(&self.state).order.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn contains(&self, key: &K) -> bool {
        lock(&self.state).order.iter().any(|(k, _)| k == key)
    }
}

fn take_first_pending<K: Clone>(order: &mut [(K, bool)]) -> Option<K> {
    let slot = order.iter_mut().find(|(_, pending)| *pending)?;
    slot.1 = false;
    Some(slot.0.clone())
}
