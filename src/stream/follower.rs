// src/stream/follower.rs

//! Per-consumer cursor over a [`ValueStream`](super::ValueStream).

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::Notify;
use tracing::warn;

use crate::types::lock;

use super::value_stream::StreamInner;

/// Buffer length at which a follower that is not keeping up gets logged.
///
/// Buffers are not capped; this is only a diagnostic.
pub const SLOW_FOLLOWER_WARN_AT: usize = 1024;

/// State shared between a [`Follower`] and the stream feeding it.
///
/// Values stay in `cache` until the consumer takes them; `wake` only
/// signals that there is something to look at.
pub(super) struct FollowerShared<T> {
    state: Mutex<FollowerState<T>>,
    wake: Notify,
}

struct FollowerState<T> {
    cache: VecDeque<T>,
    done: bool,
    warned: bool,
}

impl<T> FollowerShared<T> {
    pub(super) fn new() -> Self {
        Self {
            state: Mutex::new(FollowerState {
                cache: VecDeque::new(),
                done: false,
                warned: false,
            }),
            wake: Notify::new(),
        }
    }

    /// Buffer `value` and wake a blocked consumer.
    pub(super) fn push(&self, stream: &str, value: T) {
        {
            let mut st = lock(&self.state);
            if st.done {
                return;
            }
            st.cache.push_back(value);
            if st.cache.len() >= SLOW_FOLLOWER_WARN_AT && !st.warned {
                st.warned = true;
                warn!(
                    stream = %stream,
                    buffered = st.cache.len(),
                    "follower is not consuming; buffer keeps growing"
                );
            }
        }
        self.wake.notify_one();
    }

    /// Mark as finished; a blocked consumer wakes up with `None` once the
    /// buffer is drained.
    pub(super) fn finish(&self) {
        lock(&self.state).done = true;
        self.wake.notify_one();
    }
}

/// Independent consumption cursor created by [`ValueStream::subscribe`].
///
/// Sees every value pushed after its creation (plus one replay of the value
/// that was current at creation time), in push order. Dropping the follower
/// detaches it from the stream.
///
/// [`ValueStream::subscribe`]: super::ValueStream::subscribe
pub struct Follower<T> {
    id: u64,
    shared: Arc<FollowerShared<T>>,
    stream: Weak<StreamInner<T>>,
}

impl<T> fmt::Debug for Follower<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Follower")
            .field("id", &self.id)
            .field("buffered", &self.buffered())
            .finish_non_exhaustive()
    }
}

impl<T> Follower<T> {
    pub(super) fn new(id: u64, shared: Arc<FollowerShared<T>>, stream: Weak<StreamInner<T>>) -> Self {
        Self { id, shared, stream }
    }

    /// Next value in push order.
    ///
    /// Returns `None` once the stream has been stopped and every buffered
    /// value was consumed. Cancel-safe: a value leaves the buffer only in
    /// the same poll that returns it.
    pub async fn next(&mut self) -> Option<T> {
        loop {
            {
                let mut st = lock(&self.shared.state);
                if let Some(value) = st.cache.pop_front() {
                    return Some(value);
                }
                if st.done {
                    return None;
                }
            }
            // A notification sent between the check and here is kept as a
            // permit, so this cannot miss a push.
            self.shared.wake.notified().await;
        }
    }

    /// Number of values buffered but not yet consumed.
    pub fn buffered(&self) -> usize {
        lock(&self.shared.state).cache.len()
    }
}

impl<T> Drop for Follower<T> {
    fn drop(&mut self) {
        if let Some(stream) = self.stream.upgrade() {
            stream.remove_follower(self.id);
        }
    }
}
