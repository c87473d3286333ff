// src/stream/value_stream.rs

use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use tracing::debug;

use crate::types::lock;

use super::follower::{Follower, FollowerShared};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Listener<T> {
    id: u64,
    once: bool,
    callback: Callback<T>,
}

struct StreamState<T> {
    current: Option<T>,
    followers: Vec<(u64, Arc<FollowerShared<T>>)>,
    listeners: Vec<Listener<T>>,
    next_id: u64,
    stopped: bool,
}

pub(super) struct StreamInner<T> {
    name: String,
    state: Mutex<StreamState<T>>,
}

impl<T> StreamInner<T> {
    pub(super) fn remove_follower(&self, id: u64) {
        lock(&self.state).followers.retain(|(fid, _)| *fid != id);
    }
}

/// Registry side of an [`on_next`](ValueStream::on_next) registration.
trait ListenerRegistry: Send + Sync {
    fn remove_listener(&self, id: u64);
}

impl<T: Send> ListenerRegistry for StreamInner<T> {
    fn remove_listener(&self, id: u64) {
        lock(&self.state).listeners.retain(|l| l.id != id);
    }
}

/// Unregister token returned by [`ValueStream::on_next`].
///
/// Dropping the token keeps the callback registered; call
/// [`unsubscribe`](Subscription::unsubscribe) to remove it.
pub struct Subscription {
    id: u64,
    registry: Weak<dyn ListenerRegistry>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Subscription {
    pub fn unsubscribe(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove_listener(self.id);
        }
    }
}

/// Multicast value channel with latest-value replay.
///
/// - One producer calls [`push`](Self::push); any number of [`Follower`]s
///   and callbacks observe the values in push order.
/// - A follower created between pushes `k` and `k+1` first sees value `k`,
///   then `k+1` onward.
/// - [`stop`](Self::stop) ends every follower and drops all callbacks.
///
/// No backpressure: a follower that never consumes buffers without bound.
pub struct ValueStream<T> {
    inner: Arc<StreamInner<T>>,
}

impl<T> Clone for ValueStream<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for ValueStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = lock(&self.inner.state);
        f.debug_struct("ValueStream")
            .field("name", &self.inner.name)
            .field("has_current", &st.current.is_some())
            .field("followers", &st.followers.len())
            .field("stopped", &st.stopped)
            .finish()
    }
}

impl<T: Clone + Send + 'static> ValueStream<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(StreamInner {
                name: name.into(),
                state: Mutex::new(StreamState {
                    current: None,
                    followers: Vec::new(),
                    listeners: Vec::new(),
                    next_id: 0,
                    stopped: false,
                }),
            }),
        }
    }

    /// Stream pre-seeded with a current value.
    pub fn with_value(name: impl Into<String>, value: T) -> Self {
        let stream = Self::new(name);
        stream.push(value);
        stream
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Publish a new value.
    ///
    /// Followers are fed while the stream lock is held so that every follower
    /// observes the same order; callbacks run afterwards, outside the lock.
    pub fn push(&self, value: T) {
        let callbacks: Vec<Callback<T>> = {
            let mut st = lock(&self.inner.state);
            if st.stopped {
                debug!(stream = %self.inner.name, "push after stop; dropping value");
                return;
            }

            st.current = Some(value.clone());
            for (_, follower) in st.followers.iter() {
                follower.push(&self.inner.name, value.clone());
            }

            let callbacks = st.listeners.iter().map(|l| Arc::clone(&l.callback)).collect();
            st.listeners.retain(|l| !l.once);
            callbacks
        };

        for callback in callbacks {
            callback(&value);
        }
    }

    /// New follower fed all future pushes, plus a replay of the current value.
    pub fn subscribe(&self) -> Follower<T> {
        let shared = Arc::new(FollowerShared::new());
        let mut st = lock(&self.inner.state);

        st.next_id += 1;
        let id = st.next_id;

        if let Some(current) = st.current.as_ref() {
            shared.push(&self.inner.name, current.clone());
        }

        if st.stopped {
            shared.finish();
        } else {
            st.followers.push((id, Arc::clone(&shared)));
        }

        Follower::new(id, shared, Arc::downgrade(&self.inner))
    }

    /// Register a callback invoked after every push (or only the next one,
    /// if `once`).
    pub fn on_next<F>(&self, callback: F, once: bool) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let mut st = lock(&self.inner.state);
        st.next_id += 1;
        let id = st.next_id;
        if !st.stopped {
            st.listeners.push(Listener {
                id,
                once,
                callback: Arc::new(callback),
            });
        }
        drop(st);

        let weak = Arc::downgrade(&self.inner);
        let registry: Weak<dyn ListenerRegistry> = weak;
        Subscription { id, registry }
    }

    /// The current value, if any, without waiting.
    pub fn current(&self) -> Option<T> {
        lock(&self.inner.state).current.clone()
    }

    pub fn has_current(&self) -> bool {
        lock(&self.inner.state).current.is_some()
    }

    /// The current value, or the next pushed one if there is none yet.
    ///
    /// Returns `None` if the stream is stopped before any value arrives.
    pub async fn wait_current(&self) -> Option<T> {
        if let Some(value) = self.current() {
            return Some(value);
        }
        self.subscribe().next().await
    }

    /// Stop the stream. Returns `true` only for the call that actually
    /// transitioned it; later calls are no-ops.
    pub fn stop(&self) -> bool {
        let followers = {
            let mut st = lock(&self.inner.state);
            if st.stopped {
                return false;
            }
            st.stopped = true;
            st.listeners.clear();
            std::mem::take(&mut st.followers)
        };

        for (_, follower) in followers {
            follower.finish();
        }

        debug!(stream = %self.inner.name, "stream stopped");
        true
    }

    pub fn is_stopped(&self) -> bool {
        lock(&self.inner.state).stopped
    }

    /// Number of live followers (diagnostics and tests).
    pub fn follower_count(&self) -> usize {
        lock(&self.inner.state).followers.len()
    }
}
