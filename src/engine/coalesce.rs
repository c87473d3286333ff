// src/engine/coalesce.rs

//! Debounced, reentrancy-safe effect runner.
//!
//! A [`CoalescingExecutor`] owns one async effect. Triggers arriving while a
//! run is scheduled or executing are merged into a single follow-up run, so
//! the effect never overlaps with itself and bursts collapse.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, error};

use crate::types::{lock, BoxFuture};

/// Insertion-ordered set of trigger reasons handed to one effect run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReasonSet<R> {
    items: Vec<R>,
}

impl<R> Default for ReasonSet<R> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<R: PartialEq> ReasonSet<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert unless already present. Returns whether it was new.
    pub fn insert(&mut self, reason: R) -> bool {
        if self.items.contains(&reason) {
            return false;
        }
        self.items.push(reason);
        true
    }

    pub fn contains(&self, reason: &R) -> bool {
        self.items.contains(reason)
    }
}

impl<R> ReasonSet<R> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, R> {
        self.items.iter()
    }

    pub fn into_vec(self) -> Vec<R> {
        self.items
    }
}

impl<R: PartialEq> FromIterator<R> for ReasonSet<R> {
    fn from_iter<I: IntoIterator<Item = R>>(iter: I) -> Self {
        let mut set = ReasonSet::new();
        for reason in iter {
            set.insert(reason);
        }
        set
    }
}

impl<R> IntoIterator for ReasonSet<R> {
    type Item = R;
    type IntoIter = std::vec::IntoIter<R>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a, R> IntoIterator for &'a ReasonSet<R> {
    type Item = &'a R;
    type IntoIter = std::slice::Iter<'a, R>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

type Effect<R> = Arc<dyn Fn(ReasonSet<R>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Reasons accumulated for the next run. `dirty` is set by every trigger,
/// including ones that carry no reason.
struct Pending<R> {
    reasons: ReasonSet<R>,
    dirty: bool,
}

struct ExecutorInner<R> {
    title: String,
    effect: Effect<R>,
    default_debounce: Option<Duration>,
    /// `None` while idle.
    pending: Mutex<Option<Pending<R>>>,
    runs: AtomicU64,
}

/// Serialized, coalescing runner for a single effect.
///
/// Must be triggered from within a Tokio runtime.
pub struct CoalescingExecutor<R> {
    inner: Arc<ExecutorInner<R>>,
}

impl<R> Clone for CoalescingExecutor<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R> fmt::Debug for CoalescingExecutor<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoalescingExecutor")
            .field("title", &self.inner.title)
            .field("idle", &lock(&self.inner.pending).is_none())
            .field("runs", &self.inner.runs.load(Ordering::Relaxed))
            .finish()
    }
}

impl<R> CoalescingExecutor<R>
where
    R: PartialEq + Send + 'static,
{
    pub fn new<F, Fut>(title: impl Into<String>, effect: F) -> Self
    where
        F: Fn(ReasonSet<R>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::build(title.into(), None, effect)
    }

    /// Like [`new`](Self::new), but every trigger without an explicit
    /// debounce waits `debounce` before the first run.
    pub fn with_debounce<F, Fut>(title: impl Into<String>, debounce: Duration, effect: F) -> Self
    where
        F: Fn(ReasonSet<R>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::build(title.into(), Some(debounce), effect)
    }

    fn build<F, Fut>(title: String, default_debounce: Option<Duration>, effect: F) -> Self
    where
        F: Fn(ReasonSet<R>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let effect: Effect<R> = Arc::new(move |reasons| Box::pin(effect(reasons)));
        Self {
            inner: Arc::new(ExecutorInner {
                title,
                effect,
                default_debounce,
                pending: Mutex::new(None),
                runs: AtomicU64::new(0),
            }),
        }
    }

    /// Trigger a run using the default debounce.
    pub fn schedule(&self, reason: Option<R>) {
        self.schedule_with(reason, self.inner.default_debounce);
    }

    /// Trigger a run.
    ///
    /// If idle, a run starts (after `debounce`, if any). Otherwise `reason`
    /// is merged into the set for the follow-up run and `debounce` is ignored.
    pub fn schedule_with(&self, reason: Option<R>, debounce: Option<Duration>) {
        let mut pending = lock(&self.inner.pending);
        match pending.as_mut() {
            Some(p) => {
                if let Some(reason) = reason {
                    p.reasons.insert(reason);
                }
                p.dirty = true;
            }
            None => {
                let mut reasons = ReasonSet::new();
                if let Some(reason) = reason {
                    reasons.insert(reason);
                }
                *pending = Some(Pending {
                    reasons,
                    dirty: true,
                });
                drop(pending);
                tokio::spawn(drive(Arc::clone(&self.inner), debounce));
            }
        }
    }

    /// `true` when no run is scheduled or executing.
    pub fn is_idle(&self) -> bool {
        lock(&self.inner.pending).is_none()
    }

    /// Number of effect invocations started so far.
    pub fn run_count(&self) -> u64 {
        self.inner.runs.load(Ordering::SeqCst)
    }

    pub fn title(&self) -> &str {
        &self.inner.title
    }
}

async fn drive<R>(inner: Arc<ExecutorInner<R>>, debounce: Option<Duration>)
where
    R: PartialEq + Send + 'static,
{
    if let Some(delay) = debounce.filter(|d| !d.is_zero()) {
        tokio::time::sleep(delay).await;
    }

    loop {
        let reasons = {
            let mut pending = lock(&inner.pending);
            match pending.as_mut() {
                Some(p) => {
                    p.dirty = false;
                    std::mem::take(&mut p.reasons)
                }
                None => return,
            }
        };

        let run = inner.runs.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(executor = %inner.title, run, reasons = reasons.len(), "running effect");

        // The effect runs in its own task so a panic is contained like an error.
        let effect = Arc::clone(&inner.effect);
        match tokio::spawn(async move { effect(reasons).await }).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                error!(executor = %inner.title, run, error = %err, "effect failed");
            }
            Err(join_err) => {
                error!(executor = %inner.title, run, error = %join_err, "effect panicked");
            }
        }

        let mut pending = lock(&inner.pending);
        let again = pending.as_ref().is_some_and(|p| p.dirty);
        if !again {
            *pending = None;
            debug!(executor = %inner.title, run, "executor idle");
            return;
        }
    }
}
