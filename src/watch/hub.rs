// src/watch/hub.rs

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};

use anyhow::Result;
use globset::GlobSet;
use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::types::{lock, ChangeKind};
use crate::watch::patterns::{build_globset, relative_str};

/// One filesystem change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsChange {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

struct Subscriber {
    id: u64,
    /// `None` matches every path.
    filter: Option<GlobSet>,
    tx: mpsc::UnboundedSender<FsChange>,
}

struct HubState {
    watcher: Option<RecommendedWatcher>,
    subscribers: Vec<Subscriber>,
    next_id: u64,
}

/// Shared registry of filesystem subscriptions over one directory tree.
///
/// The underlying `notify` watcher is created with the first subscription
/// and torn down when the last one is dropped.
#[derive(Clone)]
pub struct WatchHub {
    root: PathBuf,
    state: Arc<Mutex<HubState>>,
}

impl fmt::Debug for WatchHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchHub")
            .field("root", &self.root)
            .field("subscribers", &self.ref_count())
            .finish()
    }
}

impl WatchHub {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = root.canonicalize().unwrap_or(root);
        Self {
            root,
            state: Arc::new(Mutex::new(HubState {
                watcher: None,
                subscribers: Vec::new(),
                next_id: 0,
            })),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Subscribe to changes under the root whose relative path matches one of
    /// `patterns` (every change if `patterns` is empty).
    pub fn subscribe(&self, patterns: &[String]) -> Result<FsSubscription> {
        let filter = if patterns.is_empty() {
            None
        } else {
            Some(build_globset(patterns)?)
        };
        let (tx, rx) = mpsc::unbounded_channel();

        // The watcher is built outside the lock: its setup may wait on the
        // event thread, which takes this lock in `dispatch`.
        let fresh = if self.is_active() {
            None
        } else {
            Some(self.start_watcher()?)
        };

        let mut state = lock(&self.state);
        let spare = match fresh {
            Some(w) if state.watcher.is_none() => {
                state.watcher = Some(w);
                None
            }
            other => other,
        };

        state.next_id += 1;
        let id = state.next_id;
        state.subscribers.push(Subscriber { id, filter, tx });
        debug!(id, subscribers = state.subscribers.len(), "fs subscription added");
        drop(state);
        drop(spare);

        Ok(FsSubscription {
            id,
            rx,
            state: Arc::downgrade(&self.state),
        })
    }

    /// Number of live subscriptions.
    pub fn ref_count(&self) -> usize {
        lock(&self.state).subscribers.len()
    }

    /// `true` while the OS watcher is running.
    pub fn is_active(&self) -> bool {
        lock(&self.state).watcher.is_some()
    }

    fn start_watcher(&self) -> Result<RecommendedWatcher> {
        let root = self.root.clone();
        let state = Arc::downgrade(&self.state);

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => dispatch(&state, &root, event),
                Err(err) => warn!(error = %err, "file watch error"),
            },
            Config::default(),
        )?;
        watcher.watch(&self.root, RecursiveMode::Recursive)?;

        info!(root = %self.root.display(), "file watcher started");
        Ok(watcher)
    }
}

fn change_kinds(kind: &EventKind, paths: usize) -> Vec<ChangeKind> {
    match kind {
        EventKind::Create(_) => vec![ChangeKind::Add; paths],
        EventKind::Remove(_) => vec![ChangeKind::Unlink; paths],
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => vec![ChangeKind::Unlink; paths],
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => vec![ChangeKind::Add; paths],
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            vec![ChangeKind::Unlink, ChangeKind::Add]
        }
        EventKind::Modify(_) => vec![ChangeKind::Change; paths],
        _ => Vec::new(),
    }
}

/// Runs on the notify thread.
fn dispatch(state: &Weak<Mutex<HubState>>, root: &Path, event: Event) {
    let Some(state) = state.upgrade() else {
        return;
    };
    let kinds = change_kinds(&event.kind, event.paths.len());
    let state = lock(&state);

    for (path, kind) in event.paths.into_iter().zip(kinds) {
        let Some(rel) = relative_str(root, &path) else {
            continue;
        };
        for sub in state.subscribers.iter() {
            let wanted = sub.filter.as_ref().is_none_or(|f| f.is_match(&rel));
            if wanted {
                let _ = sub.tx.send(FsChange {
                    path: path.clone(),
                    kind,
                });
            }
        }
    }
}

/// Live subscription to a [`WatchHub`]. Dropping it unsubscribes.
pub struct FsSubscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<FsChange>,
    state: Weak<Mutex<HubState>>,
}

impl fmt::Debug for FsSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FsSubscription").field("id", &self.id).finish()
    }
}

impl FsSubscription {
    pub async fn recv(&mut self) -> Option<FsChange> {
        self.rx.recv().await
    }
}

impl Drop for FsSubscription {
    fn drop(&mut self) {
        let Some(state) = self.state.upgrade() else {
            return;
        };
        let watcher = {
            let mut st = lock(&state);
            st.subscribers.retain(|s| s.id != self.id);
            if st.subscribers.is_empty() {
                st.watcher.take()
            } else {
                None
            }
        };
        // Dropped outside the lock for the same reason it is built outside it.
        if watcher.is_some() {
            drop(watcher);
            info!("file watcher stopped");
        }
    }
}
