// src/orchestrator/status.rs

use std::collections::BTreeMap;
use std::sync::Mutex;

use tracing::{error, info};

use crate::stream::ValueStream;
use crate::types::lock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Loading,
    Success,
    Error(String),
}

impl Status {
    pub fn is_final(&self) -> bool {
        !matches!(self, Status::Loading)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Status::Error(_))
    }
}

/// Point-in-time view of every status the orchestrator reports.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatusSnapshot {
    pub projects: BTreeMap<String, Status>,
    pub install: Option<Status>,
    pub typecheck: Option<Status>,
    /// Workspace-level failure, e.g. a dependency cycle.
    pub workspace: Option<String>,
}

impl StatusSnapshot {
    pub fn project(&self, name: &str) -> Option<&Status> {
        self.projects.get(name)
    }
}

/// Aggregated status, published on a stream on every change.
#[derive(Debug)]
pub struct StatusBoard {
    state: Mutex<StatusSnapshot>,
    stream: ValueStream<StatusSnapshot>,
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBoard {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StatusSnapshot::default()),
            stream: ValueStream::with_value("status", StatusSnapshot::default()),
        }
    }

    /// Apply `f` and publish if the snapshot changed.
    ///
    /// No callbacks are registered on the inner stream, so pushing under the
    /// lock keeps publication order equal to mutation order.
    fn update(&self, f: impl FnOnce(&mut StatusSnapshot)) {
        let mut state = lock(&self.state);
        let before = state.clone();
        f(&mut state);
        if *state != before {
            self.stream.push(state.clone());
        }
    }

    pub fn set_project(&self, name: &str, status: Status) {
        self.update(|s| {
            if s.projects.get(name) == Some(&status) {
                return;
            }
            match &status {
                Status::Error(msg) => error!(project = %name, error = %msg, "project failed"),
                Status::Success => info!(project = %name, "project built"),
                Status::Loading => info!(project = %name, "project building"),
            }
            s.projects.insert(name.to_string(), status);
        });
    }

    pub fn remove_project(&self, name: &str) {
        self.update(|s| {
            s.projects.remove(name);
        });
    }

    pub fn set_install(&self, status: Status) {
        self.update(|s| {
            if s.install.as_ref() != Some(&status) {
                info!(?status, "install");
                s.install = Some(status);
            }
        });
    }

    pub fn set_typecheck(&self, status: Status) {
        self.update(|s| {
            if s.typecheck.as_ref() != Some(&status) {
                info!(?status, "typecheck");
                s.typecheck = Some(status);
            }
        });
    }

    pub fn set_workspace_error(&self, error: Option<String>) {
        self.update(|s| s.workspace = error);
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        lock(&self.state).clone()
    }

    pub fn project(&self, name: &str) -> Option<Status> {
        lock(&self.state).projects.get(name).cloned()
    }

    pub fn stream(&self) -> ValueStream<StatusSnapshot> {
        self.stream.clone()
    }

    /// First snapshot (current one included) satisfying `pred`.
    ///
    /// Returns `None` if the board is stopped first.
    pub async fn wait_until<F>(&self, mut pred: F) -> Option<StatusSnapshot>
    where
        F: FnMut(&StatusSnapshot) -> bool,
    {
        let mut follower = self.stream.subscribe();
        while let Some(snapshot) = follower.next().await {
            if pred(&snapshot) {
                return Some(snapshot);
            }
        }
        None
    }

    pub fn stop(&self) {
        self.stream.stop();
    }
}
