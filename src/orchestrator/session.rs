// src/orchestrator/session.rs

//! Per-project bundler sessions.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::engine::{closer, Closer, LifecycleSwitch, TaskHandle};
use crate::errors::{Result, WatchbuildError};
use crate::exec::{BuildBackend, BundleRequest, BundlerEvent};
use crate::stream::ValueStream;
use crate::types::{lock, ProjectName};

use super::stages::BundlerConfig;
use super::status::{Status, StatusBoard};

/// Why a session was started or stopped.
pub type SessionReason = String;

/// Limiter slot held by a session until its first build finishes.
///
/// Every assignment bumps the generation, so a session that was restarted
/// cannot release the slot granted to its successor.
#[derive(Debug, Default)]
pub struct SlotCell {
    generation: u64,
    handle: Option<TaskHandle>,
}

pub type Slot = Arc<Mutex<SlotCell>>;

pub(crate) fn assign(slot: &Slot, handle: TaskHandle) -> u64 {
    let mut cell = lock(slot);
    cell.generation += 1;
    cell.handle = Some(handle);
    cell.generation
}

pub(crate) fn release(slot: &Slot, project: &str) {
    let handle = lock(slot).handle.take();
    if let Some(handle) = handle {
        debug!(project = %project, "releasing build slot");
        handle.resolve();
    }
}

fn release_if(slot: &Slot, generation: u64, project: &str) {
    let handle = {
        let mut cell = lock(slot);
        if cell.generation != generation {
            return;
        }
        cell.handle.take()
    };
    if let Some(handle) = handle {
        debug!(project = %project, generation, "releasing build slot");
        handle.resolve();
    }
}

/// Everything a watch-mode bundler session needs.
#[derive(Clone)]
pub(crate) struct SessionContext {
    pub name: ProjectName,
    pub root: PathBuf,
    pub backend: Arc<dyn BuildBackend>,
    pub board: Arc<StatusBoard>,
    pub bundler: ValueStream<BundlerConfig>,
    pub slot: Slot,
    /// Bundler config of the running process.
    pub running: Arc<Mutex<Option<BundlerConfig>>>,
    /// Notified with the project name after every successful build.
    pub built: mpsc::UnboundedSender<ProjectName>,
}

impl SessionContext {
    pub(crate) fn into_switch(self) -> LifecycleSwitch<SessionReason> {
        let title = format!("{}:bundle", self.name);
        LifecycleSwitch::new(title, move |_reasons| {
            let ctx = self.clone();
            async move { ctx.open() }
        })
    }

    fn open(self) -> anyhow::Result<Closer<SessionReason>> {
        let generation = lock(&self.slot).generation;
        let Some(config) = self.bundler.current() else {
            release_if(&self.slot, generation, &self.name);
            return Err(anyhow!("project '{}' has no bundler config yet", self.name));
        };

        let request = BundleRequest {
            root: self.root.clone(),
            config: config.clone(),
            watch: true,
        };
        let (tx, rx) = mpsc::unbounded_channel();
        let process = match self.backend.spawn_bundler(&request, tx) {
            Ok(p) => p,
            Err(e) => {
                self.board
                    .set_project(&self.name, Status::Error(format!("failed to start bundler: {e}")));
                release_if(&self.slot, generation, &self.name);
                return Err(e);
            }
        };
        info!(project = %self.name, generation, "bundler session started");
        *lock(&self.running) = Some(config);

        let monitor = self.clone();
        tokio::spawn(async move { monitor.monitor(generation, rx).await });

        Ok(closer(move |_reasons| async move {
            process.stop().await;
            *lock(&self.running) = None;
            debug!(project = %self.name, generation, "bundler session closed");
            Ok(())
        }))
    }

    async fn monitor(self, generation: u64, mut rx: mpsc::UnboundedReceiver<BundlerEvent>) {
        while let Some(event) = rx.recv().await {
            match event {
                BundlerEvent::Start | BundlerEvent::BundleStart => {
                    self.board.set_project(&self.name, Status::Loading);
                }
                BundlerEvent::BundleEnd { duration_ms } => {
                    debug!(project = %self.name, ?duration_ms, "bundle written");
                }
                BundlerEvent::End => {
                    self.board.set_project(&self.name, Status::Success);
                    release_if(&self.slot, generation, &self.name);
                    let _ = self.built.send(self.name.clone());
                }
                BundlerEvent::Error(msg) => {
                    self.board.set_project(&self.name, Status::Error(msg));
                    release_if(&self.slot, generation, &self.name);
                }
                BundlerEvent::Output(line) => debug!(project = %self.name, "{}", line),
                BundlerEvent::Exit(code) => {
                    if code != 0 {
                        self.board.set_project(
                            &self.name,
                            Status::Error(format!("bundler exited with code {code}")),
                        );
                    } else {
                        info!(project = %self.name, "bundler exited");
                    }
                    release_if(&self.slot, generation, &self.name);
                    return;
                }
            }
        }
        debug!(project = %self.name, "bundler session stopped");
    }
}

/// Run the bundler once, without watching, and wait for it to exit.
pub(crate) async fn bundle_once(
    backend: &dyn BuildBackend,
    root: PathBuf,
    config: BundlerConfig,
) -> Result<()> {
    let name = config.name.clone();
    let request = BundleRequest {
        root,
        config,
        watch: false,
    };
    let (tx, mut rx) = mpsc::unbounded_channel();
    let process = backend
        .spawn_bundler(&request, tx)
        .map_err(|e| failure(&name, format!("failed to start bundler: {e}")))?;

    let mut error = None;
    let mut exit = None;
    while let Some(event) = rx.recv().await {
        match event {
            BundlerEvent::Error(msg) => {
                warn!(project = %name, error = %msg, "bundle error");
                error.get_or_insert(msg);
            }
            BundlerEvent::Exit(code) => {
                exit = Some(code);
                break;
            }
            BundlerEvent::Output(line) => debug!(project = %name, "{}", line),
            other => debug!(project = %name, event = ?other, "bundler"),
        }
    }
    process.wait().await;

    match (error, exit) {
        (Some(msg), _) => Err(failure(&name, msg)),
        (None, Some(0)) => Ok(()),
        (None, Some(code)) => Err(failure(&name, format!("bundler exited with code {code}"))),
        (None, None) => Err(failure(&name, "bundler stopped before exiting".to_string())),
    }
}

fn failure(project: &str, message: String) -> WatchbuildError {
    WatchbuildError::ProcessFailure {
        project: project.to_string(),
        message,
    }
}
