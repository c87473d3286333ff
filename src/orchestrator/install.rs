// src/orchestrator/install.rs

//! Shared dependency installation.
//!
//! Every project publishes a [`Manifest`]. Manifest changes arriving close
//! together are merged into one [`CombinedManifest`] and trigger a single
//! installer run; an unchanged combined manifest skips the run entirely.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::engine::{closer, CoalescingExecutor, LifecycleSwitch, SwitchPhase};
use crate::exec::installer::{attribute_failures, describe, mentions_project};
use crate::exec::{BuildBackend, InstallEvent, InstallRequest};
use crate::stream::ValueStream;
use crate::types::{lock, ProjectName};

use super::stages::{InstallStatus, Manifest};
use super::status::{Status, StatusBoard};

/// All projects' package dependencies in one install request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct CombinedManifest {
    /// Projects contributing to this install.
    pub projects: BTreeSet<String>,
    /// `"<project>/<package>"` -> version range.
    pub dependencies: BTreeMap<String, String>,
}

impl CombinedManifest {
    pub fn from_manifests<'a, I>(manifests: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a Manifest)>,
    {
        let mut combined = CombinedManifest::default();
        for (project, manifest) in manifests {
            combined.projects.insert(project.to_string());
            for (package, version) in manifest.dependencies.iter() {
                combined
                    .dependencies
                    .insert(format!("{project}/{package}"), version.clone());
            }
        }
        combined
    }

    /// Stable content hash.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for project in self.projects.iter() {
            hasher.update(b"project\0");
            hasher.update(project.as_bytes());
            hasher.update(b"\0");
        }
        for (key, version) in self.dependencies.iter() {
            hasher.update(b"dep\0");
            hasher.update(key.as_bytes());
            hasher.update(b"\0");
            hasher.update(version.as_bytes());
            hasher.update(b"\0");
        }
        hasher.finalize().to_hex().to_string()
    }
}

struct Registered {
    manifest: Manifest,
    status: ValueStream<InstallStatus>,
}

struct InstallShared {
    root: PathBuf,
    backend: Arc<dyn BuildBackend>,
    registered: Mutex<BTreeMap<ProjectName, Registered>>,
    /// Fingerprint of the last successful install.
    last_installed: Mutex<Option<String>>,
    board: Arc<StatusBoard>,
}

/// Merges manifest changes into serialized installer runs.
#[derive(Clone)]
pub struct InstallCoordinator {
    shared: Arc<InstallShared>,
    trigger: CoalescingExecutor<ProjectName>,
    switch: LifecycleSwitch<ProjectName>,
}

impl std::fmt::Debug for InstallCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallCoordinator")
            .field("projects", &lock(&self.shared.registered).len())
            .field("phase", &self.switch.phase())
            .finish_non_exhaustive()
    }
}

impl InstallCoordinator {
    pub fn new(
        root: PathBuf,
        backend: Arc<dyn BuildBackend>,
        board: Arc<StatusBoard>,
        debounce: Duration,
    ) -> Self {
        let shared = Arc::new(InstallShared {
            root,
            backend,
            registered: Mutex::new(BTreeMap::new()),
            last_installed: Mutex::new(None),
            board,
        });

        let open_shared = Arc::clone(&shared);
        let switch = LifecycleSwitch::new("install", move |_reasons| {
            let shared = Arc::clone(&open_shared);
            async move { shared.open() }
        });

        let effect_shared = Arc::clone(&shared);
        let effect_switch = switch.clone();
        let trigger = CoalescingExecutor::with_debounce("install-trigger", debounce, move |reasons| {
            let shared = Arc::clone(&effect_shared);
            let switch = effect_switch.clone();
            async move {
                shared.reconcile(reasons.into_vec(), &switch);
                Ok(())
            }
        });

        Self {
            shared,
            trigger,
            switch,
        }
    }

    /// Record the latest manifest of `project` and schedule an install pass.
    pub fn manifest_changed(
        &self,
        project: &str,
        manifest: Manifest,
        status: ValueStream<InstallStatus>,
    ) {
        lock(&self.shared.registered).insert(
            project.to_string(),
            Registered { manifest, status },
        );
        self.trigger.schedule(Some(project.to_string()));
    }

    pub fn remove_project(&self, project: &str) {
        if lock(&self.shared.registered).remove(project).is_some() {
            self.trigger.schedule(None);
        }
    }

    pub fn combined(&self) -> CombinedManifest {
        self.shared.combined()
    }

    pub fn phase(&self) -> SwitchPhase {
        self.switch.phase()
    }

    /// Stop any running install.
    pub async fn shutdown(&self) {
        self.switch.close(None);
        self.switch.wait_for(SwitchPhase::Closed).await;
    }
}

impl InstallShared {
    fn combined(&self) -> CombinedManifest {
        let registered = lock(&self.registered);
        CombinedManifest::from_manifests(
            registered
                .iter()
                .map(|(name, r)| (name.as_str(), &r.manifest)),
        )
    }

    fn statuses(&self, projects: impl Fn(&str) -> bool) -> Vec<(String, ValueStream<InstallStatus>)> {
        lock(&self.registered)
            .iter()
            .filter(|(name, _)| projects(name))
            .map(|(name, r)| (name.clone(), r.status.clone()))
            .collect()
    }

    fn reconcile(&self, reasons: Vec<ProjectName>, switch: &LifecycleSwitch<ProjectName>) {
        let fingerprint = self.combined().fingerprint();
        let unchanged = lock(&self.last_installed).as_deref() == Some(fingerprint.as_str());

        if unchanged {
            debug!(?reasons, "combined manifest unchanged; skipping install");
            for (_, stream) in self.statuses(|name| reasons.iter().any(|r| r == name)) {
                publish(&stream, InstallStatus::Installed);
            }
            return;
        }

        info!(?reasons, "manifests changed; installing");
        for (_, stream) in self.statuses(|_| true) {
            publish(&stream, InstallStatus::Pending);
        }
        switch.restart(None);
    }

    fn open(self: Arc<Self>) -> anyhow::Result<crate::engine::Closer<ProjectName>> {
        let manifest = self.combined();
        let request = InstallRequest {
            root: self.root.clone(),
            manifest: manifest.clone(),
        };

        self.board.set_install(Status::Loading);
        let (tx, rx) = mpsc::unbounded_channel();
        let process = match self.backend.spawn_install(&request, tx) {
            Ok(p) => p,
            Err(e) => {
                self.finish(&manifest, &[], -1);
                return Err(e);
            }
        };

        let monitor_shared = Arc::clone(&self);
        tokio::spawn(async move { monitor_shared.monitor(manifest, rx).await });

        Ok(closer(move |_reasons| async move {
            process.stop().await;
            Ok(())
        }))
    }

    async fn monitor(&self, manifest: CombinedManifest, mut rx: mpsc::UnboundedReceiver<InstallEvent>) {
        let mut errors = Vec::new();
        while let Some(event) = rx.recv().await {
            if let Some(text) = describe(&event) {
                debug!(progress = %text, "install");
            }
            match event {
                InstallEvent::Error(_) => errors.push(event),
                InstallEvent::Exit(code) => {
                    self.finish(&manifest, &errors, code);
                    return;
                }
                _ => {}
            }
        }
        debug!("install stopped before it finished");
    }

    fn finish(&self, manifest: &CombinedManifest, errors: &[InstallEvent], code: i32) {
        let mut failed = attribute_failures(errors, manifest.projects.iter().map(String::as_str));
        if code != 0 && failed.is_empty() {
            failed = manifest.projects.clone();
        }

        if failed.is_empty() {
            *lock(&self.last_installed) = Some(manifest.fingerprint());
            self.board.set_install(Status::Success);
        } else {
            warn!(exit_code = code, failed = ?failed, "install failed");
            self.board.set_install(Status::Error(format!(
                "install failed for {}",
                failed.iter().cloned().collect::<Vec<_>>().join(", ")
            )));
        }

        for (name, stream) in self.statuses(|name| manifest.projects.contains(name)) {
            let status = if failed.contains(&name) {
                InstallStatus::Failed(failure_message(&name, errors, code))
            } else {
                InstallStatus::Installed
            };
            publish(&stream, status);
        }
    }
}

fn failure_message(project: &str, errors: &[InstallEvent], code: i32) -> String {
    let mentioned: Vec<&str> = errors
        .iter()
        .filter_map(|e| match e {
            InstallEvent::Error(msg) if mentions_project(msg, project) => Some(msg.as_str()),
            _ => None,
        })
        .collect();

    if mentioned.is_empty() {
        format!("installer exited with code {code}")
    } else {
        mentioned.join("; ")
    }
}

fn publish(stream: &ValueStream<InstallStatus>, status: InstallStatus) {
    if stream.current().as_ref() != Some(&status) {
        stream.push(status);
    }
}
