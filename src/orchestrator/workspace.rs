// src/orchestrator/workspace.rs

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{
    config_path_in, parse_str, Overrides, ResolvedProject, WorkspaceConfig, CONFIG_FILE_NAME,
};
use crate::dag::DependencyGraph;
use crate::engine::{ConcurrencyLimiter, LifecycleSwitch, SwitchPhase, TaskHandle, WorkQueue};
use crate::errors::{Result, WatchbuildError};
use crate::exec::BuildBackend;
use crate::fs::FileSystem;
use crate::stream::Subscription;
use crate::types::{lock, BuildMode, ChangeKind, ProjectName};
use crate::watch::{closest_owner, collect_project_files, relative_str, ProjectMatcher};

use super::install::InstallCoordinator;
use super::project::ProjectNode;
use super::session::{assign, release, SessionContext, SessionReason, Slot};
use super::stages::{BundlerConfig, InstallStatus, ProjectSnapshot};
use super::status::{Status, StatusBoard};
use super::typecheck::{ReferenceMap, TypecheckSession};

/// Settings that are not part of `watchbuild.toml`.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorOptions {
    /// Workspace root; project paths are relative to it.
    pub root: PathBuf,
    /// Applied to the initial config and to every reloaded one.
    pub overrides: Overrides,
}

/// Work for the control loop, sent from stream callbacks.
#[derive(Debug)]
pub(crate) enum Control {
    Install(ProjectName),
    Bundler(ProjectName),
    Typecheck,
    Built(ProjectName),
}

pub(crate) struct ProjectEntry {
    pub node: ProjectNode,
    pub session: LifecycleSwitch<SessionReason>,
    pub slot: Slot,
    pub running: Arc<Mutex<Option<BundlerConfig>>>,
    subscriptions: Vec<Subscription>,
}

#[derive(Default)]
pub(crate) struct WorkspaceState {
    pub config: Option<WorkspaceConfig>,
    pub graph: DependencyGraph,
    pub matchers: Vec<ProjectMatcher>,
    pub projects: BTreeMap<ProjectName, ProjectEntry>,
    /// Dequeued projects waiting for their install or dependencies.
    pub parked: BTreeSet<ProjectName>,
}

enum Readiness {
    Ready,
    Blocked(String),
    Gone,
}

pub(crate) struct Shared {
    pub root: PathBuf,
    pub mode: BuildMode,
    overrides: Overrides,
    pub backend: Arc<dyn BuildBackend>,
    fs: Arc<dyn FileSystem>,
    pub board: Arc<StatusBoard>,
    pub install: InstallCoordinator,
    pub typecheck: TypecheckSession,
    pub limiter: ConcurrencyLimiter,
    queue: WorkQueue<ProjectName>,
    pub state: Mutex<WorkspaceState>,
    control: mpsc::UnboundedSender<Control>,
    built: mpsc::UnboundedSender<ProjectName>,
    shutdown: watch::Sender<bool>,
}

pub(crate) struct Receivers {
    control: mpsc::UnboundedReceiver<Control>,
    built: mpsc::UnboundedReceiver<ProjectName>,
}

impl Shared {
    pub(crate) fn new(
        config: &WorkspaceConfig,
        backend: Arc<dyn BuildBackend>,
        fs: Arc<dyn FileSystem>,
        options: OrchestratorOptions,
        mode: BuildMode,
    ) -> (Arc<Self>, Receivers) {
        let mut config = config.clone();
        config.apply_overrides(&options.overrides);

        let board = Arc::new(StatusBoard::new());
        let install = InstallCoordinator::new(
            options.root.clone(),
            Arc::clone(&backend),
            Arc::clone(&board),
            config.debounce(),
        );
        let typecheck = TypecheckSession::new(
            options.root.clone(),
            Arc::clone(&backend),
            Arc::clone(&board),
            mode == BuildMode::Dev,
            config.debounce(),
        );
        let limiter = ConcurrencyLimiter::new(config.effective_parallel());
        info!(parallel = limiter.capacity(), ?mode, "orchestrator created");

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (built_tx, built_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);

        let shared = Arc::new(Self {
            root: options.root,
            mode,
            overrides: options.overrides,
            backend,
            fs,
            board,
            install,
            typecheck,
            limiter,
            queue: WorkQueue::new(),
            state: Mutex::new(WorkspaceState::default()),
            control: control_tx,
            built: built_tx,
            shutdown,
        });
        let receivers = Receivers {
            control: control_rx,
            built: built_rx,
        };
        (shared, receivers)
    }

    /// Bring the project set, graph and stages in line with `config`.
    ///
    /// On the first call a dependency cycle is returned as an error. On later
    /// calls it is reported on the status board and the previous build order
    /// is kept.
    pub(crate) async fn apply_config(
        self: &Arc<Self>,
        mut config: WorkspaceConfig,
        initial: bool,
    ) -> Result<()> {
        config.apply_overrides(&self.overrides);
        if lock(&self.state).config.as_ref() == Some(&config) {
            debug!("config unchanged");
            return Ok(());
        }

        let resolved = config.resolved_projects();
        let matchers = resolved
            .iter()
            .map(ProjectMatcher::new)
            .collect::<anyhow::Result<Vec<_>>>()?;
        let graph = build_graph(&config, &resolved)?;

        let order = match graph.overall_order(false) {
            Ok(order) => {
                self.board.set_workspace_error(None);
                Some(order)
            }
            Err(e) if initial => return Err(e),
            Err(e) => {
                error!(error = %e, "dependency graph rejected; keeping previous build order");
                self.board.set_workspace_error(Some(e.to_string()));
                None
            }
        };

        let mut files = self.scan(&matchers).await?;

        let mut removed = Vec::new();
        let mut added = Vec::new();
        {
            let mut st = lock(&self.state);
            let gone: Vec<ProjectName> = st
                .projects
                .keys()
                .filter(|name| !config.project.contains_key(*name))
                .cloned()
                .collect();
            for name in gone {
                if let Some(entry) = st.projects.remove(&name) {
                    removed.push((name, entry));
                }
            }

            for project in resolved {
                let name = project.name.clone();
                let snapshot = ProjectSnapshot {
                    dep_paths: project
                        .deps
                        .iter()
                        .filter_map(|dep| config.resolve(dep).map(|d| (dep.clone(), d.path)))
                        .collect(),
                    files: files.remove(&name).unwrap_or_default(),
                    project,
                };
                match st.projects.get(&name) {
                    Some(entry) => {
                        entry.node.update_snapshot(snapshot);
                    }
                    None => {
                        let entry = self.new_entry(snapshot);
                        st.projects.insert(name.clone(), entry);
                        added.push(name);
                    }
                }
            }

            let WorkspaceState {
                parked, projects, ..
            } = &mut *st;
            parked.retain(|name| projects.contains_key(name));

            st.config = Some(config);
            st.graph = graph;
            st.matchers = matchers;
        }

        if let Some(order) = order {
            debug!(?order, "build order");
            self.queue.use_order(order);
        }
        for (name, entry) in removed {
            info!(project = %name, "project removed");
            self.teardown(name, entry);
        }
        for name in added.iter() {
            info!(project = %name, "project added");
            self.board.set_project(name, Status::Loading);
        }
        if self.mode == BuildMode::Dev {
            self.refresh_typecheck();
        }
        Ok(())
    }

    async fn scan(
        &self,
        matchers: &[ProjectMatcher],
    ) -> Result<BTreeMap<ProjectName, BTreeSet<String>>> {
        let fs = Arc::clone(&self.fs);
        let root = self.root.clone();
        let matchers = matchers.to_vec();

        let files = tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
            let roots: Vec<String> = matchers.iter().map(|m| m.root().to_string()).collect();
            let mut out = BTreeMap::new();
            for matcher in matchers.iter() {
                let prefix = format!("{}/", matcher.root());
                let nested: Vec<String> = roots
                    .iter()
                    .filter(|r| r.starts_with(&prefix))
                    .cloned()
                    .collect();
                let files = collect_project_files(fs.as_ref(), &root, matcher, &nested)?;
                debug!(project = %matcher.name(), files = files.len(), "scanned project");
                out.insert(matcher.name().to_string(), files);
            }
            Ok(out)
        })
        .await
        .map_err(|e| anyhow!("project scan failed: {e}"))??;

        Ok(files)
    }

    fn new_entry(&self, snapshot: ProjectSnapshot) -> ProjectEntry {
        let node = ProjectNode::new(snapshot);
        let name = node.name().to_string();
        let mut subscriptions = Vec::new();

        {
            let install = self.install.clone();
            let status = node.install.clone();
            let project = name.clone();
            subscriptions.push(node.manifest.on_next(
                move |manifest| install.manifest_changed(&project, manifest.clone(), status.clone()),
                false,
            ));
        }
        if let Some(manifest) = node.manifest.current() {
            self.install
                .manifest_changed(&name, manifest, node.install.clone());
        }

        if self.mode == BuildMode::Dev {
            let tx = self.control.clone();
            let project = name.clone();
            subscriptions.push(node.install.on_next(
                move |_| {
                    let _ = tx.send(Control::Install(project.clone()));
                },
                false,
            ));

            let tx = self.control.clone();
            let project = name.clone();
            subscriptions.push(node.bundler.on_next(
                move |_| {
                    let _ = tx.send(Control::Bundler(project.clone()));
                },
                false,
            ));

            let tx = self.control.clone();
            subscriptions.push(node.typecheck.on_next(
                move |_| {
                    let _ = tx.send(Control::Typecheck);
                },
                false,
            ));
        }

        let slot = Slot::default();
        let running = Arc::new(Mutex::new(None));
        let session = SessionContext {
            name,
            root: self.root.clone(),
            backend: Arc::clone(&self.backend),
            board: Arc::clone(&self.board),
            bundler: node.bundler.clone(),
            slot: Arc::clone(&slot),
            running: Arc::clone(&running),
            built: self.built.clone(),
        }
        .into_switch();

        ProjectEntry {
            node,
            session,
            slot,
            running,
            subscriptions,
        }
    }

    fn teardown(&self, name: ProjectName, entry: ProjectEntry) {
        for sub in entry.subscriptions.iter() {
            sub.unsubscribe();
        }
        self.install.remove_project(&name);
        self.board.remove_project(&name);
        entry.session.close(Some("project removed".to_string()));

        tokio::spawn(async move {
            entry.session.wait_for(SwitchPhase::Closed).await;
            entry.node.stop();
            release(&entry.slot, &name);
            debug!(project = %name, "project torn down");
        });
    }

    fn refresh_typecheck(&self) {
        let references: ReferenceMap = lock(&self.state)
            .projects
            .values()
            .filter_map(|entry| entry.node.typecheck.current())
            .map(|tc| (tc.project.path.clone(), tc.references.clone()))
            .collect();
        if references.is_empty() {
            return;
        }
        self.typecheck.refresh(references);
    }

    /// Apply a filesystem change below the workspace root.
    pub(crate) async fn notify_change(self: &Arc<Self>, path: &Path, kind: ChangeKind) -> Result<()> {
        let rel = if path.is_relative() {
            path.to_string_lossy().replace('\\', "/")
        } else {
            match relative_str(&self.root, path) {
                Some(rel) => rel,
                None => {
                    debug!(path = %path.display(), "change outside the workspace");
                    return Ok(());
                }
            }
        };

        if rel == CONFIG_FILE_NAME {
            return self.reload_from_disk(kind).await;
        }

        let st = lock(&self.state);
        let Some(matcher) = closest_owner(&st.matchers, &rel) else {
            debug!(path = %rel, "change outside every project");
            return Ok(());
        };
        let Some(project_rel) = matcher.strip(&rel) else {
            return Ok(());
        };
        if !matcher.matches(project_rel) {
            return Ok(());
        }
        let Some(entry) = st.projects.get(matcher.name()) else {
            return Ok(());
        };
        let Some(mut snapshot) = entry.node.snapshot() else {
            return Ok(());
        };

        let changed = match kind {
            ChangeKind::Add => snapshot.files.insert(project_rel.to_string()),
            ChangeKind::Unlink => snapshot.files.remove(project_rel),
            ChangeKind::Change => false,
        };
        if changed {
            debug!(project = %matcher.name(), path = %project_rel, ?kind, "project files changed");
            entry.node.update_snapshot(snapshot);
        }
        Ok(())
    }

    async fn reload_from_disk(self: &Arc<Self>, kind: ChangeKind) -> Result<()> {
        if kind == ChangeKind::Unlink {
            warn!("{CONFIG_FILE_NAME} was removed; keeping the current config");
            return Ok(());
        }

        let path = config_path_in(&self.root);
        let loaded = self
            .fs
            .read_to_string(&path)
            .map_err(WatchbuildError::from)
            .and_then(|contents| parse_str(&contents))
            .and_then(WorkspaceConfig::try_from);

        match loaded {
            Ok(config) => {
                info!("{CONFIG_FILE_NAME} changed; reloading");
                self.apply_config(config, false).await
            }
            Err(e) => {
                error!(error = %e, "invalid config; keeping the current one");
                self.board
                    .set_workspace_error(Some(format!("invalid {CONFIG_FILE_NAME}: {e}")));
                Ok(())
            }
        }
    }

    fn handle(&self, msg: Control) {
        match msg {
            Control::Install(name) => self.on_install(&name),
            Control::Bundler(name) => self.on_bundler(&name),
            Control::Typecheck => self.refresh_typecheck(),
            Control::Built(name) => {
                debug!(project = %name, "built; waking parked projects");
                self.wake_parked();
            }
        }
    }

    fn on_install(&self, name: &str) {
        let (status, session, slot) = {
            let st = lock(&self.state);
            let Some(entry) = st.projects.get(name) else {
                return;
            };
            (
                entry.node.install.current(),
                entry.session.clone(),
                Arc::clone(&entry.slot),
            )
        };

        match status {
            Some(InstallStatus::Installed) => {
                if session.phase() == SwitchPhase::Closed {
                    self.enqueue(name);
                }
            }
            Some(InstallStatus::Failed(msg)) => {
                self.board
                    .set_project(name, Status::Error(format!("install failed: {msg}")));
                session.close(Some("install failed".to_string()));
                release(&slot, name);
            }
            Some(InstallStatus::Pending) | None => {}
        }
    }

    fn on_bundler(&self, name: &str) {
        let stale = {
            let st = lock(&self.state);
            let Some(entry) = st.projects.get(name) else {
                return;
            };
            let installed = entry.node.install.current() == Some(InstallStatus::Installed);
            let running = lock(&entry.running).clone();
            installed && running != entry.node.bundler.current()
        };
        if stale {
            debug!(project = %name, "bundler config changed");
            self.enqueue(name);
        }
    }

    fn enqueue(&self, name: &str) {
        lock(&self.state).parked.remove(name);
        if !self.queue.add(name.to_string()) {
            debug!(project = %name, "not in the build order; not scheduled");
        }
    }

    fn wake_parked(&self) {
        let parked = std::mem::take(&mut lock(&self.state).parked);
        for name in parked {
            self.queue.add(name);
        }
    }

    fn readiness(&self, name: &str) -> Readiness {
        let st = lock(&self.state);
        let Some(entry) = st.projects.get(name) else {
            return Readiness::Gone;
        };
        match entry.node.install.current() {
            Some(InstallStatus::Installed) => {}
            Some(InstallStatus::Failed(_)) => return Readiness::Blocked("install failed".into()),
            _ => return Readiness::Blocked("install pending".into()),
        }
        for dep in st.graph.dependencies_of(name) {
            if self.board.project(dep) != Some(Status::Success) {
                return Readiness::Blocked(format!("waiting for {dep}"));
            }
        }
        Readiness::Ready
    }

    fn park(&self, name: ProjectName, reason: &str) {
        debug!(project = %name, reason, "parked");
        lock(&self.state).parked.insert(name);
    }

    fn open_session(&self, name: &str, handle: TaskHandle) {
        let st = lock(&self.state);
        let Some(entry) = st.projects.get(name) else {
            return;
        };
        let generation = assign(&entry.slot, handle);
        self.board.set_project(name, Status::Loading);

        let reason = Some(format!("scheduled #{generation}"));
        match entry.session.phase() {
            SwitchPhase::Opened | SwitchPhase::Opening => entry.session.restart(reason),
            SwitchPhase::Closed | SwitchPhase::Closing => entry.session.start(reason),
        }
    }

    async fn dispatch_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            let name = tokio::select! {
                name = self.queue.next() => name,
                _ = shutdown.changed() => break,
            };
            match self.readiness(&name) {
                Readiness::Ready => {}
                Readiness::Blocked(reason) => {
                    self.park(name, &reason);
                    continue;
                }
                Readiness::Gone => continue,
            }

            let handle = tokio::select! {
                handle = self.limiter.gen_task() => handle,
                _ = shutdown.changed() => break,
            };
            let Some(handle) = handle else {
                break;
            };

            // State may have moved on while waiting for a slot.
            match self.readiness(&name) {
                Readiness::Ready => self.open_session(&name, handle),
                Readiness::Blocked(reason) => self.park(name, &reason),
                Readiness::Gone => {}
            }
        }
        debug!("dispatcher stopped");
    }

    async fn control_loop(
        self: Arc<Self>,
        mut receivers: Receivers,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let msg = tokio::select! {
                Some(msg) = receivers.control.recv() => msg,
                Some(name) = receivers.built.recv() => Control::Built(name),
                _ = shutdown.changed() => break,
            };
            self.handle(msg);
        }
        debug!("control loop stopped");
    }

    /// Stop every session and process, then the streams.
    pub(crate) async fn close_all(&self) {
        let _ = self.shutdown.send(true);
        self.limiter.close();

        let entries = std::mem::take(&mut lock(&self.state).projects);
        for (_, entry) in entries.iter() {
            for sub in entry.subscriptions.iter() {
                sub.unsubscribe();
            }
            entry.session.close(Some("shutdown".to_string()));
        }
        for (name, entry) in entries {
            entry.session.wait_for(SwitchPhase::Closed).await;
            entry.node.stop();
            release(&entry.slot, &name);
        }

        self.install.shutdown().await;
        self.typecheck.shutdown().await;
        self.board.stop();
        info!("orchestrator stopped");
    }
}

/// Dependency graph of `resolved`, honouring `allow_cycles`.
pub fn build_graph(config: &WorkspaceConfig, resolved: &[ResolvedProject]) -> Result<DependencyGraph> {
    let mut graph = if config.workspace.allow_cycles {
        DependencyGraph::with_cycles_allowed()
    } else {
        DependencyGraph::new()
    };
    for project in resolved {
        graph.add_node(&project.name);
    }
    for project in resolved {
        for dep in project.deps.iter() {
            graph.add_dependency(&project.name, dep)?;
        }
    }
    Ok(graph)
}

/// Reactive workspace orchestrator.
///
/// In dev mode ([`Orchestrator::start`]) every project gets a watch-mode
/// bundler session that is (re)started as its inputs change, once its
/// dependencies are installed and its workspace dependencies built.
/// [`Orchestrator::build`] performs a single pass instead.
pub struct Orchestrator {
    pub(crate) shared: Arc<Shared>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("root", &self.shared.root)
            .field("mode", &self.shared.mode)
            .field("projects", &lock(&self.shared.state).projects.len())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Start dev mode.
    ///
    /// Fails if the initial config has a dependency cycle (unless cycles are
    /// allowed) or a project cannot be scanned.
    pub async fn start(
        config: WorkspaceConfig,
        backend: Arc<dyn BuildBackend>,
        fs: Arc<dyn FileSystem>,
        options: OrchestratorOptions,
    ) -> Result<Self> {
        let (shared, receivers) = Shared::new(&config, backend, fs, options, BuildMode::Dev);
        if let Err(e) = shared.apply_config(config, true).await {
            shared.close_all().await;
            return Err(e);
        }

        // Subscribe before spawning so an early shutdown is still observed.
        let control_shutdown = shared.shutdown.subscribe();
        let dispatch_shutdown = shared.shutdown.subscribe();
        let tasks = vec![
            tokio::spawn(Arc::clone(&shared).control_loop(receivers, control_shutdown)),
            tokio::spawn(Arc::clone(&shared).dispatch_loop(dispatch_shutdown)),
        ];
        info!(root = %shared.root.display(), "dev mode started");

        Ok(Self {
            shared,
            tasks: Mutex::new(tasks),
        })
    }

    pub fn root(&self) -> &Path {
        &self.shared.root
    }

    pub fn status(&self) -> Arc<StatusBoard> {
        Arc::clone(&self.shared.board)
    }

    pub fn project_names(&self) -> Vec<ProjectName> {
        lock(&self.shared.state).projects.keys().cloned().collect()
    }

    /// Current build priority, dependencies first.
    pub fn build_order(&self) -> Vec<ProjectName> {
        self.shared.queue.order()
    }

    pub fn combined_manifest(&self) -> super::install::CombinedManifest {
        self.shared.install.combined()
    }

    pub fn session_phase(&self, project: &str) -> Option<SwitchPhase> {
        lock(&self.shared.state)
            .projects
            .get(project)
            .map(|entry| entry.session.phase())
    }

    /// Replace the config, e.g. after `watchbuild.toml` changed.
    pub async fn reload(&self, config: WorkspaceConfig) -> Result<()> {
        self.shared.apply_config(config, false).await
    }

    /// Feed one filesystem change. Paths may be absolute or relative to the
    /// workspace root.
    pub async fn notify_change(&self, path: &Path, kind: ChangeKind) -> Result<()> {
        self.shared.notify_change(path, kind).await
    }

    pub async fn shutdown(&self) {
        self.shared.close_all().await;
        let tasks = std::mem::take(&mut *lock(&self.tasks));
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "orchestrator task failed");
            }
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        let _ = self.shared.shutdown.send(true);
        for task in lock(&self.tasks).iter() {
            task.abort();
        }
    }
}
