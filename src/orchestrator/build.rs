// src/orchestrator/build.rs

//! Single-pass builds.
//!
//! Install, then type-check once, then bundle in dependency waves. A project
//! whose install or workspace dependency failed is skipped.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::WorkspaceConfig;
use crate::dag::build_waves;
use crate::errors::Result;
use crate::exec::BuildBackend;
use crate::fs::FileSystem;
use crate::stream::ValueStream;
use crate::types::{lock, BuildMode, ProjectName};

use super::session::bundle_once;
use super::stages::{BundlerConfig, InstallStatus, TypecheckConfig};
use super::status::Status;
use super::typecheck::ReferenceMap;
use super::workspace::{Orchestrator, OrchestratorOptions, Shared};

/// Outcome of [`Orchestrator::build`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub waves: Vec<Vec<ProjectName>>,
    /// Built projects, in wave order.
    pub succeeded: Vec<ProjectName>,
    /// Project -> reason it was not built.
    pub failed: BTreeMap<ProjectName, String>,
    pub typecheck: Option<Status>,
}

impl BuildReport {
    /// Every project bundled and no type errors.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && !self.typecheck.as_ref().is_some_and(Status::is_error)
    }
}

struct BuildInputs {
    install: ValueStream<InstallStatus>,
    typecheck: ValueStream<TypecheckConfig>,
    bundler: ValueStream<BundlerConfig>,
    deps: Vec<ProjectName>,
}

impl Orchestrator {
    /// Build every project once.
    ///
    /// Structural problems (a dependency cycle, an unscannable project) are
    /// errors; failures of individual projects are listed in the report.
    pub async fn build(
        config: WorkspaceConfig,
        backend: Arc<dyn BuildBackend>,
        fs: Arc<dyn FileSystem>,
        options: OrchestratorOptions,
    ) -> Result<BuildReport> {
        let (shared, _receivers) = Shared::new(&config, backend, fs, options, BuildMode::Build);
        let result = shared.run_build(config).await;
        shared.close_all().await;
        result
    }
}

impl Shared {
    async fn run_build(self: &Arc<Self>, config: WorkspaceConfig) -> Result<BuildReport> {
        self.apply_config(config, true).await?;

        let (waves, inputs) = {
            let st = lock(&self.state);
            let waves = build_waves(&st.graph)?;
            let inputs: BTreeMap<ProjectName, BuildInputs> = st
                .projects
                .iter()
                .map(|(name, entry)| {
                    let inputs = BuildInputs {
                        install: entry.node.install.clone(),
                        typecheck: entry.node.typecheck.clone(),
                        bundler: entry.node.bundler.clone(),
                        deps: st.graph.dependencies_of(name).to_vec(),
                    };
                    (name.clone(), inputs)
                })
                .collect();
            (waves, inputs)
        };
        info!(?waves, "build waves");

        let mut report = BuildReport {
            waves: waves.clone(),
            ..BuildReport::default()
        };

        for (name, input) in inputs.iter() {
            if let InstallStatus::Failed(msg) = settled_install(&input.install).await {
                let reason = format!("install failed: {msg}");
                self.board.set_project(name, Status::Error(reason.clone()));
                report.failed.insert(name.clone(), reason);
            }
        }

        report.typecheck = self.typecheck_once(&inputs).await;
        if let Some(Status::Error(msg)) = report.typecheck.as_ref() {
            warn!(error = %msg, "type check failed; bundling anyway");
        }

        for wave in waves.iter() {
            self.bundle_wave(wave, &inputs, &mut report).await;
        }

        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "build finished"
        );
        Ok(report)
    }

    async fn typecheck_once(&self, inputs: &BTreeMap<ProjectName, BuildInputs>) -> Option<Status> {
        let mut references = ReferenceMap::new();
        for input in inputs.values() {
            if let Some(tc) = input.typecheck.wait_current().await {
                references.insert(tc.project.path.clone(), tc.references.clone());
            }
        }
        if references.is_empty() {
            return None;
        }

        self.typecheck.refresh(references);
        self.board
            .wait_until(|s| s.typecheck.as_ref().is_some_and(Status::is_final))
            .await
            .and_then(|s| s.typecheck)
    }

    async fn bundle_wave(
        &self,
        wave: &[ProjectName],
        inputs: &BTreeMap<ProjectName, BuildInputs>,
        report: &mut BuildReport,
    ) {
        let mut tasks = JoinSet::new();
        let mut spawned = Vec::new();

        for name in wave {
            if report.failed.contains_key(name) {
                continue;
            }
            let Some(input) = inputs.get(name) else {
                continue;
            };
            if let Some(dep) = input.deps.iter().find(|d| report.failed.contains_key(*d)) {
                let reason = format!("dependency '{dep}' failed");
                self.board.set_project(name, Status::Error(reason.clone()));
                report.failed.insert(name.clone(), reason);
                continue;
            }
            let Some(config) = input.bundler.current() else {
                let reason = "no bundler config".to_string();
                self.board.set_project(name, Status::Error(reason.clone()));
                report.failed.insert(name.clone(), reason);
                continue;
            };

            let limiter = self.limiter.clone();
            let backend = Arc::clone(&self.backend);
            let board = Arc::clone(&self.board);
            let root = self.root.clone();
            let project = name.clone();
            tasks.spawn(async move {
                let Some(slot) = limiter.gen_task().await else {
                    return (project, Err("cancelled".to_string()));
                };
                board.set_project(&project, Status::Loading);
                let result = bundle_once(backend.as_ref(), root, config)
                    .await
                    .map_err(|e| {
                        warn!(error = %e, "bundle failed");
                        e.reason()
                    });
                slot.resolve();
                (project, result)
            });
            spawned.push(name.clone());
        }

        let mut outcomes = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((name, outcome)) => {
                    outcomes.insert(name, outcome);
                }
                Err(e) => error!(error = %e, "bundle task failed"),
            }
        }
        for name in spawned {
            outcomes
                .entry(name)
                .or_insert_with(|| Err("bundle task failed".to_string()));
        }

        for name in wave {
            match outcomes.remove(name) {
                Some(Ok(())) => {
                    self.board.set_project(name, Status::Success);
                    report.succeeded.push(name.clone());
                }
                Some(Err(reason)) => {
                    self.board.set_project(name, Status::Error(reason.clone()));
                    report.failed.insert(name.clone(), reason);
                }
                None => {}
            }
        }
    }
}

/// First install status other than `Pending`.
async fn settled_install(stream: &ValueStream<InstallStatus>) -> InstallStatus {
    let mut follower = stream.subscribe();
    while let Some(status) = follower.next().await {
        if status != InstallStatus::Pending {
            return status;
        }
    }
    InstallStatus::Failed("install did not finish".to_string())
}
