// src/orchestrator/project.rs

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::engine::CoalescingExecutor;
use crate::stream::{Subscription, ValueStream};

use super::stages::{
    derive_bundler, derive_manifest, derive_typecheck, BundlerConfig, InstallStatus, Manifest,
    ProjectSnapshot, TypecheckConfig,
};

/// Keeps one derived stage in sync with its upstream stage.
struct StageLink {
    _executor: CoalescingExecutor<()>,
    subscription: Subscription,
}

fn link_stage<U, D, F>(
    label: String,
    upstream: &ValueStream<U>,
    downstream: &ValueStream<D>,
    derive: F,
) -> StageLink
where
    U: Clone + Send + 'static,
    D: Clone + PartialEq + Send + 'static,
    F: Fn(&U) -> D + Send + Sync + 'static,
{
    let up = upstream.clone();
    let down = downstream.clone();
    let derive = Arc::new(derive);
    let stage = label.clone();

    let executor = CoalescingExecutor::new(label, move |_reasons| {
        let up = up.clone();
        let down = down.clone();
        let derive = Arc::clone(&derive);
        let stage = stage.clone();
        async move {
            let Some(value) = up.current() else {
                return Ok(());
            };
            let next = derive(&value);
            if down.current().as_ref() == Some(&next) {
                debug!(stage = %stage, "derived value unchanged; not republishing");
            } else {
                down.push(next);
            }
            Ok(())
        }
    });

    let trigger = executor.clone();
    let subscription = upstream.on_next(move |_| trigger.schedule(None), false);
    if upstream.has_current() {
        executor.schedule(None);
    }

    StageLink {
        _executor: executor,
        subscription,
    }
}

/// One project's chain of configuration stages.
///
/// Pushing a new [`ProjectSnapshot`] re-derives every later stage; a stage
/// whose derived value is unchanged stops the propagation there.
pub struct ProjectNode {
    name: String,
    pub raw: ValueStream<ProjectSnapshot>,
    pub typecheck: ValueStream<TypecheckConfig>,
    pub bundler: ValueStream<BundlerConfig>,
    pub manifest: ValueStream<Manifest>,
    pub install: ValueStream<InstallStatus>,
    links: Vec<StageLink>,
}

impl fmt::Debug for ProjectNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectNode")
            .field("name", &self.name)
            .field("install", &self.install.current())
            .finish_non_exhaustive()
    }
}

impl ProjectNode {
    pub fn new(snapshot: ProjectSnapshot) -> Self {
        let name = snapshot.name().to_string();
        let raw = ValueStream::new(format!("{name}:raw"));
        let typecheck = ValueStream::new(format!("{name}:typecheck"));
        let bundler = ValueStream::new(format!("{name}:bundler"));
        let manifest = ValueStream::new(format!("{name}:manifest"));
        let install = ValueStream::with_value(format!("{name}:install"), InstallStatus::Pending);

        let links = vec![
            link_stage(format!("{name}:typecheck"), &raw, &typecheck, derive_typecheck),
            link_stage(format!("{name}:bundler"), &typecheck, &bundler, derive_bundler),
            link_stage(format!("{name}:manifest"), &bundler, &manifest, derive_manifest),
        ];

        raw.push(snapshot);

        Self {
            name,
            raw,
            typecheck,
            bundler,
            manifest,
            install,
            links,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn snapshot(&self) -> Option<ProjectSnapshot> {
        self.raw.current()
    }

    /// Replace the raw inputs. Returns `false` if they were unchanged.
    pub fn update_snapshot(&self, snapshot: ProjectSnapshot) -> bool {
        if self.raw.current().as_ref() == Some(&snapshot) {
            return false;
        }
        debug!(project = %self.name, "inputs changed");
        self.raw.push(snapshot);
        true
    }

    /// Stop every stage. Subscriptions and stage executors are released.
    pub fn stop(&self) {
        for link in self.links.iter() {
            link.subscription.unsubscribe();
        }
        self.raw.stop();
        self.typecheck.stop();
        self.bundler.stop();
        self.manifest.stop();
        self.install.stop();
    }
}
