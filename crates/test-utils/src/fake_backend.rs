use std::collections::BTreeSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use watchbuild::exec::{
    BuildBackend, BundleRequest, BundlerEvent, InstallEvent, InstallRequest, SessionProcess,
    TypecheckEvent, TypecheckRequest,
};
use watchbuild::orchestrator::CombinedManifest;

#[derive(Debug, Default)]
struct FakeState {
    installs: Vec<CombinedManifest>,
    typechecks: Vec<TypecheckRequest>,
    bundles: Vec<BundleRequest>,
    failing_installs: BTreeSet<String>,
    failing_bundles: BTreeSet<String>,
    type_errors: u32,
    bundle_delay: Duration,
    active_bundles: usize,
    max_active_bundles: usize,
}

/// A fake backend that:
/// - records every install, type-check and bundle request
/// - fails installs or bundles of the projects it is told to
/// - otherwise reports immediate success, staying alive in watch mode until
///   stopped.
#[derive(Debug, Clone, Default)]
pub struct FakeBackend {
    state: Arc<Mutex<FakeState>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs contributed to by `project` report an error keyed to it.
    pub fn fail_install_for(&self, project: &str) {
        self.state.lock().unwrap().failing_installs.insert(project.to_string());
    }

    pub fn clear_install_failures(&self) {
        self.state.lock().unwrap().failing_installs.clear();
    }

    pub fn fail_bundle_for(&self, project: &str) {
        self.state.lock().unwrap().failing_bundles.insert(project.to_string());
    }

    pub fn set_type_errors(&self, errors: u32) {
        self.state.lock().unwrap().type_errors = errors;
    }

    /// Time each bundle takes between BUNDLE_START and BUNDLE_END.
    pub fn set_bundle_delay(&self, delay: Duration) {
        self.state.lock().unwrap().bundle_delay = delay;
    }

    pub fn installs(&self) -> Vec<CombinedManifest> {
        self.state.lock().unwrap().installs.clone()
    }

    pub fn typechecks(&self) -> Vec<TypecheckRequest> {
        self.state.lock().unwrap().typechecks.clone()
    }

    pub fn bundles(&self) -> Vec<BundleRequest> {
        self.state.lock().unwrap().bundles.clone()
    }

    /// Project names in the order their bundlers were spawned.
    pub fn bundle_order(&self) -> Vec<String> {
        self.bundles().into_iter().map(|b| b.config.name).collect()
    }

    pub fn bundle_count(&self, project: &str) -> usize {
        self.bundles()
            .iter()
            .filter(|b| b.config.name == project)
            .count()
    }

    /// Highest number of bundles that were building at the same time.
    pub fn max_active_bundles(&self) -> usize {
        self.state.lock().unwrap().max_active_bundles
    }
}

/// Counts a bundle as building until dropped, cancellation included.
struct ActiveBundle(Arc<Mutex<FakeState>>);

impl ActiveBundle {
    fn enter(state: Arc<Mutex<FakeState>>) -> Self {
        {
            let mut st = state.lock().unwrap();
            st.active_bundles += 1;
            st.max_active_bundles = st.max_active_bundles.max(st.active_bundles);
        }
        Self(state)
    }
}

impl Drop for ActiveBundle {
    fn drop(&mut self) {
        self.0.lock().unwrap().active_bundles -= 1;
    }
}

/// Run `body` as a fake process that ends when it finishes or is cancelled.
fn fake_session<F>(label: &str, body: F) -> SessionProcess
where
    F: Future<Output = ()> + Send + 'static,
{
    let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        tokio::select! {
            _ = body => {}
            _ = cancel_rx => {}
        }
    });
    SessionProcess::new(label, cancel_tx, handle)
}

impl BuildBackend for FakeBackend {
    fn spawn_install(
        &self,
        request: &InstallRequest,
        events: mpsc::UnboundedSender<InstallEvent>,
    ) -> anyhow::Result<SessionProcess> {
        let failing: Vec<String> = {
            let mut state = self.state.lock().unwrap();
            state.installs.push(request.manifest.clone());
            request
                .manifest
                .projects
                .iter()
                .filter(|p| state.failing_installs.contains(*p))
                .cloned()
                .collect()
        };

        Ok(fake_session("install", async move {
            let _ = events.send(InstallEvent::Step {
                message: "Resolving packages".to_string(),
                current: 1,
                total: 1,
            });
            for project in failing.iter() {
                let _ = events.send(InstallEvent::Error(format!(
                    "{project}/left-pad: couldn't find package"
                )));
            }
            let code = if failing.is_empty() { 0 } else { 1 };
            let _ = events.send(InstallEvent::Exit(code));
        }))
    }

    fn spawn_typecheck(
        &self,
        request: &TypecheckRequest,
        events: mpsc::UnboundedSender<TypecheckEvent>,
    ) -> anyhow::Result<SessionProcess> {
        let errors = {
            let mut state = self.state.lock().unwrap();
            state.typechecks.push(request.clone());
            state.type_errors
        };
        let watch = request.watch;

        Ok(fake_session("typecheck", async move {
            let _ = events.send(TypecheckEvent::PassStarted);
            let _ = events.send(TypecheckEvent::Completed { errors });
            if watch {
                std::future::pending::<()>().await;
            }
            let _ = events.send(TypecheckEvent::Exit(if errors == 0 { 0 } else { 2 }));
        }))
    }

    fn spawn_bundler(
        &self,
        request: &BundleRequest,
        events: mpsc::UnboundedSender<BundlerEvent>,
    ) -> anyhow::Result<SessionProcess> {
        let (fails, delay) = {
            let mut state = self.state.lock().unwrap();
            state.bundles.push(request.clone());
            (
                state.failing_bundles.contains(&request.config.name),
                state.bundle_delay,
            )
        };
        let watch = request.watch;
        let name = request.config.name.clone();
        let state = Arc::clone(&self.state);

        Ok(fake_session(&format!("bundle:{name}"), async move {
            let _ = events.send(BundlerEvent::Start);
            let _ = events.send(BundlerEvent::BundleStart);
            let active = ActiveBundle::enter(state);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            drop(active);

            if fails {
                let _ = events.send(BundlerEvent::Error(format!("{name}: could not resolve entry")));
            } else {
                let _ = events.send(BundlerEvent::BundleEnd {
                    duration_ms: Some(delay.as_millis() as u64),
                });
                let _ = events.send(BundlerEvent::End);
            }
            if watch {
                std::future::pending::<()>().await;
            }
            let _ = events.send(BundlerEvent::Exit(if fails { 1 } else { 0 }));
        }))
    }
}
