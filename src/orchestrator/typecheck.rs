// src/orchestrator/typecheck.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::engine::{closer, Closer, LifecycleSwitch, SwitchPhase};
use crate::exec::{BuildBackend, TypecheckEvent, TypecheckRequest};
use crate::types::lock;

use super::status::{Status, StatusBoard};

/// Project path -> paths of the projects it references.
pub type ReferenceMap = BTreeMap<String, Vec<String>>;

struct TypecheckShared {
    root: PathBuf,
    backend: Arc<dyn BuildBackend>,
    board: Arc<StatusBoard>,
    watch: bool,
    references: Mutex<Option<ReferenceMap>>,
}

/// The single workspace-wide type-check process.
///
/// It is fully restarted whenever the set of projects or any project's
/// references change.
#[derive(Clone)]
pub struct TypecheckSession {
    shared: Arc<TypecheckShared>,
    switch: LifecycleSwitch<String>,
}

impl std::fmt::Debug for TypecheckSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypecheckSession")
            .field("phase", &self.switch.phase())
            .field("watch", &self.shared.watch)
            .finish_non_exhaustive()
    }
}

impl TypecheckSession {
    pub fn new(
        root: PathBuf,
        backend: Arc<dyn BuildBackend>,
        board: Arc<StatusBoard>,
        watch: bool,
        debounce: Duration,
    ) -> Self {
        let shared = Arc::new(TypecheckShared {
            root,
            backend,
            board,
            watch,
            references: Mutex::new(None),
        });

        let open_shared = Arc::clone(&shared);
        let switch = LifecycleSwitch::with_debounce("typecheck", debounce, move |_reasons| {
            let shared = Arc::clone(&open_shared);
            async move { shared.open() }
        });

        Self { shared, switch }
    }

    /// Start the checker, or restart it if `references` differ from what
    /// it runs with. Identical references are a no-op.
    pub fn refresh(&self, references: ReferenceMap) {
        let previous = {
            let mut current = lock(&self.shared.references);
            if current.as_ref() == Some(&references) {
                return;
            }
            current.replace(references)
        };

        if previous.is_none() {
            self.switch.start(Some("initial".to_string()));
        } else {
            self.switch.restart(Some("references changed".to_string()));
        }
    }

    pub fn phase(&self) -> SwitchPhase {
        self.switch.phase()
    }

    pub async fn shutdown(&self) {
        self.switch.close(None);
        self.switch.wait_for(SwitchPhase::Closed).await;
    }
}

impl TypecheckShared {
    fn open(self: Arc<Self>) -> anyhow::Result<Closer<String>> {
        let projects = lock(&self.references)
            .as_ref()
            .map(ordered_projects)
            .unwrap_or_default();

        let request = TypecheckRequest {
            root: self.root.clone(),
            projects,
            watch: self.watch,
        };

        self.board.set_typecheck(Status::Loading);
        let (tx, rx) = mpsc::unbounded_channel();
        let process = self.backend.spawn_typecheck(&request, tx).inspect_err(|e| {
            self.board
                .set_typecheck(Status::Error(format!("failed to start type checker: {e}")));
        })?;

        let monitor_shared = Arc::clone(&self);
        tokio::spawn(async move { monitor_shared.monitor(rx).await });

        Ok(closer(move |_reasons| async move {
            process.stop().await;
            Ok(())
        }))
    }

    async fn monitor(&self, mut rx: mpsc::UnboundedReceiver<TypecheckEvent>) {
        while let Some(event) = rx.recv().await {
            match event {
                TypecheckEvent::PassStarted => self.board.set_typecheck(Status::Loading),
                TypecheckEvent::Completed { errors: 0 } => {
                    self.board.set_typecheck(Status::Success);
                }
                TypecheckEvent::Completed { errors } => {
                    self.board
                        .set_typecheck(Status::Error(format!("{errors} type error(s)")));
                }
                TypecheckEvent::Diagnostic(line) => debug!(diagnostic = %line, "typecheck"),
                TypecheckEvent::Exit(code) => {
                    info!(exit_code = code, "type checker exited");
                    let settled = self.board.snapshot().typecheck.is_some_and(|s| s.is_final());
                    if code != 0 && !settled {
                        self.board.set_typecheck(Status::Error(format!(
                            "type checker exited with code {code}"
                        )));
                    } else if !settled {
                        self.board.set_typecheck(Status::Success);
                    }
                    return;
                }
            }
        }
    }
}

/// Projects with their references first, in a stable order.
fn ordered_projects(references: &ReferenceMap) -> Vec<String> {
    fn visit(
        project: &str,
        references: &ReferenceMap,
        seen: &mut Vec<String>,
        out: &mut Vec<String>,
    ) {
        if seen.iter().any(|s| s == project) {
            return;
        }
        seen.push(project.to_string());
        for dep in references.get(project).into_iter().flatten() {
            visit(dep, references, seen, out);
        }
        out.push(project.to_string());
    }

    let mut seen = Vec::new();
    let mut out = Vec::new();
    for project in references.keys() {
        visit(project, references, &mut seen, &mut out);
    }
    out
}
