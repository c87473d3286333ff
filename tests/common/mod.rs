#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use watchbuild::config::WorkspaceConfig;
use watchbuild::orchestrator::{OrchestratorOptions, StatusBoard, StatusSnapshot};
use watchbuild_test_utils::builders::{ProjectConfigBuilder, WorkspaceConfigBuilder};
use watchbuild_test_utils::memory_fs::MemoryFileSystem;
use watchbuild_test_utils::with_timeout;

pub const ROOT: &str = "/ws";

pub fn root() -> PathBuf {
    PathBuf::from(ROOT)
}

pub fn options() -> OrchestratorOptions {
    OrchestratorOptions {
        root: root(),
        ..OrchestratorOptions::default()
    }
}

/// `typings` <- `core` <- `app`.
pub fn chain_config() -> WorkspaceConfig {
    chain_builder().build()
}

pub fn chain_builder() -> WorkspaceConfigBuilder {
    WorkspaceConfigBuilder::new()
        .with_parallel(4)
        .with_project("typings", ProjectConfigBuilder::new("packages/typings").build())
        .with_project(
            "core",
            ProjectConfigBuilder::new("packages/core")
                .dep("typings")
                .dependency("lodash", "^4.17.21")
                .build(),
        )
        .with_project(
            "app",
            ProjectConfigBuilder::new("packages/app").dep("core").build(),
        )
}

/// An in-memory workspace with an `index.ts` in each of `paths`.
pub fn workspace_fs(paths: &[&str]) -> Arc<MemoryFileSystem> {
    let fs = MemoryFileSystem::new();
    fs.add_file(format!("{ROOT}/watchbuild.toml"), "");
    for path in paths {
        fs.add_file(format!("{ROOT}/{path}/index.ts"), "export {};\n");
        fs.add_file(format!("{ROOT}/{path}/index.test.ts"), "");
    }
    Arc::new(fs)
}

pub fn chain_fs() -> Arc<MemoryFileSystem> {
    workspace_fs(&["packages/typings", "packages/core", "packages/app"])
}

/// Wait for a board snapshot satisfying `pred`, failing the test after 5s.
pub async fn wait_for<F>(board: &StatusBoard, pred: F) -> StatusSnapshot
where
    F: FnMut(&StatusSnapshot) -> bool,
{
    with_timeout(board.wait_until(pred))
        .await
        .expect("status board stopped")
}

pub fn all_succeeded(snapshot: &StatusSnapshot, projects: &[&str]) -> bool {
    projects
        .iter()
        .all(|p| snapshot.project(p).is_some_and(|s| !s.is_error() && s.is_final()))
}

/// Let every pending timer and task run.
pub async fn settle() {
    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
}
