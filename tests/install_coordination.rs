mod common;

use std::collections::BTreeMap;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use common::{chain_config, chain_fs, options, settle, wait_for};
use watchbuild::orchestrator::{
    InstallCoordinator, InstallStatus, Manifest, Orchestrator, Status, StatusBoard,
};
use watchbuild::stream::ValueStream;
use watchbuild_test_utils::builders::ProjectConfigBuilder;
use watchbuild_test_utils::fake_backend::FakeBackend;
use watchbuild_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

fn manifest(name: &str, deps: &[(&str, &str)]) -> Manifest {
    Manifest {
        name: name.to_string(),
        main: "dist/index.mjs".to_string(),
        exports: BTreeMap::new(),
        types: "dist/typings/index.d.ts".to_string(),
        dependencies: deps
            .iter()
            .map(|(p, v)| (p.to_string(), v.to_string()))
            .collect(),
    }
}

fn status_stream(name: &str) -> ValueStream<InstallStatus> {
    ValueStream::with_value(format!("{name}:install"), InstallStatus::Pending)
}

async fn settled(stream: &ValueStream<InstallStatus>) -> InstallStatus {
    with_timeout(async {
        let mut follower = stream.subscribe();
        while let Some(status) = follower.next().await {
            if status != InstallStatus::Pending {
                return status;
            }
        }
        panic!("install status stream stopped");
    })
    .await
}

struct Fixture {
    backend: FakeBackend,
    board: Arc<StatusBoard>,
    installs: InstallCoordinator,
}

fn fixture() -> Fixture {
    init_tracing();
    let backend = FakeBackend::new();
    let board = Arc::new(StatusBoard::new());
    let installs = InstallCoordinator::new(
        "/ws".into(),
        Arc::new(backend.clone()),
        Arc::clone(&board),
        Duration::from_millis(50),
    );
    Fixture {
        backend,
        board,
        installs,
    }
}

#[tokio::test(start_paused = true)]
async fn manifest_changes_in_one_tick_share_one_install() -> TestResult {
    let f = fixture();
    let (core, app) = (status_stream("core"), status_stream("app"));

    f.installs
        .manifest_changed("core", manifest("core", &[("lodash", "^4")]), core.clone());
    f.installs
        .manifest_changed("app", manifest("app", &[("react", "^18")]), app.clone());

    assert_eq!(settled(&core).await, InstallStatus::Installed);
    assert_eq!(settled(&app).await, InstallStatus::Installed);

    let installs = f.backend.installs();
    assert_eq!(installs.len(), 1);
    assert_eq!(installs[0].projects.len(), 2);
    assert_eq!(
        installs[0].dependencies.get("app/react").map(String::as_str),
        Some("^18")
    );
    assert_eq!(f.board.snapshot().install, Some(Status::Success));
    assert_eq!(f.installs.combined(), installs[0]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn unchanged_combined_manifest_skips_the_install() -> TestResult {
    let f = fixture();
    let core = status_stream("core");
    let m = manifest("core", &[("lodash", "^4")]);

    f.installs.manifest_changed("core", m.clone(), core.clone());
    assert_eq!(settled(&core).await, InstallStatus::Installed);

    f.installs.manifest_changed("core", m, core.clone());
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(f.backend.installs().len(), 1);
    assert_eq!(core.current(), Some(InstallStatus::Installed));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn changed_dependencies_install_again_once() -> TestResult {
    let f = fixture();
    let (core, app) = (status_stream("core"), status_stream("app"));
    f.installs
        .manifest_changed("core", manifest("core", &[("lodash", "^4")]), core.clone());
    f.installs
        .manifest_changed("app", manifest("app", &[]), app.clone());
    settled(&app).await;

    f.installs
        .manifest_changed("core", manifest("core", &[("lodash", "^5")]), core.clone());
    f.installs
        .manifest_changed("app", manifest("app", &[("zod", "^3")]), app.clone());
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(f.backend.installs().len(), 2);
    assert_eq!(core.current(), Some(InstallStatus::Installed));
    assert_eq!(app.current(), Some(InstallStatus::Installed));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn failures_are_attributed_to_the_offending_project() -> TestResult {
    let f = fixture();
    f.backend.fail_install_for("core");
    let (core, app) = (status_stream("core"), status_stream("app"));

    f.installs
        .manifest_changed("core", manifest("core", &[("left-pad", "^9")]), core.clone());
    f.installs
        .manifest_changed("app", manifest("app", &[]), app.clone());

    match settled(&core).await {
        InstallStatus::Failed(msg) => assert!(msg.contains("core/left-pad")),
        other => panic!("expected core to fail, got {other:?}"),
    }
    assert_eq!(settled(&app).await, InstallStatus::Installed);
    assert!(f.board.snapshot().install.is_some_and(|s| s.is_error()));

    // Nothing was recorded as installed, so the same manifests retry.
    f.backend.clear_install_failures();
    f.installs
        .manifest_changed("core", manifest("core", &[("left-pad", "^9")]), core.clone());
    let board = Arc::clone(&f.board);
    wait_for(&board, |s| s.install == Some(Status::Success)).await;
    assert_eq!(core.current(), Some(InstallStatus::Installed));
    assert_eq!(f.backend.installs().len(), 2);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn removed_projects_leave_the_combined_manifest() -> TestResult {
    let f = fixture();
    let (core, app) = (status_stream("core"), status_stream("app"));
    f.installs
        .manifest_changed("core", manifest("core", &[("lodash", "^4")]), core.clone());
    f.installs
        .manifest_changed("app", manifest("app", &[]), app.clone());
    settled(&core).await;

    f.installs.remove_project("app");
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(f.installs.combined().projects.len(), 1);
    let installs = f.backend.installs();
    assert_eq!(installs.len(), 2);
    assert!(!installs[1].projects.contains("app"));

    f.installs.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn dev_reload_touching_two_manifests_installs_once_more() -> TestResult {
    init_tracing();
    let backend = FakeBackend::new();
    let orchestrator = Orchestrator::start(
        chain_config(),
        Arc::new(backend.clone()),
        chain_fs(),
        options(),
    )
    .await?;
    let board = orchestrator.status();
    wait_for(&board, |s| s.project("app") == Some(&Status::Success)).await;
    assert_eq!(backend.installs().len(), 1);

    let reloaded = common::chain_builder()
        .with_project(
            "core",
            ProjectConfigBuilder::new("packages/core")
                .dep("typings")
                .dependency("lodash", "^5.0.0")
                .build(),
        )
        .with_project(
            "app",
            ProjectConfigBuilder::new("packages/app")
                .dep("core")
                .dependency("zod", "^3.23.0")
                .build(),
        )
        .build();
    orchestrator.reload(reloaded).await?;
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(backend.installs().len(), 2);
    let combined = orchestrator.combined_manifest();
    assert_eq!(
        combined.dependencies.get("core/lodash").map(String::as_str),
        Some("^5.0.0")
    );
    assert!(combined.dependencies.contains_key("app/zod"));

    orchestrator.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn failed_install_does_not_block_unrelated_projects() -> TestResult {
    init_tracing();
    let backend = FakeBackend::new();
    backend.fail_install_for("core");

    let config = common::chain_builder()
        .with_project(
            "core",
            ProjectConfigBuilder::new("packages/core")
                .dependency("left-pad", "^9.9.9")
                .build(),
        )
        .build();
    let orchestrator =
        Orchestrator::start(config, Arc::new(backend.clone()), chain_fs(), options()).await?;
    let board = orchestrator.status();

    let snapshot = wait_for(&board, |s| {
        s.project("typings") == Some(&Status::Success)
            && s.project("core").is_some_and(Status::is_error)
    })
    .await;

    match snapshot.project("core") {
        Some(Status::Error(msg)) => assert!(msg.starts_with("install failed")),
        other => panic!("expected core to fail, got {other:?}"),
    }
    assert_eq!(backend.bundle_count("typings"), 1);
    assert_eq!(backend.bundle_count("core"), 0);
    // app waits on core and is never bundled.
    settle().await;
    assert_eq!(board.project("app"), Some(Status::Loading));
    assert_eq!(backend.bundle_count("app"), 0);

    orchestrator.shutdown().await;
    Ok(())
}
