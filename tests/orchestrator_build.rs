mod common;

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use common::{chain_config, chain_fs, options, workspace_fs};
use watchbuild::orchestrator::{Orchestrator, Status};
use watchbuild_test_utils::builders::{ProjectConfigBuilder, WorkspaceConfigBuilder};
use watchbuild_test_utils::fake_backend::FakeBackend;
use watchbuild_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test(start_paused = true)]
async fn chain_builds_in_dependency_waves() -> TestResult {
    init_tracing();
    let backend = FakeBackend::new();
    let report = with_timeout(Orchestrator::build(
        chain_config(),
        Arc::new(backend.clone()),
        chain_fs(),
        options(),
    ))
    .await?;

    assert!(report.is_success(), "{report:?}");
    assert_eq!(
        report.waves,
        vec![vec!["typings"], vec!["core"], vec!["app"]]
    );
    assert_eq!(report.succeeded, vec!["typings", "core", "app"]);
    assert_eq!(report.typecheck, Some(Status::Success));

    assert_eq!(backend.bundle_order(), vec!["typings", "core", "app"]);
    assert!(backend.bundles().iter().all(|b| !b.watch));
    assert_eq!(backend.installs().len(), 1);

    let typechecks = backend.typechecks();
    assert_eq!(typechecks.len(), 1);
    assert!(!typechecks[0].watch);
    assert_eq!(
        typechecks[0].projects,
        vec!["packages/typings", "packages/core", "packages/app"]
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn independent_projects_share_a_wave() -> TestResult {
    init_tracing();
    let backend = FakeBackend::new();
    let config = WorkspaceConfigBuilder::new()
        .with_parallel(4)
        .with_project("base", ProjectConfigBuilder::new("base").build())
        .with_project("left", ProjectConfigBuilder::new("left").dep("base").build())
        .with_project("right", ProjectConfigBuilder::new("right").dep("base").build())
        .build();

    let report = with_timeout(Orchestrator::build(
        config,
        Arc::new(backend.clone()),
        workspace_fs(&["base", "left", "right"]),
        options(),
    ))
    .await?;

    assert_eq!(report.waves, vec![vec!["base"], vec!["left", "right"]]);
    assert_eq!(report.succeeded, vec!["base", "left", "right"]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn failed_bundle_skips_its_dependants() -> TestResult {
    init_tracing();
    let backend = FakeBackend::new();
    backend.fail_bundle_for("core");

    let report = with_timeout(Orchestrator::build(
        chain_config(),
        Arc::new(backend.clone()),
        chain_fs(),
        options(),
    ))
    .await?;

    assert!(!report.is_success());
    assert_eq!(report.succeeded, vec!["typings"]);
    assert_eq!(
        report.failed.get("core").map(String::as_str),
        Some("core: could not resolve entry")
    );
    assert_eq!(
        report.failed.get("app").map(String::as_str),
        Some("dependency 'core' failed")
    );
    assert_eq!(backend.bundle_count("app"), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn failed_install_skips_the_project_and_its_dependants() -> TestResult {
    init_tracing();
    let backend = FakeBackend::new();
    backend.fail_install_for("core");

    let report = with_timeout(Orchestrator::build(
        chain_config(),
        Arc::new(backend.clone()),
        chain_fs(),
        options(),
    ))
    .await?;

    let core = report.failed.get("core").ok_or("core did not fail")?;
    assert!(core.starts_with("install failed: "), "{core}");
    assert!(core.contains("core/left-pad"));
    assert_eq!(
        report.failed.get("app").map(String::as_str),
        Some("dependency 'core' failed")
    );
    assert_eq!(report.succeeded, vec!["typings"]);
    assert_eq!(backend.bundle_order(), vec!["typings"]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn type_errors_fail_the_build_without_blocking_bundles() -> TestResult {
    init_tracing();
    let backend = FakeBackend::new();
    backend.set_type_errors(3);

    let report = with_timeout(Orchestrator::build(
        chain_config(),
        Arc::new(backend.clone()),
        chain_fs(),
        options(),
    ))
    .await?;

    assert!(report.failed.is_empty());
    assert_eq!(report.succeeded.len(), 3);
    assert!(report.typecheck.as_ref().is_some_and(Status::is_error));
    assert!(!report.is_success());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn cycle_is_a_structural_error() {
    init_tracing();
    let backend = FakeBackend::new();
    let config = WorkspaceConfigBuilder::new()
        .with_project("a", ProjectConfigBuilder::new("a").dep("b").build())
        .with_project("b", ProjectConfigBuilder::new("b").dep("a").build())
        .build();

    let err = with_timeout(Orchestrator::build(
        config,
        Arc::new(backend.clone()),
        workspace_fs(&["a", "b"]),
        options(),
    ))
    .await
    .unwrap_err();

    assert!(err.is_structural());
    assert!(err.to_string().contains("a -> b") || err.to_string().contains("b -> a"));
    assert!(backend.bundles().is_empty());
}

#[tokio::test(start_paused = true)]
async fn parallel_limit_bounds_each_wave() -> TestResult {
    init_tracing();
    let backend = FakeBackend::new();
    backend.set_bundle_delay(Duration::from_millis(100));

    let mut builder = WorkspaceConfigBuilder::new().with_parallel(2);
    let names = ["p1", "p2", "p3", "p4", "p5"];
    for name in names {
        builder = builder.with_project(name, ProjectConfigBuilder::new(name).build());
    }

    let report = with_timeout(Orchestrator::build(
        builder.build(),
        Arc::new(backend.clone()),
        workspace_fs(&names),
        options(),
    ))
    .await?;

    assert_eq!(report.waves.len(), 1);
    assert_eq!(report.succeeded.len(), 5);
    assert_eq!(backend.max_active_bundles(), 2);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn parallel_override_takes_precedence() -> TestResult {
    init_tracing();
    let backend = FakeBackend::new();
    backend.set_bundle_delay(Duration::from_millis(100));

    let config = WorkspaceConfigBuilder::new()
        .with_parallel(8)
        .with_project("a", ProjectConfigBuilder::new("a").build())
        .with_project("b", ProjectConfigBuilder::new("b").build())
        .with_project("c", ProjectConfigBuilder::new("c").build())
        .build();
    let mut opts = options();
    opts.overrides.parallel = Some(1);

    let report = with_timeout(Orchestrator::build(
        config,
        Arc::new(backend.clone()),
        workspace_fs(&["a", "b", "c"]),
        opts,
    ))
    .await?;

    assert!(report.is_success());
    assert_eq!(backend.max_active_bundles(), 1);
    Ok(())
}
