use std::error::Error;
use std::path::Path;

use watchbuild::config::ResolvedProject;
use watchbuild::watch::{closest_owner, collect_project_files, relative_str, ProjectMatcher, WatchHub};
use watchbuild_test_utils::builders::{ProjectConfigBuilder, WorkspaceConfigBuilder};
use watchbuild_test_utils::memory_fs::MemoryFileSystem;
use watchbuild_test_utils::with_timeout;

type TestResult = Result<(), Box<dyn Error>>;

fn projects() -> Vec<ResolvedProject> {
    WorkspaceConfigBuilder::new()
        .with_project("app", ProjectConfigBuilder::new("apps/web").build())
        .with_project(
            "plugin",
            ProjectConfigBuilder::new("apps/web/plugins/auth")
                .watch(&["src/**"])
                .build(),
        )
        .with_project(
            "core",
            ProjectConfigBuilder::new("packages/core")
                .exclude(&["**/*.snap"])
                .build(),
        )
        .build()
        .resolved_projects()
}

fn matchers() -> Result<Vec<ProjectMatcher>, Box<dyn Error>> {
    Ok(projects()
        .iter()
        .map(ProjectMatcher::new)
        .collect::<anyhow::Result<Vec<_>>>()?)
}

fn matcher(name: &str) -> Result<ProjectMatcher, Box<dyn Error>> {
    matchers()?
        .into_iter()
        .find(|m| m.name() == name)
        .ok_or_else(|| format!("no matcher for {name}").into())
}

#[test]
fn strip_only_accepts_paths_inside_the_project() -> TestResult {
    let core = matcher("core")?;
    assert_eq!(core.root(), "packages/core");
    assert_eq!(core.strip("packages/core/src/a.ts"), Some("src/a.ts"));
    assert_eq!(core.strip("packages/core"), None);
    assert_eq!(core.strip("packages/core-utils/a.ts"), None);
    assert_eq!(core.strip("apps/web/a.ts"), None);
    Ok(())
}

#[test]
fn watch_and_exclude_patterns_apply_to_project_paths() -> TestResult {
    let core = matcher("core")?;
    assert!(core.matches("src/index.ts"));
    assert!(!core.matches("src/__snapshots__/index.snap"));
    assert!(!core.matches("dist/index.mjs"));
    // An explicit exclude list replaces the defaults.
    assert!(core.matches("node_modules/lodash/index.js"));

    let app = matcher("app")?;
    assert!(!app.matches("node_modules/react/index.js"));

    let plugin = matcher("plugin")?;
    assert!(plugin.matches("src/login.ts"));
    assert!(!plugin.matches("README.md"));
    Ok(())
}

#[test]
fn nested_project_owns_its_own_files() -> TestResult {
    let all = matchers()?;
    let owner = |rel: &str| closest_owner(&all, rel).map(|m| m.name().to_string());

    assert_eq!(owner("apps/web/src/main.ts").as_deref(), Some("app"));
    assert_eq!(
        owner("apps/web/plugins/auth/src/login.ts").as_deref(),
        Some("plugin")
    );
    assert_eq!(owner("packages/core/index.ts").as_deref(), Some("core"));
    assert_eq!(owner("docs/guide.md"), None);
    Ok(())
}

#[test]
fn relative_paths_use_forward_slashes() {
    assert_eq!(
        relative_str(Path::new("/ws"), Path::new("/ws/packages/core/a.ts")).as_deref(),
        Some("packages/core/a.ts")
    );
    assert_eq!(relative_str(Path::new("/ws"), Path::new("/elsewhere/a.ts")), None);
}

#[test]
fn project_files_skip_nested_projects_and_dependency_dirs() -> TestResult {
    let fs = MemoryFileSystem::new();
    for file in [
        "/ws/apps/web/index.ts",
        "/ws/apps/web/src/main.ts",
        "/ws/apps/web/node_modules/react/index.js",
        "/ws/apps/web/.git/HEAD",
        "/ws/apps/web/plugins/auth/src/login.ts",
        "/ws/apps/web/plugins/auth/README.md",
    ] {
        fs.add_file(file, "");
    }

    let app = matcher("app")?;
    let files = collect_project_files(
        &fs,
        Path::new("/ws"),
        &app,
        &["apps/web/plugins/auth".to_string()],
    )?;
    assert_eq!(
        files.into_iter().collect::<Vec<_>>(),
        vec!["index.ts", "src/main.ts"]
    );

    let plugin = matcher("plugin")?;
    let files = collect_project_files(&fs, Path::new("/ws"), &plugin, &[])?;
    assert_eq!(files.into_iter().collect::<Vec<_>>(), vec!["src/login.ts"]);

    let missing = collect_project_files(&fs, Path::new("/ws"), &matcher("core")?, &[])?;
    assert!(missing.is_empty());
    Ok(())
}

#[test]
fn watcher_lives_as_long_as_its_subscriptions() -> TestResult {
    let dir = tempfile::tempdir()?;
    let hub = WatchHub::new(dir.path());
    assert!(!hub.is_active());

    let first = hub.subscribe(&[])?;
    let second = hub.subscribe(&["**/*.ts".to_string()])?;
    assert!(hub.is_active());
    assert_eq!(hub.ref_count(), 2);

    drop(first);
    assert!(hub.is_active());
    assert_eq!(hub.ref_count(), 1);

    drop(second);
    assert!(!hub.is_active());
    assert_eq!(hub.ref_count(), 0);

    let _again = hub.subscribe(&[])?;
    assert!(hub.is_active());
    Ok(())
}

#[test]
fn invalid_subscription_pattern_is_rejected() -> TestResult {
    let dir = tempfile::tempdir()?;
    let hub = WatchHub::new(dir.path());
    assert!(hub.subscribe(&["src/[unclosed".to_string()]).is_err());
    assert_eq!(hub.ref_count(), 0);
    Ok(())
}

#[tokio::test]
async fn subscriptions_receive_matching_changes() -> TestResult {
    let dir = tempfile::tempdir()?;
    let hub = WatchHub::new(dir.path());
    let mut ts_only = hub.subscribe(&["**/*.ts".to_string()])?;

    std::fs::write(dir.path().join("notes.md"), "ignored")?;
    std::fs::write(dir.path().join("index.ts"), "export {};")?;

    let change = with_timeout(ts_only.recv()).await.ok_or("subscription closed")?;
    assert!(change.path.ends_with("index.ts"), "{change:?}");
    Ok(())
}
