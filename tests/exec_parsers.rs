use std::error::Error;

use watchbuild::exec::bundler::parse_bundler_line;
use watchbuild::exec::installer::{attribute_failures, describe, parse_install_line};
use watchbuild::exec::typecheck::parse_typecheck_line;
use watchbuild::exec::{render_template, BundlerEvent, InstallEvent, TypecheckEvent};

type TestResult = Result<(), Box<dyn Error>>;

#[test]
fn install_lines_parse_into_typed_events() {
    assert_eq!(
        parse_install_line(
            r#"{"type":"step","data":{"message":"Resolving packages...","current":1,"total":4}}"#
        ),
        vec![InstallEvent::Step {
            message: "Resolving packages...".to_string(),
            current: 1,
            total: 4,
        }]
    );
    assert_eq!(
        parse_install_line(r#"{"type":"activityTick","data":{"id":3,"name":"left-pad"}}"#),
        vec![InstallEvent::ActivityTick {
            id: 3,
            name: "left-pad".to_string(),
        }]
    );
    assert_eq!(
        parse_install_line(r#"{"type":"progressStart","data":{"id":1,"total":120}}"#),
        vec![InstallEvent::ProgressStart { id: 1, total: 120 }]
    );
    assert_eq!(
        parse_install_line(r#"{"type":"success","data":"Saved lockfile."}"#),
        vec![InstallEvent::Success("Saved lockfile.".to_string())]
    );
    assert_eq!(
        parse_install_line(r#"  {"type":"error","data":"core/left-pad: not found"}  "#),
        vec![InstallEvent::Error("core/left-pad: not found".to_string())]
    );
}

#[test]
fn unknown_install_lines_are_kept_as_output() {
    assert_eq!(
        parse_install_line("warning: something odd"),
        vec![InstallEvent::Output("warning: something odd".to_string())]
    );
    assert_eq!(
        parse_install_line(r#"{"type":"telemetry","data":{}}"#),
        vec![InstallEvent::Output(r#"{"type":"telemetry","data":{}}"#.to_string())]
    );
    assert!(parse_install_line("   ").is_empty());
}

#[test]
fn install_progress_is_described() {
    let step = InstallEvent::Step {
        message: "Linking".to_string(),
        current: 3,
        total: 4,
    };
    assert_eq!(describe(&step).as_deref(), Some("[3/4] Linking"));
    assert_eq!(describe(&InstallEvent::ActivityEnd { id: 1 }), None);
}

#[test]
fn install_errors_are_attributed_by_project_prefix() {
    let events = vec![
        InstallEvent::Step {
            message: "Fetching".to_string(),
            current: 1,
            total: 1,
        },
        InstallEvent::Error("core/left-pad: couldn't find package".to_string()),
        InstallEvent::Error("network hiccup".to_string()),
    ];
    let failed = attribute_failures(&events, ["core", "app", "core-utils"]);
    assert_eq!(failed.into_iter().collect::<Vec<_>>(), vec!["core"]);

    let none = attribute_failures(&events[2..], ["core", "app"]);
    assert!(none.is_empty());
}

#[test]
fn overlapping_project_names_are_not_blamed() {
    let events = vec![
        InstallEvent::Error("app-core/left-pad: package not found".to_string()),
        InstallEvent::Error("error \"web/react@99\" has no matching version".to_string()),
        InstallEvent::Error("couldn't fetch @tools/cli".to_string()),
    ];
    let failed = attribute_failures(&events, ["core", "app-core", "web", "cli", "tools"]);
    assert_eq!(
        failed.into_iter().collect::<Vec<_>>(),
        vec!["app-core", "tools", "web"]
    );
}

#[test]
fn typecheck_markers_are_recognised() {
    assert_eq!(
        parse_typecheck_line("12:00:01 - Found 3 errors. Watching for file changes."),
        vec![TypecheckEvent::Completed { errors: 3 }]
    );
    assert_eq!(
        parse_typecheck_line("Found 1 error."),
        vec![TypecheckEvent::Completed { errors: 1 }]
    );
    assert_eq!(
        parse_typecheck_line("12:00:00 - Starting compilation in watch mode..."),
        vec![TypecheckEvent::PassStarted]
    );
    assert_eq!(
        parse_typecheck_line("12:00:05 - File change detected. Starting incremental compilation..."),
        vec![TypecheckEvent::PassStarted]
    );
    assert_eq!(
        parse_typecheck_line("src/a.ts(1,7): error TS2322: Type 'string' is not assignable"),
        vec![TypecheckEvent::Diagnostic(
            "src/a.ts(1,7): error TS2322: Type 'string' is not assignable".to_string()
        )]
    );
    assert!(parse_typecheck_line("").is_empty());
}

#[test]
fn bundler_codes_parse_bare_and_as_json() {
    assert_eq!(parse_bundler_line("START"), vec![BundlerEvent::Start]);
    assert_eq!(parse_bundler_line("BUNDLE_START"), vec![BundlerEvent::BundleStart]);
    assert_eq!(
        parse_bundler_line(r#"{"code":"BUNDLE_END","duration":42}"#),
        vec![BundlerEvent::BundleEnd {
            duration_ms: Some(42)
        }]
    );
    assert_eq!(parse_bundler_line("END"), vec![BundlerEvent::End]);
    assert_eq!(
        parse_bundler_line("ERROR could not resolve './missing'"),
        vec![BundlerEvent::Error("could not resolve './missing'".to_string())]
    );
    assert_eq!(
        parse_bundler_line(r#"{"code":"ERROR","error":"syntax error"}"#),
        vec![BundlerEvent::Error("syntax error".to_string())]
    );
    assert_eq!(
        parse_bundler_line(r#"{"code":"ERROR"}"#),
        vec![BundlerEvent::Error("bundle failed".to_string())]
    );
    assert_eq!(
        parse_bundler_line("created dist/index.mjs in 40ms"),
        vec![BundlerEvent::Output("created dist/index.mjs in 40ms".to_string())]
    );
}

#[test]
fn terminal_bundler_events() {
    assert!(BundlerEvent::End.is_terminal());
    assert!(BundlerEvent::Error("x".to_string()).is_terminal());
    assert!(BundlerEvent::Exit(0).is_terminal());
    assert!(!BundlerEvent::BundleEnd { duration_ms: None }.is_terminal());
    assert!(!BundlerEvent::Start.is_terminal());
}

#[test]
fn templates_substitute_known_placeholders() {
    let rendered = render_template(
        "rollup -c {watch} --environment PROJECT:{project}",
        &[("watch", String::new()), ("project", "core".to_string())],
    );
    assert_eq!(rendered, "rollup -c --environment PROJECT:core");

    let untouched = render_template("tsc {unknown}", &[("refs", "a b".to_string())]);
    assert_eq!(untouched, "tsc {unknown}");
}

#[cfg(unix)]
mod real_processes {
    use super::*;

    use std::collections::BTreeMap;
    use std::sync::Arc;

    use tokio::sync::mpsc;
    use watchbuild::exec::{BuildBackend, BundleRequest, CommandBackend, TypecheckRequest};
    use watchbuild::orchestrator::BundlerConfig;
    use watchbuild::types::OutputFormat;
    use watchbuild_test_utils::with_timeout;

    fn bundler_config(path: &str) -> BundlerConfig {
        BundlerConfig {
            name: "core".to_string(),
            path: path.to_string(),
            entry: "index.ts".to_string(),
            formats: vec![OutputFormat::Esm, OutputFormat::Cjs],
            profiles: vec!["default".to_string()],
            externals: vec![],
            out_dir: "dist".to_string(),
            dependencies: BTreeMap::new(),
            types_entry: "dist/typings/index.d.ts".to_string(),
        }
    }

    fn backend(bundle_cmd: &str) -> Arc<CommandBackend> {
        Arc::new(CommandBackend::new(
            "true",
            "echo 'Found 2 errors.'; exit 2",
            bundle_cmd,
        ))
    }

    async fn collect<E>(mut rx: mpsc::UnboundedReceiver<E>) -> Vec<E> {
        let mut out = Vec::new();
        while let Some(event) = rx.recv().await {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn bundler_output_and_exit_code_become_events() -> TestResult {
        let dir = tempfile::tempdir()?;
        std::fs::create_dir_all(dir.path().join("core"))?;
        let backend = backend("echo START; echo BUNDLE_START; echo $WATCHBUILD_FORMATS; echo END");

        let (tx, rx) = mpsc::unbounded_channel();
        let request = BundleRequest {
            root: dir.path().to_path_buf(),
            config: bundler_config("core"),
            watch: false,
        };
        let process = backend.spawn_bundler(&request, tx)?;
        with_timeout(process.wait()).await;

        assert_eq!(
            with_timeout(collect(rx)).await,
            vec![
                BundlerEvent::Start,
                BundlerEvent::BundleStart,
                BundlerEvent::Output("esm,cjs".to_string()),
                BundlerEvent::End,
                BundlerEvent::Exit(0),
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn type_checker_exit_code_is_reported() -> TestResult {
        let dir = tempfile::tempdir()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let request = TypecheckRequest {
            root: dir.path().to_path_buf(),
            projects: vec!["core".to_string()],
            watch: false,
        };
        let process = backend("true").spawn_typecheck(&request, tx)?;
        with_timeout(process.wait()).await;

        assert_eq!(
            with_timeout(collect(rx)).await,
            vec![TypecheckEvent::Completed { errors: 2 }, TypecheckEvent::Exit(2)]
        );
        Ok(())
    }

    #[tokio::test]
    async fn stopped_process_sends_no_exit() -> TestResult {
        let dir = tempfile::tempdir()?;
        std::fs::create_dir_all(dir.path().join("core"))?;
        let backend = backend("echo START; exec sleep 30");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let request = BundleRequest {
            root: dir.path().to_path_buf(),
            config: bundler_config("core"),
            watch: true,
        };
        let process = backend.spawn_bundler(&request, tx)?;
        assert_eq!(with_timeout(rx.recv()).await, Some(BundlerEvent::Start));

        with_timeout(process.stop()).await;
        let rest = with_timeout(collect(rx)).await;
        assert!(!rest.iter().any(|e| matches!(e, BundlerEvent::Exit(_))));
        Ok(())
    }
}
