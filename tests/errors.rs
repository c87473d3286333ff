use watchbuild::errors::WatchbuildError;

#[test]
fn process_failure_names_the_project() {
    let err = WatchbuildError::ProcessFailure {
        project: "core".to_string(),
        message: "bundler exited with code 2".to_string(),
    };
    assert_eq!(
        err.to_string(),
        "Process failure in project 'core': bundler exited with code 2"
    );
    assert_eq!(err.reason(), "bundler exited with code 2");
    assert!(!err.is_structural());
}

#[test]
fn other_errors_report_their_display_text() {
    let err = WatchbuildError::DependencyCycle {
        path: vec!["a".to_string(), "b".to_string(), "a".to_string()],
    };
    assert!(err.is_structural());
    assert_eq!(err.reason(), "Dependency cycle detected: a -> b -> a");
}
