use std::error::Error;

use watchbuild::dag::{build_waves, DependencyGraph};
use watchbuild::errors::WatchbuildError;
use watchbuild::orchestrator::build_graph;
use watchbuild_test_utils::builders::{ProjectConfigBuilder, WorkspaceConfigBuilder};

type TestResult = Result<(), Box<dyn Error>>;

fn graph(nodes: &[&str], edges: &[(&str, &str)], allow_cycles: bool) -> DependencyGraph {
    let mut g = if allow_cycles {
        DependencyGraph::with_cycles_allowed()
    } else {
        DependencyGraph::new()
    };
    for n in nodes {
        g.add_node(*n);
    }
    for (from, to) in edges {
        g.add_dependency(from, to).expect("nodes exist");
    }
    g
}

fn position(order: &[String], id: &str) -> usize {
    order.iter().position(|n| n == id).expect("node in order")
}

#[test]
fn chain_orders_dependencies_first() -> TestResult {
    let g = graph(&["A", "B", "C"], &[("A", "B"), ("B", "C")], false);
    assert_eq!(g.overall_order(false)?, vec!["C", "B", "A"]);
    assert_eq!(g.overall_order(true)?, vec!["C"]);
    Ok(())
}

#[test]
fn diamond_lists_each_node_once_after_its_dependencies() -> TestResult {
    let g = graph(
        &["app", "ui", "api", "core"],
        &[("app", "ui"), ("app", "api"), ("ui", "core"), ("api", "core")],
        false,
    );
    let order = g.overall_order(false)?;
    assert_eq!(order.len(), 4);
    assert!(position(&order, "core") < position(&order, "ui"));
    assert!(position(&order, "core") < position(&order, "api"));
    assert!(position(&order, "ui") < position(&order, "app"));
    assert!(position(&order, "api") < position(&order, "app"));
    Ok(())
}

#[test]
fn independent_nodes_keep_insertion_order() -> TestResult {
    let g = graph(&["x", "y", "z"], &[], false);
    assert_eq!(g.overall_order(false)?, vec!["x", "y", "z"]);
    assert_eq!(g.overall_order(true)?, vec!["x", "y", "z"]);
    assert!(DependencyGraph::new().overall_order(false)?.is_empty());
    Ok(())
}

#[test]
fn cycle_error_names_the_whole_path() {
    let g = graph(&["A", "B"], &[("A", "B"), ("B", "A")], false);
    let err = g.overall_order(false).unwrap_err();

    assert!(err.is_structural());
    match &err {
        WatchbuildError::DependencyCycle { path } => {
            assert_eq!(path.first(), path.last());
            assert!(path.contains(&"A".to_string()));
            assert!(path.contains(&"B".to_string()));
        }
        other => panic!("expected a cycle error, got {other:?}"),
    }
    let msg = err.to_string();
    assert!(msg.contains("A") && msg.contains("B") && msg.contains(" -> "));
}

#[test]
fn cycle_deep_in_the_graph_is_reported_without_its_entry() {
    let g = graph(
        &["root", "a", "b", "c"],
        &[("root", "a"), ("a", "b"), ("b", "c"), ("c", "a")],
        false,
    );
    match g.overall_order(true) {
        Err(WatchbuildError::DependencyCycle { path }) => {
            assert_eq!(path, vec!["a", "b", "c", "a"]);
        }
        other => panic!("expected a cycle error, got {other:?}"),
    }
}

#[test]
fn allowed_cycle_visits_every_node_exactly_once() -> TestResult {
    let g = graph(&["A", "B"], &[("A", "B"), ("B", "A")], true);
    let mut order = g.overall_order(false)?;
    order.sort();
    assert_eq!(order, vec!["A", "B"]);

    let waves = build_waves(&g)?;
    assert_eq!(waves.len(), 1);
    assert_eq!(waves[0].len(), 2);
    Ok(())
}

#[test]
fn edges_to_unknown_nodes_are_rejected() {
    let mut g = DependencyGraph::new();
    g.add_node("a");
    let err = g.add_dependency("a", "missing").unwrap_err();
    assert!(matches!(err, WatchbuildError::NodeNotFound(ref id) if id == "missing"));
    assert!(err.is_structural());
}

#[test]
fn removing_a_node_drops_its_edges() -> TestResult {
    let mut g = graph(&["a", "b", "c"], &[("a", "b"), ("b", "c")], false);

    assert!(g.remove_node("b"));
    assert!(!g.remove_node("b"));
    assert!(g.dependencies_of("a").is_empty());
    assert!(g.dependants_of("c").is_empty());
    assert_eq!(g.overall_order(false)?, vec!["a", "c"]);
    Ok(())
}

#[test]
fn dependency_edges_can_be_removed() -> TestResult {
    let mut g = graph(&["a", "b"], &[("a", "b")], false);
    g.add_dependency("a", "b")?;
    assert_eq!(g.dependencies_of("a"), ["b".to_string()]);

    g.remove_dependency("a", "b");
    assert_eq!(g.overall_order(true)?, vec!["a", "b"]);
    Ok(())
}

#[test]
fn transitive_dependants_follow_reverse_edges() {
    let g = graph(
        &["typings", "core", "app", "docs"],
        &[("core", "typings"), ("app", "core"), ("docs", "typings")],
        false,
    );
    let mut dependants = g.transitive_dependants("typings");
    dependants.sort();
    assert_eq!(dependants, vec!["app", "core", "docs"]);
    assert!(g.transitive_dependants("app").is_empty());
}

#[test]
fn chain_builds_in_one_wave_per_level() -> TestResult {
    let g = graph(
        &["typings", "core", "app"],
        &[("core", "typings"), ("app", "core")],
        false,
    );
    assert_eq!(
        build_waves(&g)?,
        vec![vec!["typings"], vec!["core"], vec!["app"]]
    );
    Ok(())
}

#[test]
fn independent_projects_share_a_wave() -> TestResult {
    let g = graph(
        &["utils", "typings", "core", "app"],
        &[("core", "typings"), ("core", "utils"), ("app", "core")],
        false,
    );
    let waves = build_waves(&g)?;
    assert_eq!(waves.len(), 3);

    let mut first = waves[0].clone();
    first.sort();
    assert_eq!(first, vec!["typings", "utils"]);
    assert_eq!(waves[1], vec!["core"]);
    assert_eq!(waves[2], vec!["app"]);
    Ok(())
}

#[test]
fn waves_refuse_a_cyclic_graph() {
    let g = graph(&["a", "b", "c"], &[("b", "a"), ("a", "b")], false);
    assert!(matches!(
        build_waves(&g),
        Err(WatchbuildError::DependencyCycle { .. })
    ));
}

#[test]
fn workspace_graph_follows_project_deps() -> TestResult {
    let config = WorkspaceConfigBuilder::new()
        .with_project("app", ProjectConfigBuilder::new("app").dep("core").build())
        .with_project("core", ProjectConfigBuilder::new("core").build())
        .build();
    let graph = build_graph(&config, &config.resolved_projects())?;
    assert_eq!(graph.overall_order(false)?, vec!["core", "app"]);

    let cyclic = WorkspaceConfigBuilder::new()
        .allow_cycles()
        .with_project("a", ProjectConfigBuilder::new("a").dep("b").build())
        .with_project("b", ProjectConfigBuilder::new("b").dep("a").build())
        .build();
    let graph = build_graph(&cyclic, &cyclic.resolved_projects())?;
    assert_eq!(build_waves(&graph)?.concat().len(), 2);
    Ok(())
}
