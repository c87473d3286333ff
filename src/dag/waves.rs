// src/dag/waves.rs

use crate::dag::graph::DependencyGraph;
use crate::errors::Result;

/// Split the graph into build waves.
///
/// Each wave holds the current leaves; they are removed before the next wave
/// is computed, so a project only appears after all of its dependencies.
/// Fails with the cycle error if the graph does not allow cycles and has one.
/// If cycles are allowed, whatever remains once no leaves are left forms a
/// final wave in overall order.
pub fn build_waves(graph: &DependencyGraph) -> Result<Vec<Vec<String>>> {
    // Surfaces cycles before the graph is consumed.
    graph.overall_order(false)?;

    let mut remaining = graph.clone();
    let mut waves = Vec::new();

    while !remaining.is_empty() {
        let leaves = remaining.overall_order(true)?;
        if leaves.is_empty() {
            waves.push(remaining.overall_order(false)?);
            break;
        }
        for leaf in leaves.iter() {
            remaining.remove_node(leaf);
        }
        waves.push(leaves);
    }

    Ok(waves)
}
