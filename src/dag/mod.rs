// src/dag/mod.rs

//! Project dependency graph.
//!
//! - [`graph`] holds the mutable graph and its ordering queries.
//! - [`waves`] groups projects into build waves for single-pass builds.

pub mod graph;
pub mod waves;

pub use graph::DependencyGraph;
pub use waves::build_waves;
