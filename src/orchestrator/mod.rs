// src/orchestrator/mod.rs

//! The workspace orchestrator.
//!
//! - [`stages`] defines the derived-config chain of a project and the pure
//!   functions between its stages.
//! - [`project`] wires one project's stages into reactive streams.
//! - [`install`] merges manifests into serialized installer runs.
//! - [`typecheck`] owns the workspace-wide type checker.
//! - [`session`] runs per-project bundler sessions.
//! - [`status`] aggregates everything into one observable status board.
//! - [`workspace`] ties these together for dev mode; [`build`] performs a
//!   single pass.

pub mod build;
pub mod install;
pub mod project;
pub mod session;
pub mod stages;
pub mod status;
pub mod typecheck;
pub mod workspace;

pub use build::BuildReport;
pub use install::{CombinedManifest, InstallCoordinator};
pub use project::ProjectNode;
pub use stages::{
    derive_bundler, derive_manifest, derive_typecheck, is_source_file, BundlerConfig,
    InstallStatus, Manifest, ProjectSnapshot, TypecheckConfig,
};
pub use status::{Status, StatusBoard, StatusSnapshot};
pub use typecheck::{ReferenceMap, TypecheckSession};
pub use workspace::{build_graph, Orchestrator, OrchestratorOptions};
