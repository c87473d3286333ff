// src/config/mod.rs

//! Configuration loading and validation for watchbuild.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load `watchbuild.toml` from disk (`loader.rs`).
//! - Validate project references, paths and patterns (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{config_path_in, load_and_validate, load_from_path, parse_str, CONFIG_FILE_NAME};
pub use model::{
    normalize_project_path, DefaultSection, Overrides, ProjectConfig, RawWorkspaceConfig,
    ResolvedProject, WorkspaceConfig, WorkspaceSection,
};
pub use validate::validate_config;
