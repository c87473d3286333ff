// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{RawWorkspaceConfig, WorkspaceConfig};
use crate::errors::Result;

/// File name of the workspace config, looked up in the workspace root.
pub const CONFIG_FILE_NAME: &str = "watchbuild.toml";

/// Read and deserialize a config file without semantic validation.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawWorkspaceConfig> {
    let contents = fs::read_to_string(path.as_ref())?;
    parse_str(&contents)
}

pub fn parse_str(contents: &str) -> Result<RawWorkspaceConfig> {
    Ok(toml::from_str(contents)?)
}

/// Load a config file and validate it.
///
/// This is the entry point the rest of the crate uses.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<WorkspaceConfig> {
    let raw = load_from_path(path)?;
    WorkspaceConfig::try_from(raw)
}

/// `<root>/watchbuild.toml`.
pub fn config_path_in(root: impl AsRef<Path>) -> PathBuf {
    root.as_ref().join(CONFIG_FILE_NAME)
}
