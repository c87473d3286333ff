// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WatchbuildError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// An edge referenced a node that was never added to the graph.
    #[error("Node does not exist: {0}")]
    NodeNotFound(String),

    /// Dependency cycle; `path` starts and ends with the same node.
    #[error("Dependency cycle detected: {}", .path.join(" -> "))]
    DependencyCycle { path: Vec<String> },

    #[error("Process failure in project '{project}': {message}")]
    ProcessFailure { project: String, message: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl WatchbuildError {
    /// Structural graph errors abort the current orchestration pass.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            WatchbuildError::NodeNotFound(_) | WatchbuildError::DependencyCycle { .. }
        )
    }

    /// Message suitable for a status line; process failures drop the
    /// project prefix the status already carries.
    pub fn reason(&self) -> String {
        match self {
            WatchbuildError::ProcessFailure { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, WatchbuildError>;
