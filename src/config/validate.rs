// src/config/validate.rs

use std::collections::BTreeMap;

use globset::Glob;

use crate::config::model::{normalize_project_path, RawWorkspaceConfig, WorkspaceConfig};
use crate::errors::{Result, WatchbuildError};

impl TryFrom<RawWorkspaceConfig> for WorkspaceConfig {
    type Error = WatchbuildError;

    fn try_from(raw: RawWorkspaceConfig) -> std::result::Result<Self, Self::Error> {
        validate_config(&raw)?;
        Ok(WorkspaceConfig::new_unchecked(
            raw.workspace,
            raw.default,
            raw.project,
        ))
    }
}

/// Semantic checks on a deserialized config.
///
/// Dependency cycles are not rejected here; they surface when the project
/// graph is ordered, where `allow_cycles` decides how they are handled.
pub fn validate_config(cfg: &RawWorkspaceConfig) -> Result<()> {
    ensure_has_projects(cfg)?;
    validate_workspace_section(cfg)?;
    validate_project_paths(cfg)?;
    validate_project_dependencies(cfg)?;
    validate_patterns(cfg)?;
    Ok(())
}

fn ensure_has_projects(cfg: &RawWorkspaceConfig) -> Result<()> {
    if cfg.project.is_empty() {
        return Err(WatchbuildError::ConfigError(
            "config must contain at least one [project.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_workspace_section(cfg: &RawWorkspaceConfig) -> Result<()> {
    if cfg.workspace.parallel == Some(0) {
        return Err(WatchbuildError::ConfigError(
            "[workspace].parallel must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.workspace.out_dir.trim().is_empty() {
        return Err(WatchbuildError::ConfigError(
            "[workspace].out_dir must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_project_paths(cfg: &RawWorkspaceConfig) -> Result<()> {
    let mut seen: BTreeMap<String, &str> = BTreeMap::new();
    for (name, project) in cfg.project.iter() {
        let path = normalize_project_path(&project.path);
        if path.is_empty() {
            return Err(WatchbuildError::ConfigError(format!(
                "project '{name}' has an empty `path`"
            )));
        }
        if let Some(other) = seen.insert(path.clone(), name) {
            return Err(WatchbuildError::ConfigError(format!(
                "projects '{other}' and '{name}' share the path '{path}'"
            )));
        }
    }
    Ok(())
}

fn validate_project_dependencies(cfg: &RawWorkspaceConfig) -> Result<()> {
    for (name, project) in cfg.project.iter() {
        for dep in project.deps.iter() {
            if dep == name {
                return Err(WatchbuildError::ConfigError(format!(
                    "project '{name}' cannot depend on itself in `deps`"
                )));
            }
            if !cfg.project.contains_key(dep) {
                return Err(WatchbuildError::ConfigError(format!(
                    "project '{name}' has unknown dependency '{dep}' in `deps`"
                )));
            }
        }
    }
    Ok(())
}

fn validate_patterns(cfg: &RawWorkspaceConfig) -> Result<()> {
    let defaults = cfg.default.watch.iter().chain(cfg.default.exclude.iter());
    let per_project = cfg.project.values().flat_map(|p| {
        p.watch
            .iter()
            .flatten()
            .chain(p.exclude.iter().flatten())
    });

    for pattern in defaults.chain(per_project) {
        Glob::new(pattern).map_err(|e| {
            WatchbuildError::ConfigError(format!("invalid glob pattern '{pattern}': {e}"))
        })?;
    }
    Ok(())
}
