#![allow(dead_code)]

use std::collections::BTreeMap;
use watchbuild::config::{
    DefaultSection, ProjectConfig, RawWorkspaceConfig, WorkspaceConfig, WorkspaceSection,
};
use watchbuild::types::OutputFormat;

/// Builder for `WorkspaceConfig` to simplify test setup.
pub struct WorkspaceConfigBuilder {
    config: RawWorkspaceConfig,
}

impl WorkspaceConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: RawWorkspaceConfig {
                workspace: WorkspaceSection::default(),
                default: DefaultSection::default(),
                project: BTreeMap::new(),
            },
        }
    }

    pub fn with_project(mut self, name: &str, project: ProjectConfig) -> Self {
        self.config.project.insert(name.to_string(), project);
        self
    }

    pub fn with_parallel(mut self, parallel: usize) -> Self {
        self.config.workspace.parallel = Some(parallel);
        self
    }

    pub fn with_debounce_ms(mut self, ms: u64) -> Self {
        self.config.workspace.debounce_ms = ms;
        self
    }

    pub fn allow_cycles(mut self) -> Self {
        self.config.workspace.allow_cycles = true;
        self
    }

    pub fn with_default_formats(mut self, formats: &[OutputFormat]) -> Self {
        self.config.default.formats = formats.to_vec();
        self
    }

    /// The raw config, for validation tests.
    pub fn raw(self) -> RawWorkspaceConfig {
        self.config
    }

    pub fn build(self) -> WorkspaceConfig {
        WorkspaceConfig::try_from(self.config).expect("Failed to build valid config from builder")
    }

    /// Skip validation, e.g. to construct a cyclic workspace.
    pub fn build_unchecked(self) -> WorkspaceConfig {
        WorkspaceConfig::new_unchecked(self.config.workspace, self.config.default, self.config.project)
    }
}

impl Default for WorkspaceConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `ProjectConfig`.
pub struct ProjectConfigBuilder {
    project: ProjectConfig,
}

impl ProjectConfigBuilder {
    pub fn new(path: &str) -> Self {
        Self {
            project: ProjectConfig {
                path: path.to_string(),
                deps: vec![],
                entry: None,
                formats: None,
                profiles: None,
                watch: None,
                exclude: None,
                dependencies: BTreeMap::new(),
            },
        }
    }

    pub fn dep(mut self, name: &str) -> Self {
        self.project.deps.push(name.to_string());
        self
    }

    pub fn dependency(mut self, package: &str, version: &str) -> Self {
        self.project
            .dependencies
            .insert(package.to_string(), version.to_string());
        self
    }

    pub fn entry(mut self, entry: &str) -> Self {
        self.project.entry = Some(entry.to_string());
        self
    }

    pub fn formats(mut self, formats: &[OutputFormat]) -> Self {
        self.project.formats = Some(formats.to_vec());
        self
    }

    pub fn watch(mut self, patterns: &[&str]) -> Self {
        self.project.watch = Some(patterns.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn exclude(mut self, patterns: &[&str]) -> Self {
        self.project.exclude = Some(patterns.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn build(self) -> ProjectConfig {
        self.project
    }
}
