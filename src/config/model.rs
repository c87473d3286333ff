// src/config/model.rs

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::types::OutputFormat;

/// Workspace configuration exactly as read from `watchbuild.toml`.
///
/// ```toml
/// [workspace]
/// name = "acme"
/// parallel = 4
///
/// [default]
/// watch = ["src/**/*.ts"]
/// formats = ["esm", "cjs"]
///
/// [project.core]
/// path = "packages/core"
/// deps = ["typings"]
///
/// [project.core.dependencies]
/// lodash = "^4.17.21"
/// ```
///
/// Use [`WorkspaceConfig::try_from`] to obtain a validated config.
#[derive(Debug, Clone, Deserialize)]
pub struct RawWorkspaceConfig {
    #[serde(default)]
    pub workspace: WorkspaceSection,

    #[serde(default)]
    pub default: DefaultSection,

    /// Keys are project names.
    #[serde(default)]
    pub project: BTreeMap<String, ProjectConfig>,
}

/// Validated workspace configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkspaceConfig {
    pub workspace: WorkspaceSection,
    pub default: DefaultSection,
    pub project: BTreeMap<String, ProjectConfig>,
}

/// `[workspace]` section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WorkspaceSection {
    #[serde(default = "default_name")]
    pub name: String,

    /// Maximum number of concurrently running bundler sessions.
    /// `None` means "available CPUs minus one".
    #[serde(default)]
    pub parallel: Option<usize>,

    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Tolerate dependency cycles instead of rejecting the workspace.
    #[serde(default)]
    pub allow_cycles: bool,

    #[serde(default = "default_install_cmd")]
    pub install_cmd: String,

    #[serde(default = "default_typecheck_cmd")]
    pub typecheck_cmd: String,

    #[serde(default = "default_bundle_cmd")]
    pub bundle_cmd: String,

    /// Build output directory, relative to each project.
    #[serde(default = "default_out_dir")]
    pub out_dir: String,
}

fn default_name() -> String {
    "workspace".to_string()
}

fn default_debounce_ms() -> u64 {
    50
}

fn default_install_cmd() -> String {
    "yarn install --json --non-interactive".to_string()
}

fn default_typecheck_cmd() -> String {
    "tsc --build {refs} {watch} --pretty false".to_string()
}

fn default_bundle_cmd() -> String {
    "rollup -c {watch}".to_string()
}

fn default_out_dir() -> String {
    "dist".to_string()
}

impl Default for WorkspaceSection {
    fn default() -> Self {
        Self {
            name: default_name(),
            parallel: None,
            debounce_ms: default_debounce_ms(),
            allow_cycles: false,
            install_cmd: default_install_cmd(),
            typecheck_cmd: default_typecheck_cmd(),
            bundle_cmd: default_bundle_cmd(),
            out_dir: default_out_dir(),
        }
    }
}

/// `[default]` section: values projects inherit unless they override them.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DefaultSection {
    #[serde(default = "default_watch")]
    pub watch: Vec<String>,

    #[serde(default = "default_exclude")]
    pub exclude: Vec<String>,

    #[serde(default = "default_formats")]
    pub formats: Vec<OutputFormat>,

    #[serde(default = "default_profiles")]
    pub profiles: Vec<String>,
}

fn default_watch() -> Vec<String> {
    vec!["**/*".to_string()]
}

fn default_exclude() -> Vec<String> {
    vec!["node_modules/**".to_string()]
}

fn default_formats() -> Vec<OutputFormat> {
    vec![OutputFormat::Esm]
}

fn default_profiles() -> Vec<String> {
    vec!["default".to_string()]
}

impl Default for DefaultSection {
    fn default() -> Self {
        Self {
            watch: default_watch(),
            exclude: default_exclude(),
            formats: default_formats(),
            profiles: default_profiles(),
        }
    }
}

/// `[project.<name>]` section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProjectConfig {
    /// Directory of the project, relative to the workspace root.
    pub path: String,

    /// Names of workspace projects this one depends on.
    #[serde(default)]
    pub deps: Vec<String>,

    /// Bundle entry point, relative to the project directory.
    #[serde(default)]
    pub entry: Option<String>,

    #[serde(default)]
    pub formats: Option<Vec<OutputFormat>>,

    #[serde(default)]
    pub profiles: Option<Vec<String>>,

    /// Replaces `default.watch` when set.
    #[serde(default)]
    pub watch: Option<Vec<String>>,

    /// Replaces `default.exclude` when set.
    #[serde(default)]
    pub exclude: Option<Vec<String>>,

    /// Third-party packages: name -> version range.
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
}

/// A project with every default applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedProject {
    pub name: String,
    pub path: String,
    pub deps: Vec<String>,
    pub entry: String,
    pub formats: Vec<OutputFormat>,
    pub profiles: Vec<String>,
    pub watch: Vec<String>,
    pub exclude: Vec<String>,
    pub dependencies: BTreeMap<String, String>,
    pub out_dir: String,
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overrides {
    pub format: Option<OutputFormat>,
    pub profiles: Vec<String>,
    pub parallel: Option<usize>,
}

impl WorkspaceConfig {
    /// Construct without running validation. Prefer `TryFrom<RawWorkspaceConfig>`.
    pub fn new_unchecked(
        workspace: WorkspaceSection,
        default: DefaultSection,
        project: BTreeMap<String, ProjectConfig>,
    ) -> Self {
        Self {
            workspace,
            default,
            project,
        }
    }

    pub fn project_names(&self) -> impl Iterator<Item = &str> {
        self.project.keys().map(|s| s.as_str())
    }

    /// Resolve one project against `[default]` and `[workspace]`.
    pub fn resolve(&self, name: &str) -> Option<ResolvedProject> {
        let pc = self.project.get(name)?;
        let out_dir = self.workspace.out_dir.trim_end_matches('/').to_string();

        let mut exclude = pc.exclude.clone().unwrap_or_else(|| self.default.exclude.clone());
        let out_glob = format!("{out_dir}/**");
        if !exclude.contains(&out_glob) {
            exclude.push(out_glob);
        }

        Some(ResolvedProject {
            name: name.to_string(),
            path: normalize_project_path(&pc.path),
            deps: pc.deps.clone(),
            entry: pc.entry.clone().unwrap_or_else(|| "index.ts".to_string()),
            formats: pc.formats.clone().unwrap_or_else(|| self.default.formats.clone()),
            profiles: pc.profiles.clone().unwrap_or_else(|| self.default.profiles.clone()),
            watch: pc.watch.clone().unwrap_or_else(|| self.default.watch.clone()),
            exclude,
            dependencies: pc.dependencies.clone(),
            out_dir,
        })
    }

    /// All projects, resolved, in name order.
    pub fn resolved_projects(&self) -> Vec<ResolvedProject> {
        self.project_names().filter_map(|n| self.resolve(n)).collect()
    }

    /// Session concurrency, at least 1.
    pub fn effective_parallel(&self) -> usize {
        self.workspace
            .parallel
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get().saturating_sub(1))
                    .unwrap_or(1)
            })
            .max(1)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.workspace.debounce_ms)
    }

    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(parallel) = overrides.parallel {
            self.workspace.parallel = Some(parallel.max(1));
        }
        if let Some(format) = overrides.format {
            self.default.formats = vec![format];
            for pc in self.project.values_mut() {
                pc.formats = None;
            }
        }
        if !overrides.profiles.is_empty() {
            self.default.profiles = overrides.profiles.clone();
            for pc in self.project.values_mut() {
                pc.profiles = None;
            }
        }
    }
}

/// Project paths are compared and matched in `a/b` form.
pub fn normalize_project_path(path: &str) -> String {
    let trimmed = path.trim().trim_start_matches("./").trim_end_matches('/');
    trimmed.replace('\\', "/")
}
