// src/orchestrator/stages.rs

//! Derived-configuration stages of a project.
//!
//! Each stage is a pure function of the previous one:
//! snapshot -> typecheck config -> bundler config -> manifest.
//! Install status is produced by the install coordinator, not derived.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::config::ResolvedProject;
use crate::types::OutputFormat;

const SOURCE_EXTENSIONS: [&str; 4] = [".ts", ".tsx", ".mts", ".cts"];
const TEST_MARKERS: [&str; 2] = [".test.", ".spec."];

/// Raw inputs of a project: resolved config plus its discovered files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectSnapshot {
    pub project: ResolvedProject,
    /// Workspace dependencies: project name -> project path.
    pub dep_paths: BTreeMap<String, String>,
    /// Files relative to the project directory.
    pub files: BTreeSet<String>,
}

impl ProjectSnapshot {
    pub fn name(&self) -> &str {
        &self.project.name
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypecheckConfig {
    pub project: ResolvedProject,
    /// Paths of the dependency projects, in `deps` order.
    pub references: Vec<String>,
    /// Non-test source files.
    pub files: Vec<String>,
    pub declaration_dir: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BundlerConfig {
    pub name: String,
    pub path: String,
    pub entry: String,
    pub formats: Vec<OutputFormat>,
    pub profiles: Vec<String>,
    /// Imports left out of the bundle: packages and workspace dependencies.
    pub externals: Vec<String>,
    pub out_dir: String,
    pub dependencies: BTreeMap<String, String>,
    pub types_entry: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Manifest {
    pub name: String,
    pub main: String,
    /// Output format name -> bundle path.
    pub exports: BTreeMap<String, String>,
    pub types: String,
    pub dependencies: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallStatus {
    Pending,
    Installed,
    Failed(String),
}

pub fn is_source_file(path: &str) -> bool {
    SOURCE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
        && !TEST_MARKERS.iter().any(|marker| path.contains(marker))
}

pub fn derive_typecheck(snapshot: &ProjectSnapshot) -> TypecheckConfig {
    let project = snapshot.project.clone();
    let references = project
        .deps
        .iter()
        .filter_map(|dep| snapshot.dep_paths.get(dep).cloned())
        .collect();
    let files = snapshot
        .files
        .iter()
        .filter(|f| is_source_file(f))
        .cloned()
        .collect();
    let declaration_dir = format!("{}/typings", project.out_dir);

    TypecheckConfig {
        project,
        references,
        files,
        declaration_dir,
    }
}

pub fn derive_bundler(tc: &TypecheckConfig) -> BundlerConfig {
    let p = &tc.project;

    let mut externals: BTreeSet<String> = p.dependencies.keys().cloned().collect();
    externals.extend(p.deps.iter().cloned());

    let stem = entry_stem(&p.entry);
    BundlerConfig {
        name: p.name.clone(),
        path: p.path.clone(),
        entry: p.entry.clone(),
        formats: p.formats.clone(),
        profiles: p.profiles.clone(),
        externals: externals.into_iter().collect(),
        out_dir: p.out_dir.clone(),
        dependencies: p.dependencies.clone(),
        types_entry: format!("{}/{stem}.d.ts", tc.declaration_dir),
    }
}

pub fn derive_manifest(bc: &BundlerConfig) -> Manifest {
    let stem = entry_stem(&bc.entry);
    let exports: BTreeMap<String, String> = bc
        .formats
        .iter()
        .map(|f| {
            (
                f.as_str().to_string(),
                format!("{}/{stem}{}", bc.out_dir, f.extension()),
            )
        })
        .collect();

    let main = bc
        .formats
        .first()
        .map(|f| format!("{}/{stem}{}", bc.out_dir, f.extension()))
        .unwrap_or_else(|| format!("{}/{stem}.js", bc.out_dir));

    Manifest {
        name: bc.name.clone(),
        main,
        exports,
        types: bc.types_entry.clone(),
        dependencies: bc.dependencies.clone(),
    }
}

/// `src/index.ts` -> `index`.
fn entry_stem(entry: &str) -> &str {
    let file = entry.rsplit('/').next().unwrap_or(entry);
    match file.rfind('.') {
        Some(0) | None => file,
        Some(dot) => &file[..dot],
    }
}
