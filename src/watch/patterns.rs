// src/watch/patterns.rs

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::config::ResolvedProject;
use crate::fs::FileSystem;

/// Directories never descended into while discovering project files.
const SKIPPED_DIRS: [&str; 2] = ["node_modules", ".git"];

/// Build a GlobSet from string patterns.
pub fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        let glob = Glob::new(pat).with_context(|| format!("invalid glob pattern: {pat}"))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

/// Compiled watch/exclude patterns of one project, rooted at its directory.
#[derive(Clone)]
pub struct ProjectMatcher {
    name: String,
    root: String,
    watch_set: GlobSet,
    exclude_set: Option<GlobSet>,
}

impl fmt::Debug for ProjectMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectMatcher")
            .field("name", &self.name)
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl ProjectMatcher {
    pub fn new(project: &ResolvedProject) -> Result<Self> {
        let watch_set = build_globset(&project.watch)
            .with_context(|| format!("building watch globset for project {}", project.name))?;
        let exclude_set = if project.exclude.is_empty() {
            None
        } else {
            Some(
                build_globset(&project.exclude).with_context(|| {
                    format!("building exclude globset for project {}", project.name)
                })?,
            )
        };

        Ok(Self {
            name: project.name.clone(),
            root: project.path.clone(),
            watch_set,
            exclude_set,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Project directory relative to the workspace root.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Strip the project directory from a workspace-relative path.
    ///
    /// Returns `None` when the path lies outside this project.
    pub fn strip<'a>(&self, workspace_rel: &'a str) -> Option<&'a str> {
        let rest = workspace_rel.strip_prefix(self.root.as_str())?;
        let rest = rest.strip_prefix('/')?;
        (!rest.is_empty()).then_some(rest)
    }

    /// Whether a project-relative path is watched and not excluded.
    pub fn matches(&self, project_rel: &str) -> bool {
        if !self.watch_set.is_match(project_rel) {
            return false;
        }
        if let Some(exclude) = &self.exclude_set {
            if exclude.is_match(project_rel) {
                return false;
            }
        }
        true
    }
}

/// The project whose directory most closely contains `workspace_rel`.
pub fn closest_owner<'a>(
    matchers: &'a [ProjectMatcher],
    workspace_rel: &str,
) -> Option<&'a ProjectMatcher> {
    matchers
        .iter()
        .filter(|m| m.strip(workspace_rel).is_some())
        .max_by_key(|m| m.root.len())
}

/// `path` relative to `root` with forward slashes.
///
/// Falls back to comparing canonicalized paths, for platforms where the same
/// directory is reachable through different absolute prefixes.
pub fn relative_str(root: &Path, path: &Path) -> Option<String> {
    let to_posix = |rel: &Path| rel.to_string_lossy().replace('\\', "/");

    if let Ok(rel) = path.strip_prefix(root) {
        return Some(to_posix(rel));
    }
    let root = root.canonicalize().ok()?;
    let path = path.canonicalize().ok()?;
    path.strip_prefix(&root).ok().map(to_posix)
}

/// Files of a project matching its patterns, relative to the project directory.
///
/// Directories of nested projects are skipped, so a file belongs to exactly
/// one project.
pub fn collect_project_files(
    fs: &dyn FileSystem,
    workspace_root: &Path,
    matcher: &ProjectMatcher,
    nested_roots: &[String],
) -> Result<BTreeSet<String>> {
    let project_dir = workspace_root.join(&matcher.root);
    let mut files = BTreeSet::new();
    if !fs.is_dir(&project_dir) {
        return Ok(files);
    }

    let mut stack = vec![project_dir.clone()];
    while let Some(dir) = stack.pop() {
        for path in fs.read_dir(&dir)? {
            let Some(rel) = relative_str(&project_dir, &path) else {
                continue;
            };
            if fs.is_dir(&path) {
                let skip = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| SKIPPED_DIRS.contains(&n))
                    || nested_roots
                        .iter()
                        .any(|r| *r == format!("{}/{rel}", matcher.root));
                if !skip {
                    stack.push(path);
                }
            } else if matcher.matches(&rel) {
                files.insert(rel);
            }
        }
    }

    Ok(files)
}
