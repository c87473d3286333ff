// src/scaffold.rs

//! `init` and `create`: workspace and project scaffolding.

use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::info;

use crate::config::{config_path_in, normalize_project_path, parse_str, CONFIG_FILE_NAME};
use crate::fs::FileSystem;

const SKELETON: &str = r#"[workspace]
name = "{name}"

[default]
watch = ["**/*"]
exclude = ["node_modules/**"]
formats = ["esm"]
"#;

/// Write a skeleton `watchbuild.toml` into `root`.
///
/// Returns `false` (and writes nothing) if the file already exists.
pub fn init_workspace(fs: &dyn FileSystem, root: &Path) -> Result<bool> {
    let path = config_path_in(root);
    if fs.exists(&path) {
        info!(path = %path.display(), "{CONFIG_FILE_NAME} already exists");
        return Ok(false);
    }

    let name = root
        .canonicalize()
        .ok()
        .as_deref()
        .unwrap_or(root)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("workspace")
        .to_string();

    fs.create_dir_all(root)?;
    fs.write(&path, SKELETON.replace("{name}", &name).as_bytes())?;
    info!(path = %path.display(), "workspace initialised");
    Ok(true)
}

/// Scaffold a project at `project_path` (relative to `root`) and register it.
///
/// The name defaults to the last component of the path. Returns the name.
pub fn create_project(
    fs: &dyn FileSystem,
    root: &Path,
    project_path: &str,
    name: Option<&str>,
) -> Result<String> {
    let config_path = config_path_in(root);
    let contents = fs
        .read_to_string(&config_path)
        .with_context(|| format!("no {CONFIG_FILE_NAME} in {}; run `init` first", root.display()))?;
    let raw = parse_str(&contents)?;

    let project_path = normalize_project_path(project_path);
    if project_path.is_empty() {
        bail!("project path must not be empty");
    }
    let name = match name {
        Some(name) => name.to_string(),
        None => project_path
            .rsplit('/')
            .next()
            .unwrap_or(project_path.as_str())
            .to_string(),
    };

    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        bail!("invalid project name '{name}': use letters, digits, '-' or '_'");
    }
    if raw.project.contains_key(&name) {
        bail!("project '{name}' already exists");
    }
    if raw
        .project
        .values()
        .any(|p| normalize_project_path(&p.path) == project_path)
    {
        bail!("path '{project_path}' is already used by another project");
    }

    let dir = root.join(&project_path);
    fs.create_dir_all(&dir)?;

    let entry = dir.join("index.ts");
    if !fs.exists(&entry) {
        fs.write(&entry, b"export {};\n")?;
    }
    let package_json = dir.join("package.json");
    if !fs.exists(&package_json) {
        let manifest = serde_json::json!({
            "name": name,
            "version": "1.0.0",
            "private": true,
        });
        let text = serde_json::to_string_pretty(&manifest)?;
        fs.write(&package_json, format!("{text}\n").as_bytes())?;
    }

    let mut updated = contents;
    if !updated.ends_with('\n') {
        updated.push('\n');
    }
    updated.push_str(&format!(
        "\n[project.{name}]\npath = \"{project_path}\"\n"
    ));
    fs.write(&config_path, updated.as_bytes())?;

    info!(project = %name, path = %project_path, "project created");
    Ok(name)
}
