// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod logging;
pub mod orchestrator;
pub mod scaffold;
pub mod stream;
pub mod types;
pub mod watch;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Result};
use tracing::{debug, info, warn};

use crate::cli::{BuildArgs, CliArgs, Command};
use crate::config::{config_path_in, load_and_validate, WorkspaceConfig};
use crate::dag::build_waves;
use crate::exec::CommandBackend;
use crate::fs::RealFileSystem;
use crate::orchestrator::{build_graph, BuildReport, Orchestrator, OrchestratorOptions};
use crate::watch::WatchHub;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading and CLI overrides
/// - the orchestrator, in build or dev mode
/// - the file watcher (dev mode)
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    match args.command {
        Command::Build(build) => run_build(build).await,
        Command::Dev(build) => run_dev(build).await,
        Command::Init { path } => {
            if scaffold::init_workspace(&RealFileSystem, &path)? {
                println!("created {}", config_path_in(&path).display());
            } else {
                println!("{} already exists", config_path_in(&path).display());
            }
            Ok(())
        }
        Command::Create { path, name, root } => {
            let name = scaffold::create_project(&RealFileSystem, &root, &path, name.as_deref())?;
            println!("created project {name} at {path}");
            Ok(())
        }
        Command::Version => {
            println!("watchbuild {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn workspace_root(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

fn load(args: &BuildArgs) -> Result<(PathBuf, WorkspaceConfig)> {
    let root = workspace_root(&args.path);
    let config = load_and_validate(config_path_in(&root))?;
    debug!(root = %root.display(), projects = config.project.len(), "config loaded");
    Ok((root, config))
}

async fn run_build(args: BuildArgs) -> Result<()> {
    let (root, config) = load(&args)?;

    if args.dry_run {
        let mut config = config;
        config.apply_overrides(&args.overrides());
        print_dry_run(&config)?;
        return Ok(());
    }

    let backend = Arc::new(CommandBackend::from_config(&config));
    let options = OrchestratorOptions {
        root,
        overrides: args.overrides(),
    };
    let report = Orchestrator::build(config, backend, Arc::new(RealFileSystem), options).await?;
    print_report(&report);

    if !report.is_success() {
        bail!("build failed");
    }
    Ok(())
}

async fn run_dev(args: BuildArgs) -> Result<()> {
    let (root, config) = load(&args)?;
    let backend = Arc::new(CommandBackend::from_config(&config));
    let options = OrchestratorOptions {
        root: root.clone(),
        overrides: args.overrides(),
    };

    let orchestrator =
        Orchestrator::start(config, backend, Arc::new(RealFileSystem), options).await?;

    let hub = WatchHub::new(&root);
    let mut changes = hub.subscribe(&[])?;
    info!(root = %root.display(), "watching for changes; press Ctrl-C to stop");

    loop {
        tokio::select! {
            change = changes.recv() => {
                let Some(change) = change else { break };
                if let Err(e) = orchestrator.notify_change(&change.path, change.kind).await {
                    warn!(error = %e, path = %change.path.display(), "failed to apply change");
                }
            }
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    warn!(error = %e, "failed to listen for Ctrl+C");
                }
                info!("shutting down");
                break;
            }
        }
    }

    drop(changes);
    orchestrator.shutdown().await;
    Ok(())
}

/// Print the wave plan without running anything.
fn print_dry_run(config: &WorkspaceConfig) -> Result<()> {
    let resolved = config.resolved_projects();
    let graph = build_graph(config, &resolved)?;
    let waves = build_waves(&graph)?;

    println!("watchbuild dry-run: {}", config.workspace.name);
    println!("  parallel = {}", config.effective_parallel());
    println!();
    for (i, wave) in waves.iter().enumerate() {
        println!("wave {}:", i + 1);
        for name in wave {
            let Some(project) = config.resolve(name) else {
                continue;
            };
            let formats: Vec<&str> = project.formats.iter().map(|f| f.as_str()).collect();
            println!("  - {name} ({})", project.path);
            println!("      formats: {}", formats.join(", "));
            println!("      profiles: {}", project.profiles.join(", "));
            if !project.deps.is_empty() {
                println!("      deps: {}", project.deps.join(", "));
            }
        }
    }

    debug!("dry-run complete (no execution)");
    Ok(())
}

fn print_report(report: &BuildReport) {
    for name in report.succeeded.iter() {
        println!("  ok      {name}");
    }
    for (name, reason) in report.failed.iter() {
        println!("  failed  {name}: {reason}");
    }
    if let Some(status) = report.typecheck.as_ref() {
        println!("  typecheck: {status:?}");
    }
}
