// src/exec/backend.rs

//! Pluggable process backend.
//!
//! The orchestrator talks to a [`BuildBackend`] instead of spawning processes
//! itself. Production uses [`CommandBackend`](super::process::CommandBackend);
//! tests substitute a fake that records requests and emits scripted events.

use std::path::PathBuf;

use tokio::sync::mpsc;

use crate::orchestrator::install::CombinedManifest;
use crate::orchestrator::stages::BundlerConfig;

use super::bundler::BundlerEvent;
use super::installer::InstallEvent;
use super::session::SessionProcess;
use super::typecheck::TypecheckEvent;

#[derive(Debug, Clone, PartialEq)]
pub struct InstallRequest {
    pub root: PathBuf,
    pub manifest: CombinedManifest,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypecheckRequest {
    pub root: PathBuf,
    /// Project paths to check, dependencies first.
    pub projects: Vec<String>,
    pub watch: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BundleRequest {
    pub root: PathBuf,
    pub config: BundlerConfig,
    pub watch: bool,
}

/// Spawns the external processes a workspace build needs.
///
/// Every method starts a process and returns immediately. Parsed events are
/// sent on `events`; the last event of a process that was not stopped is its
/// `Exit` code. A stopped process sends no `Exit`.
pub trait BuildBackend: Send + Sync {
    fn spawn_install(
        &self,
        request: &InstallRequest,
        events: mpsc::UnboundedSender<InstallEvent>,
    ) -> anyhow::Result<SessionProcess>;

    fn spawn_typecheck(
        &self,
        request: &TypecheckRequest,
        events: mpsc::UnboundedSender<TypecheckEvent>,
    ) -> anyhow::Result<SessionProcess>;

    fn spawn_bundler(
        &self,
        request: &BundleRequest,
        events: mpsc::UnboundedSender<BundlerEvent>,
    ) -> anyhow::Result<SessionProcess>;
}
