// src/exec/mod.rs

//! Process execution layer.
//!
//! This module runs the external installer, type checker and bundler with
//! `tokio::process::Command` and turns their output into typed events.
//!
//! - [`backend`] defines the [`BuildBackend`] trait the orchestrator uses;
//!   tests replace it with a fake implementation.
//! - [`process`] holds the shell-command implementation and the generic
//!   process supervisor.
//! - [`session`] is the stop/wait handle for one running process.
//! - [`installer`], [`typecheck`] and [`bundler`] parse each tool's output.

pub mod backend;
pub mod bundler;
pub mod installer;
pub mod process;
pub mod session;
pub mod typecheck;

pub use backend::{BuildBackend, BundleRequest, InstallRequest, TypecheckRequest};
pub use bundler::BundlerEvent;
pub use installer::InstallEvent;
pub use process::{render_template, spawn_session, CommandBackend, SessionSpec};
pub use session::SessionProcess;
pub use typecheck::TypecheckEvent;
