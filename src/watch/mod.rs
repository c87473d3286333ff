// src/watch/mod.rs

//! Filesystem watching.
//!
//! - [`hub`] owns the ref-counted `notify` watcher and fans changes out to
//!   glob-filtered subscriptions.
//! - [`patterns`] compiles per-project watch/exclude patterns, maps changed
//!   paths to their owning project, and discovers project files.

pub mod hub;
pub mod patterns;

pub use crate::types::ChangeKind;
pub use hub::{FsChange, FsSubscription, WatchHub};
pub use patterns::{
    build_globset, closest_owner, collect_project_files, relative_str, ProjectMatcher,
};
