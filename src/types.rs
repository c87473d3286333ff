// src/types.rs

use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

/// Canonical project name type used throughout the orchestrator.
pub type ProjectName = String;

/// Boxed, sendable future used at the trait/closure seams.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Kind of a filesystem change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Add,
    Change,
    Unlink,
}

/// Whether the orchestrator performs a single pass or keeps watching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    Build,
    Dev,
}

/// Output module format of a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Esm,
    Cjs,
    Iife,
}

impl OutputFormat {
    /// File extension used for bundles of this format.
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Esm => ".mjs",
            OutputFormat::Cjs => ".cjs",
            OutputFormat::Iife => ".js",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Esm => "esm",
            OutputFormat::Cjs => "cjs",
            OutputFormat::Iife => "iife",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "esm" | "es" | "module" => Ok(OutputFormat::Esm),
            "cjs" | "commonjs" => Ok(OutputFormat::Cjs),
            "iife" => Ok(OutputFormat::Iife),
            other => Err(format!(
                "invalid format: {other} (expected \"esm\", \"cjs\" or \"iife\")"
            )),
        }
    }
}

/// Lock a std mutex, recovering the data if a previous holder panicked.
///
/// Guards are never held across an `.await`.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
