// src/exec/typecheck.rs

use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

/// Marker printed at the end of every check pass.
static ERROR_COUNT: LazyLock<Option<Regex>> = LazyLock::new(|| compile(r"Found (\d+) errors?"));

/// Marker printed when a watch-mode compiler starts a new pass.
static PASS_START: LazyLock<Option<Regex>> =
    LazyLock::new(|| compile(r"(Starting compilation|File change detected)"));

fn compile(pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(r) => Some(r),
        Err(e) => {
            warn!(pattern = %pattern, error = %e, "invalid typecheck marker pattern");
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypecheckEvent {
    PassStarted,
    /// A check pass finished with this many errors.
    Completed { errors: u32 },
    Diagnostic(String),
    /// The checker process exited with this code.
    Exit(i32),
}

pub fn parse_typecheck_line(line: &str) -> Vec<TypecheckEvent> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    if let Some(caps) = ERROR_COUNT.as_ref().and_then(|re| re.captures(trimmed)) {
        let errors = caps
            .get(1)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(u32::MAX);
        return vec![TypecheckEvent::Completed { errors }];
    }
    if PASS_START.as_ref().is_some_and(|re| re.is_match(trimmed)) {
        return vec![TypecheckEvent::PassStarted];
    }
    vec![TypecheckEvent::Diagnostic(trimmed.to_string())]
}
