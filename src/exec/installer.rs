// src/exec/installer.rs

//! Package-manager event stream.
//!
//! The installer writes one JSON object per line:
//!
//! ```text
//! {"type":"step","data":{"message":"Resolving packages...","current":1,"total":4}}
//! {"type":"error","data":"core/left-pad: package not found"}
//! ```
//!
//! Lines that are not recognised events are kept as plain output.

use std::collections::BTreeSet;

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum InstallEvent {
    Step {
        message: String,
        current: u32,
        total: u32,
    },
    ActivityStart {
        id: u64,
    },
    ActivityTick {
        id: u64,
        name: String,
    },
    ActivityEnd {
        id: u64,
    },
    ProgressStart {
        id: u64,
        total: u64,
    },
    ProgressTick {
        id: u64,
        current: u64,
    },
    ProgressFinish {
        id: u64,
    },
    Success(String),
    Error(String),
    /// Unparsed line.
    #[serde(skip_deserializing)]
    Output(String),
    /// The installer process exited with this code.
    #[serde(skip_deserializing)]
    Exit(i32),
}

pub fn parse_install_line(line: &str) -> Vec<InstallEvent> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    let event = serde_json::from_str(trimmed)
        .unwrap_or_else(|_| InstallEvent::Output(trimmed.to_string()));
    vec![event]
}

/// Human-readable progress text for status output.
pub fn describe(event: &InstallEvent) -> Option<String> {
    match event {
        InstallEvent::Step {
            message,
            current,
            total,
        } => Some(format!("[{current}/{total}] {message}")),
        InstallEvent::ProgressStart { total, .. } => Some(format!("fetching {total} packages")),
        InstallEvent::Success(msg) => Some(msg.clone()),
        InstallEvent::Error(msg) => Some(msg.clone()),
        _ => None,
    }
}

/// Projects named by error events.
///
/// Combined-manifest keys look like `"<project>/<package>"`, so an error
/// message mentioning `"<project>/"` at a token boundary is attributed to
/// that project. `app-core/x` does not implicate `core`.
pub fn attribute_failures<'a, I>(events: &[InstallEvent], projects: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let projects: Vec<&str> = projects.into_iter().collect();
    let mut failed = BTreeSet::new();

    for event in events {
        let InstallEvent::Error(message) = event else {
            continue;
        };
        for project in projects.iter() {
            if mentions_project(message, project) {
                failed.insert(project.to_string());
            }
        }
    }
    failed
}

/// `message` names a combined-manifest key of `project`, i.e. contains
/// `"<project>/"` not preceded by another name character.
pub fn mentions_project(message: &str, project: &str) -> bool {
    let needle = format!("{project}/");
    message.match_indices(&needle).any(|(at, _)| {
        message[..at]
            .chars()
            .next_back()
            .map_or(true, |c| !is_name_char(c))
    })
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | '/')
}
