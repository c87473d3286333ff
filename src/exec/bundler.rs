// src/exec/bundler.rs

//! Bundler watch events.
//!
//! Each rebuild is reported as `START`, then per output `BUNDLE_START` and
//! `BUNDLE_END`, then `END`; a failed rebuild reports `ERROR` instead.
//! Lines may be bare codes or JSON objects with a `code` field.

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BundlerEvent {
    Start,
    BundleStart,
    BundleEnd { duration_ms: Option<u64> },
    End,
    Error(String),
    Output(String),
    /// The bundler process exited with this code.
    Exit(i32),
}

impl BundlerEvent {
    /// `true` for events that finish a rebuild.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BundlerEvent::End | BundlerEvent::Error(_) | BundlerEvent::Exit(_))
    }
}

#[derive(Debug, Deserialize)]
struct CodedLine {
    code: String,
    #[serde(default)]
    duration: Option<u64>,
    #[serde(default)]
    error: Option<String>,
}

pub fn parse_bundler_line(line: &str) -> Vec<BundlerEvent> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    if let Ok(coded) = serde_json::from_str::<CodedLine>(trimmed) {
        let event = from_code(&coded.code, coded.duration, coded.error)
            .unwrap_or_else(|| BundlerEvent::Output(trimmed.to_string()));
        return vec![event];
    }

    let (code, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((code, rest)) => (code, Some(rest.trim().to_string())),
        None => (trimmed, None),
    };
    let event = from_code(code, None, rest).unwrap_or_else(|| BundlerEvent::Output(trimmed.to_string()));
    vec![event]
}

fn from_code(code: &str, duration: Option<u64>, detail: Option<String>) -> Option<BundlerEvent> {
    let event = match code {
        "START" => BundlerEvent::Start,
        "BUNDLE_START" => BundlerEvent::BundleStart,
        "BUNDLE_END" => BundlerEvent::BundleEnd {
            duration_ms: duration,
        },
        "END" => BundlerEvent::End,
        "ERROR" => BundlerEvent::Error(detail.unwrap_or_else(|| "bundle failed".to_string())),
        _ => return None,
    };
    Some(event)
}
