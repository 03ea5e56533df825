// Log line value type

use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use std::sync::LazyLock;

/// Fold/expand marker understood by the log viewer. Keep in sync with the frontend.
static STRUCTURAL_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*\^\^\^\s+\+\+\+\s*$").expect("structural marker pattern is valid")
});

/// Format a timestamp the way it prefixes log lines (RFC 3339, UTC, whole seconds)
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// One reconstructed output line
///
/// `raw` is what the command wrote; `text` is the preprocessed form used for
/// classification and callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    raw: String,
    text: String,
    is_marker: bool,
}

impl LogLine {
    pub fn new(raw: String, text: String) -> Self {
        let is_marker = STRUCTURAL_MARKER.is_match(&text);
        Self {
            raw,
            text,
            is_marker,
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }

    pub fn is_structural_marker(&self) -> bool {
        self.is_marker
    }

    /// Render for the log buffer, newline-terminated
    pub fn render(&self, timestamp: Option<DateTime<Utc>>) -> String {
        match timestamp {
            Some(at) => format!("[{}] {}\n", format_timestamp(at), self.raw),
            None => format!("{}\n", self.raw),
        }
    }
}
