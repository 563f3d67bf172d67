//! Deterministic classification of agent output by status markers.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::{Classification, InvocationResult, ProcessExit, RunStatus};

/// An opening/closing token pair that maps to a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Marker {
    pub status: RunStatus,
    pub open: &'static str,
    pub close: &'static str,
}

/// Markers in priority order. The first fully matched pair wins, so
/// `<Completed>` beats `<Improved>` wherever each appears in the text.
pub const MARKERS: [Marker; 2] = [
    Marker {
        status: RunStatus::Completed,
        open: "<Completed>",
        close: "</Completed>",
    },
    Marker {
        status: RunStatus::Improved,
        open: "<Improved>",
        close: "</Improved>",
    },
];

static MARKER_PATTERNS: LazyLock<Vec<(RunStatus, Regex)>> = LazyLock::new(|| {
    MARKERS
        .iter()
        .map(|marker| (marker.status, pair_pattern(marker.open, marker.close)))
        .collect()
});

/// Build a case-sensitive, multi-line pattern capturing the shortest content
/// between `open` and `close`.
pub(crate) fn pair_pattern(open: &str, close: &str) -> Regex {
    let pattern = format!("(?s){}(.*?){}", regex::escape(open), regex::escape(close));
    Regex::new(&pattern).expect("escaped marker pattern should compile")
}

/// Return the trimmed content of the first complete `open`..`close` pair.
pub(crate) fn extract_between(pattern: &Regex, text: &str) -> Option<String> {
    pattern
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
}

/// Classify marker text from a successful run.
///
/// - `COMPLETED` if a complete `<Completed>…</Completed>` pair exists.
/// - Else `IMPROVED` if a complete `<Improved>…</Improved>` pair exists.
/// - Else `MISSING_MARKER` with no content. Unterminated markers never match.
pub fn classify_text(text: &str) -> Classification {
    MARKER_PATTERNS
        .iter()
        .find_map(|(status, pattern)| {
            extract_between(pattern, text).map(|content| Classification::new(*status, Some(content)))
        })
        .unwrap_or_else(|| Classification::new(RunStatus::MissingMarker, None))
}

/// Classify an invocation result.
///
/// Process-level failures take precedence: a timed-out or failed process is
/// never scanned for markers.
pub fn classify(result: &InvocationResult) -> Classification {
    match result.exit {
        ProcessExit::Success => classify_text(&result.text),
        ProcessExit::TimedOut => Classification::new(RunStatus::Timeout, None),
        ProcessExit::Failed { .. } | ProcessExit::Cancelled => {
            Classification::new(RunStatus::ProcessError, None)
        }
    }
}

/// Short summary used when no marker was found: the last three non-empty
/// lines joined by spaces, capped at 500 characters.
pub fn fallback_summary(text: &str) -> String {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    if lines.is_empty() {
        return "No output captured".to_string();
    }
    let tail = &lines[lines.len().saturating_sub(3)..];
    tail.join(" ").chars().take(500).collect()
}
