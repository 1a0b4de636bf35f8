//! Normalization of raw tool output into structured failure records.
//!
//! Build, lint, and test tools emit diagnostics in wildly different shapes:
//!
//! - **Compiler-diagnostic style**: `file(line,col): error CODE: message`
//! - **Colon-dash style**: `file:line:col - error CODE: message`
//! - **Arrow style**: `error: message` followed by `--> file:line:col`
//! - **Test-runner markers**: `test foo ... FAILED`, `--- FAIL: TestBar`
//! - **Generic prefixes**: `error: ...`, `warning: ...`, `fatal error: ...`
//!
//! No single grammar covers them, so the [`Normalizer`] is a tolerant
//! best-effort scanner: an ordered set of independent pattern matchers whose
//! results are concatenated and deduplicated. Malformed input yields an empty
//! or partial list, never an error.
//!
//! # Example
//!
//! ```rust
//! use specflow::normalize::{parse, Severity};
//!
//! let failures = parse("src/app.ts(10,5): error TS2322: Type 'x' is not assignable");
//! assert_eq!(failures.len(), 1);
//! assert_eq!(failures[0].line, Some(10));
//! assert_eq!(failures[0].severity, Severity::Error);
//! ```

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

// ============================================================================
// Failure Types
// ============================================================================

/// Severity level for a normalized failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational only.
    Info,
    /// Warning - worth fixing but not necessarily blocking.
    Warning,
    /// Error - the reason a gate failed.
    Error,
}

impl Severity {
    /// Map a recognized severity token, case-insensitively.
    ///
    /// Returns `None` for unrecognized tokens; callers fall back to
    /// [`Severity::Error`] for patterns that carry no explicit token.
    #[must_use]
    pub fn from_token(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "error" | "fatal error" | "fatal" => Some(Self::Error),
            "warning" | "warn" => Some(Self::Warning),
            "info" | "note" => Some(Self::Info),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// A single normalized problem extracted from tool output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetail {
    /// File path where the problem was reported (if the format carried one).
    pub file: Option<PathBuf>,
    /// Line number (1-indexed, if available).
    pub line: Option<u32>,
    /// Human-readable message, including any tool error code.
    pub message: String,
    /// Severity of the problem.
    pub severity: Severity,
}

impl FailureDetail {
    /// Create a new failure with the given severity and message.
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            file: None,
            line: None,
            message: message.into(),
            severity,
        }
    }

    /// Add a file location.
    #[must_use]
    pub fn with_location(mut self, file: impl Into<PathBuf>, line: Option<u32>) -> Self {
        self.file = Some(file.into());
        self.line = line;
        self
    }

    /// Format as `file:line: message` for fix prompts and logs.
    ///
    /// Falls back to just the message when no location is known.
    #[must_use]
    pub fn format(&self) -> String {
        match (&self.file, self.line) {
            (Some(file), Some(line)) => format!("{}:{}: {}", file.display(), line, self.message),
            (Some(file), None) => format!("{}: {}", file.display(), self.message),
            _ => self.message.clone(),
        }
    }
}

impl std::fmt::Display for FailureDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.format())
    }
}

// ============================================================================
// Normalizer
// ============================================================================

/// Tolerant multi-format output scanner.
///
/// Patterns are compiled once at construction. All matchers run on every
/// input; their results are concatenated in matcher order and deduplicated,
/// so the generic fallback never re-reports a line a specific matcher
/// already captured.
pub struct Normalizer {
    /// `file(line,col): error CODE: message` (tsc and MSVC style)
    paren: Regex,
    /// `file:line:col - error CODE: message` (tsc --pretty false style)
    dash: Regex,
    /// `error: message` / `error[E0308]: message` diagnostic header
    diag_header: Regex,
    /// `--> file:line:col` location continuation
    arrow: Regex,
    /// `test name ... FAILED` (cargo test)
    cargo_test: Regex,
    /// `--- FAIL: TestName` (go test)
    go_fail: Regex,
    /// `FAILED path::test_name` or `FAILED path - reason` (pytest)
    pytest_fail: Regex,
    /// `✕ name` / `✗ name` bullets (jest, mocha, vitest)
    bullet: Regex,
    /// `[FAIL] ...` / `[FAILED] ...` bracketed markers
    bracket: Regex,
    /// bare `error:` / `warning:` / `fatal error:` prefix
    generic: Regex,
}

impl Normalizer {
    /// Create a normalizer with the standard matcher cascade.
    #[must_use]
    pub fn new() -> Self {
        // These patterns are fixed strings; compilation cannot fail.
        Self {
            paren: Regex::new(
                r"(?m)^\s*([^\s(][^(:\n]*)\((\d+),(\d+)\):\s*((?i:error|warning))\s+(.+)$",
            )
            .expect("paren pattern"),
            dash: Regex::new(
                r"(?m)^\s*(\S+?):(\d+):(\d+)\s+-\s+((?i:error|warning))\s+(.+)$",
            )
            .expect("dash pattern"),
            diag_header: Regex::new(r"^(error|warning)(\[[A-Za-z0-9_:]+\])?:\s*(.+)$")
                .expect("diag header pattern"),
            arrow: Regex::new(r"^\s*-->\s*([^:\s]+):(\d+)(?::(\d+))?\s*$").expect("arrow pattern"),
            cargo_test: Regex::new(r"(?m)^test\s+(\S+)\s+\.\.\.\s+FAILED\s*$")
                .expect("cargo test pattern"),
            go_fail: Regex::new(r"(?m)^\s*--- FAIL:\s+(\S+)").expect("go fail pattern"),
            pytest_fail: Regex::new(r"(?m)^FAILED\s+([^\s:]+)(?:::(\S+))?(?:\s+-\s+(.+))?$")
                .expect("pytest pattern"),
            bullet: Regex::new(r"(?m)^\s*[✕✗]\s+(.+)$").expect("bullet pattern"),
            bracket: Regex::new(r"(?m)^\s*\[(FAIL|FAILED)\]\s*(.+)$").expect("bracket pattern"),
            generic: Regex::new(r"(?mi)^\s*(fatal error|error|warning):\s*(.+)$")
                .expect("generic pattern"),
        }
    }

    /// Convert raw tool output into a deduplicated list of failures.
    ///
    /// Never panics; unrecognized input yields an empty list.
    #[must_use]
    pub fn parse(&self, raw: &str) -> Vec<FailureDetail> {
        let mut all = Vec::new();
        all.extend(self.match_paren_diagnostics(raw));
        all.extend(self.match_dash_diagnostics(raw));
        all.extend(self.match_arrow_diagnostics(raw));
        all.extend(self.match_test_markers(raw));
        all.extend(self.match_generic(raw));
        dedup(all)
    }

    /// `src/app.ts(10,5): error TS2322: Type 'x' is not assignable`
    fn match_paren_diagnostics(&self, raw: &str) -> Vec<FailureDetail> {
        self.paren
            .captures_iter(raw)
            .filter_map(|caps| {
                let file = caps.get(1)?.as_str().trim();
                let line = caps.get(2)?.as_str().parse::<u32>().ok();
                let severity =
                    Severity::from_token(caps.get(4)?.as_str()).unwrap_or(Severity::Error);
                let message = caps.get(5)?.as_str().trim().to_string();
                Some(FailureDetail::new(severity, message).with_location(file, line))
            })
            .collect()
    }

    /// `src/app.ts:10:5 - error TS2322: Type 'x' is not assignable`
    fn match_dash_diagnostics(&self, raw: &str) -> Vec<FailureDetail> {
        self.dash
            .captures_iter(raw)
            .filter_map(|caps| {
                let file = caps.get(1)?.as_str();
                let line = caps.get(2)?.as_str().parse::<u32>().ok();
                let severity =
                    Severity::from_token(caps.get(4)?.as_str()).unwrap_or(Severity::Error);
                let message = caps.get(5)?.as_str().trim().to_string();
                Some(FailureDetail::new(severity, message).with_location(file, line))
            })
            .collect()
    }

    /// `error[E0308]: mismatched types` followed by `--> src/main.rs:10:9`.
    ///
    /// Only emits a record once the location continuation is seen; headers
    /// without an arrow are left to the generic fallback.
    fn match_arrow_diagnostics(&self, raw: &str) -> Vec<FailureDetail> {
        let mut issues = Vec::new();
        let mut pending: Option<(Severity, String)> = None;

        for line in raw.lines() {
            if let Some(caps) = self.diag_header.captures(line.trim_end()) {
                let severity = Severity::from_token(&caps[1]).unwrap_or(Severity::Error);
                let code = caps.get(2).map(|m| m.as_str()).unwrap_or("");
                let message = if code.is_empty() {
                    caps[3].trim().to_string()
                } else {
                    // Keep the bracketed code in the message: "[E0308] mismatched types"
                    format!("{} {}", code, caps[3].trim())
                };
                pending = Some((severity, message));
            } else if let Some(caps) = self.arrow.captures(line) {
                if let Some((severity, message)) = pending.take() {
                    let file = caps[1].to_string();
                    let line_num = caps[2].parse::<u32>().ok();
                    issues.push(FailureDetail::new(severity, message).with_location(file, line_num));
                }
            }
        }

        issues
    }

    /// Test-runner failure markers across ecosystems.
    fn match_test_markers(&self, raw: &str) -> Vec<FailureDetail> {
        let mut issues = Vec::new();

        for caps in self.cargo_test.captures_iter(raw) {
            issues.push(FailureDetail::new(
                Severity::Error,
                format!("test failed: {}", &caps[1]),
            ));
        }

        for caps in self.go_fail.captures_iter(raw) {
            issues.push(FailureDetail::new(
                Severity::Error,
                format!("test failed: {}", &caps[1]),
            ));
        }

        for caps in self.pytest_fail.captures_iter(raw) {
            let file = caps[1].to_string();
            let name = caps.get(2).map(|m| m.as_str()).unwrap_or("test");
            let reason = caps
                .get(3)
                .map(|m| format!(" - {}", m.as_str()))
                .unwrap_or_default();
            issues.push(
                FailureDetail::new(Severity::Error, format!("test failed: {name}{reason}"))
                    .with_location(file, None),
            );
        }

        for caps in self.bullet.captures_iter(raw) {
            issues.push(FailureDetail::new(
                Severity::Error,
                format!("test failed: {}", caps[1].trim()),
            ));
        }

        for caps in self.bracket.captures_iter(raw) {
            issues.push(FailureDetail::new(
                Severity::Error,
                format!("test failed: {}", caps[2].trim()),
            ));
        }

        issues
    }

    /// Generic `error:` / `warning:` / `fatal error:` fallback, file-less.
    fn match_generic(&self, raw: &str) -> Vec<FailureDetail> {
        self.generic
            .captures_iter(raw)
            .filter_map(|caps| {
                let severity =
                    Severity::from_token(caps.get(1)?.as_str()).unwrap_or(Severity::Error);
                let message = caps.get(2)?.as_str().trim();
                if message.is_empty() {
                    return None;
                }
                Some(FailureDetail::new(severity, message))
            })
            .collect()
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Drop records with an identical `(file, message)` pair, keeping the first,
/// and drop file-less records whose message a located record already carries.
/// Specific matchers run before the generic fallback, so the located version
/// wins.
fn dedup(issues: Vec<FailureDetail>) -> Vec<FailureDetail> {
    let located_messages: HashSet<&str> = issues
        .iter()
        .filter(|i| i.file.is_some())
        .map(|i| i.message.as_str())
        .collect();

    let mut seen: HashSet<(Option<PathBuf>, String)> = HashSet::new();
    let mut kept = Vec::new();

    for issue in &issues {
        if issue.file.is_none() && located_messages.contains(issue.message.as_str()) {
            continue;
        }
        if seen.insert((issue.file.clone(), issue.message.clone())) {
            kept.push(issue.clone());
        }
    }

    kept
}

/// Parse raw tool output with a freshly built [`Normalizer`].
///
/// Convenience for one-shot callers; construct a [`Normalizer`] once when
/// parsing repeatedly.
#[must_use]
pub fn parse(raw: &str) -> Vec<FailureDetail> {
    Normalizer::new().parse(raw)
}
