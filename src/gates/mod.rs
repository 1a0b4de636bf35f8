//! Quality gate kinds, results, and tool detection.
//!
//! A gate is an automated check (test, lint, or build) whose pass/fail
//! outcome decides whether a feature's implementation is accepted. Gates
//! always execute in the fixed order test → lint → build, and a pass is
//! determined by the command's exit status alone — parsed failures are a
//! diagnostic aid, never the source of truth.
//!
//! Detection is best-effort config-file sniffing: `package.json` scripts,
//! `Cargo.toml`, `go.mod`, `Makefile` targets, `tsconfig.json`. Absence of
//! a detectable tool is not a failure; the gate passes vacuously.

pub mod runner;

pub use runner::GateRunner;

use async_trait::async_trait;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::normalize::FailureDetail;

// ============================================================================
// Gate Kind
// ============================================================================

/// The three quality gates, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateKind {
    /// Test suite execution.
    Test,
    /// Linter / static analysis.
    Lint,
    /// Compilation / bundling.
    Build,
}

impl GateKind {
    /// All gates in their fixed execution order: test → lint → build.
    pub const ALL: [GateKind; 3] = [GateKind::Test, GateKind::Lint, GateKind::Build];

    /// Stable lowercase name, used in `failed_checks` and fix prompts.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Test => "test",
            Self::Lint => "lint",
            Self::Build => "build",
        }
    }

    /// Best-effort check whether this gate has applicable tooling at `root`.
    ///
    /// Not authoritative: a `false` here only means auto-detection found
    /// nothing; an explicit command override still runs.
    #[must_use]
    pub fn detect(&self, root: impl AsRef<Path>) -> bool {
        candidate_command(root.as_ref(), *self).is_some()
    }
}

impl std::fmt::Display for GateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ============================================================================
// Check Result
// ============================================================================

/// Result of one gate execution. Ephemeral: only pass/fail and failure
/// summaries are folded into persisted feature state.
#[derive(Debug, Clone)]
pub struct QualityCheckResult {
    /// Which gate ran.
    pub kind: GateKind,
    /// Whether the command exited zero (vacuously true when nothing ran).
    pub passed: bool,
    /// Combined stdout + stderr of the command.
    pub output: String,
    /// Normalized failures extracted from the output.
    pub failures: Vec<FailureDetail>,
    /// Wall-clock duration of the command.
    pub duration: Duration,
}

impl QualityCheckResult {
    /// A vacuous pass: no tool detected, nothing executed.
    #[must_use]
    pub fn vacuous(kind: GateKind) -> Self {
        Self {
            kind,
            passed: true,
            output: String::new(),
            failures: Vec::new(),
            duration: Duration::ZERO,
        }
    }

    /// Format a one-line summary for display.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.passed {
            format!("✅ {}: passed ({:.1}s)", self.kind, self.duration.as_secs_f64())
        } else {
            format!(
                "❌ {}: failed, {} issue(s) ({:.1}s)",
                self.kind,
                self.failures.len(),
                self.duration.as_secs_f64()
            )
        }
    }
}

// ============================================================================
// Gate Executor
// ============================================================================

/// Abstraction over "run every enabled gate once, in order".
///
/// Enables testing the retry loop without executing real commands.
#[async_trait]
pub trait GateExecutor: Send + Sync {
    /// Run all enabled gates in fixed order, no short-circuiting.
    async fn run_all(&self) -> crate::error::Result<Vec<QualityCheckResult>>;
}

#[async_trait]
impl GateExecutor for GateRunner {
    async fn run_all(&self) -> crate::error::Result<Vec<QualityCheckResult>> {
        GateRunner::run_all(self).await
    }
}

// ============================================================================
// Detection
// ============================================================================

/// Resolve the auto-detected command for a gate from project files alone.
///
/// Pure file sniffing; does not check whether the underlying tool is
/// installed. Returns `None` when nothing applicable is found.
#[must_use]
pub fn candidate_command(root: &Path, kind: GateKind) -> Option<String> {
    if let Some(cmd) = npm_script_command(root, kind) {
        return Some(cmd);
    }

    if root.join("Cargo.toml").exists() {
        return Some(
            match kind {
                GateKind::Test => "cargo test",
                GateKind::Lint => "cargo clippy --all-targets -- -D warnings",
                GateKind::Build => "cargo build",
            }
            .to_string(),
        );
    }

    if root.join("go.mod").exists() {
        return Some(
            match kind {
                GateKind::Test => "go test ./...",
                GateKind::Lint => "go vet ./...",
                GateKind::Build => "go build ./...",
            }
            .to_string(),
        );
    }

    if let Some(cmd) = makefile_target_command(root, kind) {
        return Some(cmd);
    }

    // A bare tsconfig.json (no package.json scripts) still implies a
    // type-check build.
    if kind == GateKind::Build && root.join("tsconfig.json").exists() {
        return Some("tsc --noEmit".to_string());
    }

    None
}

/// Resolve the command to actually execute: the candidate, filtered by
/// whether its tool exists on PATH.
#[must_use]
pub fn detect_command(root: &Path, kind: GateKind) -> Option<String> {
    let cmd = candidate_command(root, kind)?;
    let tool = cmd.split_whitespace().next()?;
    if which::which(tool).is_err() {
        tracing::debug!("detected `{cmd}` for {kind} gate but `{tool}` is not on PATH");
        return None;
    }
    Some(cmd)
}

/// `package.json` with a matching script: `npm test` / `npm run lint` /
/// `npm run build`.
fn npm_script_command(root: &Path, kind: GateKind) -> Option<String> {
    let contents = std::fs::read_to_string(root.join("package.json")).ok()?;
    let json: serde_json::Value = serde_json::from_str(&contents).ok()?;
    let scripts = json.get("scripts")?.as_object()?;

    let script = kind.name();
    if !scripts.contains_key(script) {
        return None;
    }

    Some(match kind {
        GateKind::Test => "npm test".to_string(),
        GateKind::Lint => "npm run lint".to_string(),
        GateKind::Build => "npm run build".to_string(),
    })
}

/// `Makefile` with a matching target: `make test` / `make lint` / `make build`.
fn makefile_target_command(root: &Path, kind: GateKind) -> Option<String> {
    let contents = std::fs::read_to_string(root.join("Makefile")).ok()?;
    let target = kind.name();
    let has_target = contents
        .lines()
        .any(|line| line.starts_with(&format!("{target}:")));
    has_target.then(|| format!("make {target}"))
}
