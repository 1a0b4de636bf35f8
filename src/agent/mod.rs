//! External code generation agent interface.
//!
//! The pipeline depends only on this request/response contract: given a
//! prompt and a working directory, produce a success flag, captured output,
//! and a duration. How the agent generates code is opaque.
//!
//! [`claude::ClaudeAgent`] drives the `claude` CLI; tests substitute a
//! scripted double from [`crate::testing`].

pub mod claude;

pub use claude::ClaudeAgent;

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::Result;

/// One generation request for a feature.
#[derive(Debug, Clone)]
pub struct ImplementRequest {
    /// Stable feature identifier.
    pub feature_id: String,
    /// The feature's specification document.
    pub spec_content: String,
    /// Project root the agent works in.
    pub root: PathBuf,
    /// Extra context, e.g. a fix prompt describing gate failures.
    pub additional_context: Option<String>,
}

impl ImplementRequest {
    /// Create a request with no additional context.
    pub fn new(
        feature_id: impl Into<String>,
        spec_content: impl Into<String>,
        root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            feature_id: feature_id.into(),
            spec_content: spec_content.into(),
            root: root.into(),
            additional_context: None,
        }
    }

    /// Attach additional context (a fix prompt).
    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.additional_context = Some(context.into());
        self
    }
}

/// What the agent reported back.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    /// Whether the agent reported success.
    pub success: bool,
    /// Captured agent output.
    pub output: String,
    /// Error description when the agent failed.
    pub error: Option<String>,
    /// Wall-clock duration of the invocation.
    pub duration: Duration,
}

impl AgentOutcome {
    /// A successful outcome.
    #[must_use]
    pub fn ok(output: impl Into<String>, duration: Duration) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
            duration,
        }
    }

    /// A failed outcome with an error description.
    #[must_use]
    pub fn failed(
        error: impl Into<String>,
        output: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            success: false,
            output: output.into(),
            error: Some(error.into()),
            duration,
        }
    }
}

/// Abstraction over the external code generation agent.
///
/// # Errors
///
/// Implementations return `Err` only when the agent cannot be invoked at all
/// (binary missing, spawn failure). An agent that runs and reports failure
/// yields `Ok` with [`AgentOutcome::success`] false.
#[async_trait]
pub trait CodeGenAgent: Send + Sync {
    /// Run one generation attempt.
    async fn implement(&self, request: &ImplementRequest) -> Result<AgentOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let req = ImplementRequest::new("auth", "# Auth spec", "/proj")
            .with_context("previous failures: ...");
        assert_eq!(req.feature_id, "auth");
        assert_eq!(req.root, PathBuf::from("/proj"));
        assert!(req.additional_context.is_some());
    }

    #[test]
    fn test_outcome_constructors() {
        let ok = AgentOutcome::ok("done", Duration::from_secs(1));
        assert!(ok.success);
        assert!(ok.error.is_none());

        let failed = AgentOutcome::failed("boom", "", Duration::ZERO);
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("boom"));
    }
}
