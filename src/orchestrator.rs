//! The retry-fix loop: drives one feature through generation, quality
//! gates, and bounded fix attempts to a terminal state.
//!
//! # State machine
//!
//! ```text
//! pending ──> in-progress ──agent──> testing ──gates──> completed
//!                 │                     │
//!                 │ agent failure       │ gate failure
//!                 ▼                     ▼
//!               failed <──budget── fix loop (≤ max_retries)
//! ```
//!
//! Every transition is persisted before the loop proceeds, so a process
//! interruption at any point leaves a state consistent with the last
//! completed action and the run can safely be re-invoked.
//!
//! Agent invocation failure is terminal for the attempt and is not retried;
//! only gate failures drive the fix loop. All enabled gates re-run on every
//! fix iteration, even those that passed before — a fix for one gate can
//! regress another.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::agent::{CodeGenAgent, ImplementRequest};
use crate::error::Result;
use crate::gates::{GateExecutor, GateKind, QualityCheckResult};
use crate::prompt::FixPromptBuilder;
use crate::state::{FeatureStatus, StateStore};

// ============================================================================
// Implementation Result
// ============================================================================

/// Outcome of driving one feature to a terminal state.
///
/// The CLI layer maps a batch of these to an exit code; the orchestrator
/// itself never turns gate failures into process errors.
#[derive(Debug)]
pub struct ImplementationResult {
    /// Feature this result belongs to.
    pub feature_id: String,
    /// Whether the feature reached `completed`.
    pub success: bool,
    /// Results of the final gate round.
    pub gate_results: Vec<QualityCheckResult>,
    /// Retry counter value at the end of the run.
    pub retry_count: u32,
    /// Error description for agent failures or budget exhaustion.
    pub error: Option<String>,
}

impl ImplementationResult {
    /// Names of gates that failed in the final round.
    #[must_use]
    pub fn failing_gates(&self) -> Vec<&'static str> {
        self.gate_results
            .iter()
            .filter(|r| !r.passed)
            .map(|r| r.kind.name())
            .collect()
    }
}

/// Machine-readable summary of a result, for `--json` output.
#[derive(Debug, Serialize)]
pub struct ImplementationSummary {
    pub feature_id: String,
    pub success: bool,
    pub retry_count: u32,
    pub failing_gates: Vec<String>,
    pub error: Option<String>,
}

impl From<&ImplementationResult> for ImplementationSummary {
    fn from(result: &ImplementationResult) -> Self {
        Self {
            feature_id: result.feature_id.clone(),
            success: result.success,
            retry_count: result.retry_count,
            failing_gates: result
                .failing_gates()
                .into_iter()
                .map(str::to_string)
                .collect(),
            error: result.error.clone(),
        }
    }
}

// ============================================================================
// Feature Orchestrator
// ============================================================================

/// Runs the per-feature retry-fix loop.
pub struct FeatureOrchestrator<'a> {
    agent: &'a dyn CodeGenAgent,
    gates: &'a dyn GateExecutor,
    prompts: FixPromptBuilder,
    max_retries: u32,
    root: PathBuf,
}

impl<'a> FeatureOrchestrator<'a> {
    /// Create an orchestrator over the given collaborators.
    pub fn new(
        agent: &'a dyn CodeGenAgent,
        gates: &'a dyn GateExecutor,
        max_retries: u32,
        root: impl AsRef<Path>,
    ) -> Self {
        Self {
            agent,
            gates,
            prompts: FixPromptBuilder::new(),
            max_retries,
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Drive one feature to a terminal state.
    ///
    /// # Errors
    ///
    /// Returns an error only for unexpected internal failures (agent spawn
    /// errors, state persistence I/O). Agent-reported failures and exhausted
    /// retry budgets are normal terminal outcomes carried in the result.
    pub async fn run(
        &self,
        store: &mut StateStore,
        feature_id: &str,
        spec_content: &str,
    ) -> Result<ImplementationResult> {
        // A crash after this point must not silently resume as pending.
        store.set_current_feature(Some(feature_id));
        store.update_status(feature_id, FeatureStatus::InProgress);
        store.save()?;

        info!("implementing feature '{feature_id}'");
        let request = ImplementRequest::new(feature_id, spec_content, &self.root);
        let outcome = self.agent.implement(&request).await?;

        if !outcome.success {
            let error = outcome
                .error
                .unwrap_or_else(|| "agent reported failure".to_string());
            warn!("agent failed on '{feature_id}': {error}");
            return self.finish_failed(store, feature_id, Vec::new(), Some(error));
        }

        // Generation finished; gates take over. Failed checks describe the
        // most recent attempt, so the slate is wiped here.
        store.update_status(feature_id, FeatureStatus::Testing);
        store.clear_failed_checks(feature_id);
        store.save()?;

        let mut results = self.gates.run_all().await?;

        while !failing_kinds(&results).is_empty() {
            let consumed = store
                .feature(feature_id)
                .map(|f| f.retry_count)
                .unwrap_or(0);
            if consumed >= self.max_retries {
                info!(
                    "retry budget exhausted for '{feature_id}' ({consumed}/{})",
                    self.max_retries
                );
                for kind in failing_kinds(&results) {
                    store.add_failed_check(feature_id, kind.name());
                }
                let error = format!("retry budget exhausted after {consumed} retries");
                return self.finish_failed(store, feature_id, results, Some(error));
            }

            let retry = store.increment_retry(feature_id);
            store.save()?;
            debug!("fix attempt {retry}/{} for '{feature_id}'", self.max_retries);

            let fix_prompt = self.prompts.build(&results);
            let request = ImplementRequest::new(feature_id, spec_content, &self.root)
                .with_context(fix_prompt);
            let outcome = self.agent.implement(&request).await?;

            if !outcome.success {
                let error = outcome
                    .error
                    .unwrap_or_else(|| "agent reported failure".to_string());
                warn!("agent failed during fix attempt on '{feature_id}': {error}");
                return self.finish_failed(store, feature_id, results, Some(error));
            }

            results = self.gates.run_all().await?;
        }

        store.update_status(feature_id, FeatureStatus::Completed);
        store.set_current_feature(None);
        store.save()?;

        let retry_count = store
            .feature(feature_id)
            .map(|f| f.retry_count)
            .unwrap_or(0);
        info!("feature '{feature_id}' completed after {retry_count} retries");

        Ok(ImplementationResult {
            feature_id: feature_id.to_string(),
            success: true,
            gate_results: results,
            retry_count,
            error: None,
        })
    }

    /// Terminal failure path: persist, then build the result.
    fn finish_failed(
        &self,
        store: &mut StateStore,
        feature_id: &str,
        gate_results: Vec<QualityCheckResult>,
        error: Option<String>,
    ) -> Result<ImplementationResult> {
        store.update_status(feature_id, FeatureStatus::Failed);
        store.set_current_feature(None);
        store.save()?;

        let retry_count = store
            .feature(feature_id)
            .map(|f| f.retry_count)
            .unwrap_or(0);

        Ok(ImplementationResult {
            feature_id: feature_id.to_string(),
            success: false,
            gate_results,
            retry_count,
            error,
        })
    }
}

/// Gate kinds that failed in the given round.
fn failing_kinds(results: &[QualityCheckResult]) -> Vec<GateKind> {
    results
        .iter()
        .filter(|r| !r.passed)
        .map(|r| r.kind)
        .collect()
}
