//! Testing infrastructure: scripted doubles for the agent and gate runner.
//!
//! These doubles let the orchestrator and pipeline be exercised without
//! spawning real processes. Both are scripted with queues: each call pops
//! the next scripted response, falling back to success when the queue runs
//! dry.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use crate::agent::{AgentOutcome, CodeGenAgent, ImplementRequest};
use crate::error::Result;
use crate::gates::{GateExecutor, GateKind, QualityCheckResult};
use crate::normalize::{FailureDetail, Severity};

// ============================================================================
// Mock Agent
// ============================================================================

/// Scripted [`CodeGenAgent`] double.
///
/// Records every request it receives; pops scripted outcomes in order and
/// succeeds by default once the script is exhausted.
#[derive(Default)]
pub struct MockAgent {
    outcomes: Mutex<VecDeque<AgentOutcome>>,
    requests: Mutex<Vec<ImplementRequest>>,
}

impl MockAgent {
    /// Create a mock that always succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful outcome.
    pub fn push_success(&self, output: impl Into<String>) {
        self.outcomes
            .lock()
            .unwrap()
            .push_back(AgentOutcome::ok(output, Duration::from_millis(10)));
    }

    /// Queue a failed outcome.
    pub fn push_failure(&self, error: impl Into<String>) {
        self.outcomes
            .lock()
            .unwrap()
            .push_back(AgentOutcome::failed(error, "", Duration::from_millis(10)));
    }

    /// Number of invocations so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Clone of all requests received, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<ImplementRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CodeGenAgent for MockAgent {
    async fn implement(&self, request: &ImplementRequest) -> Result<AgentOutcome> {
        self.requests.lock().unwrap().push(request.clone());
        let outcome = self
            .outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| AgentOutcome::ok("", Duration::from_millis(10)));
        Ok(outcome)
    }
}

// ============================================================================
// Mock Gate Runner
// ============================================================================

/// Scripted [`GateExecutor`] double.
///
/// Each `run_all` call pops one scripted round of results; once exhausted,
/// every round passes.
#[derive(Default)]
pub struct MockGateRunner {
    rounds: Mutex<VecDeque<Vec<QualityCheckResult>>>,
    calls: Mutex<usize>,
}

impl MockGateRunner {
    /// Create a mock whose gates always pass.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a round where every gate passes.
    pub fn push_passing_round(&self) {
        self.rounds.lock().unwrap().push_back(passing_round());
    }

    /// Queue a round where the given gates fail with one parsed issue each.
    pub fn push_failing_round(&self, failing: &[GateKind]) {
        self.rounds
            .lock()
            .unwrap()
            .push_back(failing_round(failing));
    }

    /// Number of `run_all` invocations so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl GateExecutor for MockGateRunner {
    async fn run_all(&self) -> Result<Vec<QualityCheckResult>> {
        *self.calls.lock().unwrap() += 1;
        Ok(self
            .rounds
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(passing_round))
    }
}

/// A full round of passing results, one per gate in fixed order.
#[must_use]
pub fn passing_round() -> Vec<QualityCheckResult> {
    GateKind::ALL
        .into_iter()
        .map(QualityCheckResult::vacuous)
        .collect()
}

/// A full round where the listed gates fail, each with one parsed issue.
#[must_use]
pub fn failing_round(failing: &[GateKind]) -> Vec<QualityCheckResult> {
    GateKind::ALL
        .into_iter()
        .map(|kind| {
            if failing.contains(&kind) {
                QualityCheckResult {
                    kind,
                    passed: false,
                    output: format!("{kind} command output"),
                    failures: vec![FailureDetail::new(
                        Severity::Error,
                        format!("{kind} check failed"),
                    )
                    .with_location("src/generated.ts", Some(1))],
                    duration: Duration::from_millis(5),
                }
            } else {
                QualityCheckResult::vacuous(kind)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_agent_scripted_then_default() {
        let agent = MockAgent::new();
        agent.push_failure("first fails");

        let request = ImplementRequest::new("f", "spec", ".");
        let first = agent.implement(&request).await.unwrap();
        assert!(!first.success);

        let second = agent.implement(&request).await.unwrap();
        assert!(second.success);
        assert_eq!(agent.call_count(), 2);
    }

    #[tokio::test]
    async fn test_mock_agent_records_requests() {
        let agent = MockAgent::new();
        let request = ImplementRequest::new("f", "spec", ".").with_context("fix this");
        agent.implement(&request).await.unwrap();

        let seen = agent.requests();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].additional_context.as_deref(), Some("fix this"));
    }

    #[tokio::test]
    async fn test_mock_gate_runner_rounds() {
        let gates = MockGateRunner::new();
        gates.push_failing_round(&[GateKind::Lint]);

        let first = gates.run_all().await.unwrap();
        assert!(!first.iter().all(|r| r.passed));
        assert!(first.iter().any(|r| r.kind == GateKind::Lint && !r.passed));

        let second = gates.run_all().await.unwrap();
        assert!(second.iter().all(|r| r.passed));
        assert_eq!(gates.call_count(), 2);
    }

    #[test]
    fn test_failing_round_has_all_gates_in_order() {
        let round = failing_round(&[GateKind::Build]);
        assert_eq!(round.len(), 3);
        assert_eq!(round[0].kind, GateKind::Test);
        assert_eq!(round[2].kind, GateKind::Build);
        assert!(!round[2].passed);
    }
}
