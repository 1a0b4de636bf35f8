//! The pipeline step machine: initialize → specify → plan → tasks →
//! implement → quality.
//!
//! Document steps (specify, plan, tasks) each produce an artifact under
//! `specs/<feature-id>/`; a fresh run skips any step whose artifact already
//! exists, while `implement` and `quality` always run when reached. An
//! explicit resume trusts the persisted checkpoint over artifact
//! re-detection and executes the checkpoint step through the end.
//!
//! The checkpoint is written after every step completion and on step
//! failure, so an interrupted run resumes at the step that did not finish.
//! There is no automatic retry at this granularity — retrying a step is a
//! user-initiated resume.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::agent::{CodeGenAgent, ImplementRequest};
use crate::config::ProjectConfig;
use crate::error::{Result, SpecflowError};
use crate::gates::GateExecutor;
use crate::orchestrator::{FeatureOrchestrator, ImplementationResult};
use crate::state::{PipelineStep, StateStore};

/// File name of the specification artifact.
pub const SPEC_FILE: &str = "spec.md";
/// File name of the plan artifact.
pub const PLAN_FILE: &str = "plan.md";
/// File name of the task list artifact.
pub const TASKS_FILE: &str = "tasks.md";

// ============================================================================
// Run Report
// ============================================================================

/// What a pipeline run did for one feature.
#[derive(Debug)]
pub struct PipelineReport {
    /// Feature the run worked on.
    pub feature_id: String,
    /// Steps that actually executed, in order.
    pub steps_run: Vec<PipelineStep>,
    /// Result of the implement step, when it ran.
    pub implementation: Option<ImplementationResult>,
}

// ============================================================================
// Pipeline
// ============================================================================

/// Coarse-grained state machine over an entire feature lifecycle.
pub struct Pipeline<'a> {
    agent: &'a dyn CodeGenAgent,
    gates: &'a dyn GateExecutor,
    config: &'a ProjectConfig,
    root: PathBuf,
}

impl<'a> Pipeline<'a> {
    /// Create a pipeline over the given collaborators.
    pub fn new(
        agent: &'a dyn CodeGenAgent,
        gates: &'a dyn GateExecutor,
        config: &'a ProjectConfig,
        root: impl AsRef<Path>,
    ) -> Self {
        Self {
            agent,
            gates,
            config,
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Directory holding a feature's artifacts.
    #[must_use]
    pub fn feature_dir(&self, feature_id: &str) -> PathBuf {
        self.config.specs_dir(&self.root).join(feature_id)
    }

    /// The artifact a step produces, or `None` for steps that always run.
    #[must_use]
    pub fn artifact_path(&self, feature_id: &str, step: PipelineStep) -> Option<PathBuf> {
        let dir = self.feature_dir(feature_id);
        match step {
            PipelineStep::Initialize => Some(dir),
            PipelineStep::Specify => Some(dir.join(SPEC_FILE)),
            PipelineStep::Plan => Some(dir.join(PLAN_FILE)),
            PipelineStep::Tasks => Some(dir.join(TASKS_FILE)),
            PipelineStep::Implement | PipelineStep::Quality => None,
        }
    }

    /// Compute the steps a run will execute.
    ///
    /// Fresh runs skip steps whose artifact already exists. An explicit
    /// resume trusts the checkpoint: that step through the end, ignoring
    /// artifact presence. A resume with no recorded checkpoint degrades to
    /// a fresh plan.
    #[must_use]
    pub fn plan_steps(
        &self,
        feature_id: &str,
        resume_from: Option<PipelineStep>,
    ) -> Vec<PipelineStep> {
        if let Some(checkpoint) = resume_from {
            return checkpoint.through_end();
        }

        PipelineStep::ALL
            .into_iter()
            .filter(|step| match self.artifact_path(feature_id, *step) {
                Some(path) => !path.exists(),
                None => true,
            })
            .collect()
    }

    /// Run the pipeline for one feature.
    ///
    /// `description` seeds the specify step; `resume` switches step planning
    /// from artifact detection to the persisted checkpoint.
    ///
    /// # Errors
    ///
    /// A failing step aborts the run with [`SpecflowError::Step`] after
    /// persisting the checkpoint at the failed step.
    pub async fn run(
        &self,
        store: &mut StateStore,
        feature_id: &str,
        description: &str,
        resume: bool,
    ) -> Result<PipelineReport> {
        let resume_from = if resume { store.checkpoint() } else { None };
        let steps = self.plan_steps(feature_id, resume_from);
        info!(
            "pipeline for '{feature_id}': {}",
            steps
                .iter()
                .map(|s| s.name())
                .collect::<Vec<_>>()
                .join(" → ")
        );

        store.mark_run_started();
        store.set_current_feature(Some(feature_id));
        store.save()?;

        let mut report = PipelineReport {
            feature_id: feature_id.to_string(),
            steps_run: Vec::new(),
            implementation: None,
        };

        for step in steps {
            let outcome = self
                .execute_step(store, feature_id, description, step, &mut report)
                .await;

            match outcome {
                Ok(()) => {
                    store.set_checkpoint(step);
                    store.record_step(feature_id, step.name());
                    store.save()?;
                    report.steps_run.push(step);
                }
                Err(e) => {
                    // Resume retries the failed step, not the one after it.
                    // Step-level failures arrive as Step errors; internal
                    // errors (agent unavailable, I/O) pass through unchanged.
                    warn!("step '{step}' failed for '{feature_id}': {e}");
                    store.set_checkpoint(step);
                    store.save()?;
                    return Err(e);
                }
            }
        }

        Ok(report)
    }

    async fn execute_step(
        &self,
        store: &mut StateStore,
        feature_id: &str,
        description: &str,
        step: PipelineStep,
        report: &mut PipelineReport,
    ) -> Result<()> {
        match step {
            PipelineStep::Initialize => self.step_initialize(feature_id),
            PipelineStep::Specify | PipelineStep::Plan | PipelineStep::Tasks => {
                self.step_generate_document(feature_id, description, step)
                    .await
            }
            PipelineStep::Implement => {
                let spec_content = self.read_spec(feature_id)?;
                let orchestrator = FeatureOrchestrator::new(
                    self.agent,
                    self.gates,
                    self.config.pipeline.max_retries,
                    &self.root,
                );
                let result = orchestrator.run(store, feature_id, &spec_content).await?;
                let success = result.success;
                let error = result.error.clone();
                report.implementation = Some(result);
                if success {
                    Ok(())
                } else {
                    Err(SpecflowError::step(
                        "implement",
                        error.unwrap_or_else(|| "implementation failed".to_string()),
                    ))
                }
            }
            PipelineStep::Quality => {
                let results = self.gates.run_all().await?;
                let failing: Vec<&str> = results
                    .iter()
                    .filter(|r| !r.passed)
                    .map(|r| r.kind.name())
                    .collect();
                if failing.is_empty() {
                    Ok(())
                } else {
                    Err(SpecflowError::step(
                        "quality",
                        format!("gates failed: {}", failing.join(", ")),
                    ))
                }
            }
        }
    }

    /// Create the feature's artifact directory skeleton.
    fn step_initialize(&self, feature_id: &str) -> Result<()> {
        let dir = self.feature_dir(feature_id);
        std::fs::create_dir_all(&dir)?;
        info!("initialized {}", dir.display());
        Ok(())
    }

    /// Ask the agent for a document and write it to the step's artifact.
    async fn step_generate_document(
        &self,
        feature_id: &str,
        description: &str,
        step: PipelineStep,
    ) -> Result<()> {
        let prompt = self.document_prompt(feature_id, description, step)?;
        let request = ImplementRequest::new(feature_id, prompt, &self.root);
        let outcome = self.agent.implement(&request).await?;

        if !outcome.success {
            return Err(SpecflowError::step(
                step.name(),
                outcome
                    .error
                    .unwrap_or_else(|| "agent reported failure".to_string()),
            ));
        }

        let path = self
            .artifact_path(feature_id, step)
            .expect("document steps have artifacts");
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, outcome.output)?;
        info!("wrote {}", path.display());
        Ok(())
    }

    /// Build the generation prompt for a document step.
    fn document_prompt(
        &self,
        feature_id: &str,
        description: &str,
        step: PipelineStep,
    ) -> Result<String> {
        Ok(match step {
            PipelineStep::Specify => format!(
                "Write a specification document for the feature '{feature_id}'.\n\n\
                 Feature description:\n\n{description}\n\n\
                 Respond with the complete specification document only.",
            ),
            PipelineStep::Plan => format!(
                "Write an implementation plan for the feature '{feature_id}' based on \
                 this specification:\n\n{}\n\n\
                 Respond with the complete plan document only.",
                self.read_spec(feature_id)?
            ),
            PipelineStep::Tasks => format!(
                "Break the implementation plan for '{feature_id}' into an ordered \
                 task list:\n\n{}\n\n\
                 Respond with the complete task list only.",
                self.read_artifact(feature_id, PipelineStep::Plan)?
            ),
            _ => unreachable!("not a document step"),
        })
    }

    /// Read the specification artifact for a feature.
    fn read_spec(&self, feature_id: &str) -> Result<String> {
        self.read_artifact(feature_id, PipelineStep::Specify)
    }

    fn read_artifact(&self, feature_id: &str, step: PipelineStep) -> Result<String> {
        let path = self
            .artifact_path(feature_id, step)
            .expect("artifact-bearing step");
        std::fs::read_to_string(&path).map_err(|_| SpecflowError::MissingSpec {
            feature_id: feature_id.to_string(),
            path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{FeatureStatus, StateStore};
    use crate::testing::{MockAgent, MockGateRunner};
    use tempfile::TempDir;

    struct Fixture {
        temp: TempDir,
        config: ProjectConfig,
        agent: MockAgent,
        gates: MockGateRunner,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                temp: TempDir::new().unwrap(),
                config: ProjectConfig::default(),
                agent: MockAgent::new(),
                gates: MockGateRunner::new(),
            }
        }

        fn pipeline(&self) -> Pipeline<'_> {
            Pipeline::new(&self.agent, &self.gates, &self.config, self.temp.path())
        }

        fn store(&self) -> StateStore {
            StateStore::open(self.temp.path().join(".specflow")).unwrap()
        }
    }

    #[test]
    fn test_fresh_plan_includes_all_steps() {
        let fx = Fixture::new();
        let steps = fx.pipeline().plan_steps("auth", None);
        assert_eq!(steps, PipelineStep::ALL.to_vec());
    }

    #[test]
    fn test_fresh_plan_skips_existing_artifacts() {
        let fx = Fixture::new();
        let pipeline = fx.pipeline();
        let dir = pipeline.feature_dir("auth");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(SPEC_FILE), "# spec").unwrap();
        std::fs::write(dir.join(PLAN_FILE), "# plan").unwrap();

        let steps = pipeline.plan_steps("auth", None);
        assert_eq!(
            steps,
            vec![
                PipelineStep::Tasks,
                PipelineStep::Implement,
                PipelineStep::Quality,
            ]
        );
    }

    #[test]
    fn test_implement_and_quality_always_run() {
        let fx = Fixture::new();
        let pipeline = fx.pipeline();
        let dir = pipeline.feature_dir("auth");
        std::fs::create_dir_all(&dir).unwrap();
        for file in [SPEC_FILE, PLAN_FILE, TASKS_FILE] {
            std::fs::write(dir.join(file), "content").unwrap();
        }

        let steps = pipeline.plan_steps("auth", None);
        assert_eq!(steps, vec![PipelineStep::Implement, PipelineStep::Quality]);
    }

    #[test]
    fn test_resume_trusts_checkpoint_over_artifacts() {
        let fx = Fixture::new();
        // No artifacts exist, but the checkpoint says plan.
        let steps = fx.pipeline().plan_steps("auth", Some(PipelineStep::Plan));
        assert_eq!(
            steps,
            vec![
                PipelineStep::Plan,
                PipelineStep::Tasks,
                PipelineStep::Implement,
                PipelineStep::Quality,
            ]
        );
    }

    #[tokio::test]
    async fn test_full_run_writes_artifacts_and_completes() {
        let fx = Fixture::new();
        fx.agent.push_success("# Specification");
        fx.agent.push_success("# Plan");
        fx.agent.push_success("# Tasks");
        // Remaining agent calls (implement) default to success.
        let pipeline = fx.pipeline();
        let mut store = fx.store();

        let report = pipeline
            .run(&mut store, "auth", "users can log in", false)
            .await
            .unwrap();

        assert_eq!(report.steps_run, PipelineStep::ALL.to_vec());
        let dir = pipeline.feature_dir("auth");
        assert_eq!(
            std::fs::read_to_string(dir.join(SPEC_FILE)).unwrap(),
            "# Specification"
        );
        assert!(dir.join(PLAN_FILE).exists());
        assert!(dir.join(TASKS_FILE).exists());

        assert_eq!(store.checkpoint(), Some(PipelineStep::Quality));
        assert_eq!(
            store.feature("auth").unwrap().status,
            FeatureStatus::Completed
        );
        let implementation = report.implementation.unwrap();
        assert!(implementation.success);

        // Every completed step is recorded on the feature.
        let recorded = &store.feature("auth").unwrap().implemented_steps;
        for step in PipelineStep::ALL {
            assert!(recorded.contains(step.name()), "missing {step}");
        }
    }

    #[tokio::test]
    async fn test_step_failure_checkpoints_failed_step() {
        let fx = Fixture::new();
        fx.agent.push_success("# Specification");
        fx.agent.push_failure("rate limit exceeded");
        let pipeline = fx.pipeline();
        let mut store = fx.store();

        let err = pipeline
            .run(&mut store, "auth", "desc", false)
            .await
            .unwrap_err();
        assert!(matches!(err, SpecflowError::Step { .. }));
        assert!(err.to_string().contains("plan"));
        assert_eq!(store.checkpoint(), Some(PipelineStep::Plan));
    }

    #[tokio::test]
    async fn test_resume_retries_failed_step() {
        let fx = Fixture::new();
        fx.agent.push_success("# Specification");
        fx.agent.push_failure("transient failure");
        let pipeline = fx.pipeline();
        let mut store = fx.store();

        assert!(pipeline.run(&mut store, "auth", "desc", false).await.is_err());

        // Second invocation resumes from the failed plan step; the agent now
        // cooperates for plan, tasks, and implement.
        let report = pipeline.run(&mut store, "auth", "desc", true).await.unwrap();
        assert_eq!(report.steps_run[0], PipelineStep::Plan);
        assert_eq!(store.checkpoint(), Some(PipelineStep::Quality));
    }

    #[tokio::test]
    async fn test_implement_failure_aborts_run() {
        let fx = Fixture::new();
        fx.agent.push_success("# Specification");
        fx.agent.push_success("# Plan");
        fx.agent.push_success("# Tasks");
        fx.agent.push_failure("agent crashed");
        let pipeline = fx.pipeline();
        let mut store = fx.store();

        let err = pipeline
            .run(&mut store, "auth", "desc", false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("implement"));
        assert_eq!(store.checkpoint(), Some(PipelineStep::Implement));
        assert_eq!(store.feature("auth").unwrap().status, FeatureStatus::Failed);
    }

    #[tokio::test]
    async fn test_quality_step_failure() {
        let fx = Fixture::new();
        fx.agent.push_success("# Specification");
        fx.agent.push_success("# Plan");
        fx.agent.push_success("# Tasks");
        // Implement's gate round passes, the final quality round fails.
        fx.gates.push_passing_round();
        fx.gates.push_failing_round(&[crate::gates::GateKind::Build]);
        let pipeline = fx.pipeline();
        let mut store = fx.store();

        let err = pipeline
            .run(&mut store, "auth", "desc", false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("quality"));
        assert!(err.to_string().contains("build"));
        assert_eq!(store.checkpoint(), Some(PipelineStep::Quality));
    }

    #[tokio::test]
    async fn test_implement_without_spec_artifact_is_missing_spec() {
        let fx = Fixture::new();
        let pipeline = fx.pipeline();
        let mut store = fx.store();

        // Jump straight to implement via resume checkpoint.
        store.set_checkpoint(PipelineStep::Implement);
        let err = pipeline
            .run(&mut store, "auth", "desc", true)
            .await
            .unwrap_err();
        assert!(matches!(err, SpecflowError::MissingSpec { .. }));
        assert!(err.to_string().contains("auth"));
    }
}
