//! Specflow - spec-driven implementation pipeline
//!
//! A Rust automation suite that turns natural-language feature descriptions
//! into working, quality-gated code: generation is delegated to an external
//! code-generation agent, the result is mechanically verified against
//! build/lint/test gates, and failures are fed back to the agent for
//! correction under a bounded retry budget. Runs survive process restarts
//! through a persisted checkpoint.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`agent`] - External code generation agent interface and Claude CLI driver
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Custom error types and handling
//! - [`gates`] - Quality gate detection, execution, and results
//! - [`normalize`] - Multi-format tool output normalization
//! - [`orchestrator`] - Per-feature retry-fix loop
//! - [`pipeline`] - Six-step pipeline state machine with checkpoint resume
//! - [`prompt`] - Fix-prompt generation from gate failures
//! - [`state`] - Durable feature state store and checkpoint persistence
//! - [`status`] - Read-only retry-eligibility policy
//! - [`testing`] - Testing infrastructure (scripted agent and gate doubles)
//!
//! # Example
//!
//! ```rust,ignore
//! use specflow::config::ProjectConfig;
//! use specflow::agent::ClaudeAgent;
//! use specflow::gates::GateRunner;
//! use specflow::pipeline::Pipeline;
//! use specflow::state::StateStore;
//!
//! let config = ProjectConfig::load(".")?;
//! let mut store = StateStore::open(config.state_dir("."))?;
//! let agent = ClaudeAgent::new(&config.agent);
//! let gates = GateRunner::new(".", &config);
//!
//! let pipeline = Pipeline::new(&agent, &gates, &config, ".");
//! let report = pipeline.run(&mut store, "auth", "users can log in", false).await?;
//! ```

pub mod agent;
pub mod config;
pub mod error;
pub mod gates;
pub mod normalize;
pub mod orchestrator;
pub mod pipeline;
pub mod prompt;
pub mod state;
pub mod status;
pub mod testing;

// Re-export commonly used types
pub use error::{Result, SpecflowError};

// Re-export config types
pub use config::{AgentConfig, GateConfig, GatesConfig, PipelineConfig, ProjectConfig};

// Re-export agent types
pub use agent::{AgentOutcome, ClaudeAgent, CodeGenAgent, ImplementRequest};

// Re-export gate types
pub use gates::{GateExecutor, GateKind, GateRunner, QualityCheckResult};

// Re-export normalizer types
pub use normalize::{FailureDetail, Normalizer, Severity};

// Re-export state types
pub use state::{FeatureState, FeatureStatus, PipelineState, PipelineStep, StateStore};

// Re-export status types
pub use status::{StatusDetector, StatusReport, StatusSummary};

// Re-export orchestrator and pipeline types
pub use orchestrator::{FeatureOrchestrator, ImplementationResult, ImplementationSummary};
pub use pipeline::{Pipeline, PipelineReport};
