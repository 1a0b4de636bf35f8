//! Custom error types for specflow.
//!
//! This module provides structured error types that enable better
//! error handling, reporting, and recovery throughout the pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for specflow operations
#[derive(Error, Debug)]
pub enum SpecflowError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Failed to load configuration
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        path: Option<PathBuf>,
    },

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfig { field: String, reason: String },

    /// Missing feature specification document
    #[error("Missing specification for feature '{feature_id}': {path}")]
    MissingSpec { feature_id: String, path: PathBuf },

    // =========================================================================
    // Agent Errors
    // =========================================================================
    /// The code generation agent could not be invoked at all
    #[error("Agent invocation failed: {message}")]
    Agent { message: String },

    /// The agent CLI binary is not installed or not on PATH
    #[error("Agent unavailable: {detail}")]
    AgentUnavailable { detail: String },

    // =========================================================================
    // Gate Errors
    // =========================================================================
    /// A gate command could not be executed (spawn failure, not check failure)
    #[error("Gate '{gate}' failed to execute: {message}")]
    GateExecution { gate: String, message: String },

    /// Missing required tool
    #[error("Missing required tool: {tool}")]
    MissingTool { tool: String },

    // =========================================================================
    // Pipeline Errors
    // =========================================================================
    /// A pipeline step failed and the run was aborted
    #[error("Pipeline step '{step}' failed: {message}")]
    Step { step: String, message: String },

    /// State persistence failed
    #[error("State persistence error: {message}")]
    State { message: String },

    // =========================================================================
    // Wrapped Errors
    // =========================================================================
    /// IO error wrapper
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON error wrapper
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SpecflowError {
    // =========================================================================
    // Constructor helpers
    // =========================================================================

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            path: None,
        }
    }

    /// Create a configuration error with path
    pub fn config_with_path(message: impl Into<String>, path: PathBuf) -> Self {
        Self::Config {
            message: message.into(),
            path: Some(path),
        }
    }

    /// Create an agent error
    pub fn agent(message: impl Into<String>) -> Self {
        Self::Agent {
            message: message.into(),
        }
    }

    /// Create a gate execution error
    pub fn gate(gate: impl Into<String>, message: impl Into<String>) -> Self {
        Self::GateExecution {
            gate: gate.into(),
            message: message.into(),
        }
    }

    /// Create a pipeline step error
    pub fn step(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Step {
            step: step.into(),
            message: message.into(),
        }
    }

    /// Create a state persistence error
    pub fn state(message: impl Into<String>) -> Self {
        Self::State {
            message: message.into(),
        }
    }

    // =========================================================================
    // Classification helpers
    // =========================================================================

    /// Check if this error is recoverable by resuming the run
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Step { .. } | Self::GateExecution { .. } | Self::Agent { .. }
        )
    }

    /// Get error code for exit status
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Agent { .. } | Self::AgentUnavailable { .. } => 2,
            Self::Step { .. } => 3,
            Self::MissingSpec { .. } | Self::MissingTool { .. } => 6,
            Self::Config { .. } | Self::InvalidConfig { .. } => 7,
            _ => 1,
        }
    }
}

/// Type alias for specflow results
pub type Result<T> = std::result::Result<T, SpecflowError>;
