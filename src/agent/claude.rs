//! Claude CLI agent implementation.
//!
//! Wraps the `claude` CLI in print mode as the code generation agent. The
//! prompt is written to stdin to sidestep argument length limits, and the
//! whole invocation runs under a bounded timeout: a hung agent becomes a
//! failed outcome, never an indefinite wait.

use async_trait::async_trait;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command as AsyncCommand;
use tracing::{debug, info, warn};

use super::{AgentOutcome, CodeGenAgent, ImplementRequest};
use crate::config::AgentConfig;
use crate::error::{Result, SpecflowError};

// =============================================================================
// Agent Errors
// =============================================================================

/// Structured classification of agent CLI failures.
///
/// Classification enables appropriate handling upstream: rate limits are
/// retryable at a later time, a missing binary is an operator problem, a
/// refused request is not worth repeating.
#[derive(Error, Debug)]
pub enum AgentApiError {
    /// Rate limit exceeded - should retry with backoff.
    #[error("Rate limit exceeded: {message}")]
    RateLimited { message: String },

    /// Authentication failed - check API key.
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    /// Invalid request - check prompt/parameters.
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// Context length exceeded.
    #[error("Context length exceeded: {message}")]
    ContextLengthExceeded { message: String },

    /// Process exited with non-zero code.
    #[error("Process failed with exit code {exit_code}: {stderr}")]
    ProcessFailed { exit_code: i32, stderr: String },
}

impl AgentApiError {
    /// Check if this error indicates the request could be retried later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Parse error from agent CLI stderr output.
    #[must_use]
    pub fn from_stderr(stderr: &str, exit_code: i32) -> Self {
        let lower = stderr.to_lowercase();

        if lower.contains("rate limit")
            || lower.contains("too many requests")
            || lower.contains("429")
        {
            return Self::RateLimited {
                message: stderr.to_string(),
            };
        }

        if lower.contains("authentication")
            || lower.contains("unauthorized")
            || lower.contains("api key")
            || lower.contains("401")
        {
            return Self::AuthenticationFailed {
                message: stderr.to_string(),
            };
        }

        if lower.contains("invalid request")
            || lower.contains("bad request")
            || lower.contains("400")
        {
            return Self::InvalidRequest {
                message: stderr.to_string(),
            };
        }

        if lower.contains("context length")
            || lower.contains("too long")
            || lower.contains("max tokens")
        {
            return Self::ContextLengthExceeded {
                message: stderr.to_string(),
            };
        }

        Self::ProcessFailed {
            exit_code,
            stderr: stderr.to_string(),
        }
    }
}

// =============================================================================
// Claude Agent
// =============================================================================

/// Code generation agent backed by the `claude` CLI.
pub struct ClaudeAgent {
    command: String,
    extra_args: Vec<String>,
    model: Option<String>,
    timeout: Duration,
}

impl ClaudeAgent {
    /// Create an agent from configuration.
    #[must_use]
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            command: config.command.clone(),
            extra_args: config.args.clone(),
            model: config.model.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Whether the agent CLI binary is on PATH.
    #[must_use]
    pub fn is_available(&self) -> bool {
        which::which(&self.command).is_ok()
    }

    /// CLI arguments for one invocation: print mode, permissive edits, and
    /// any configured extras.
    fn build_args(&self) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            "--output-format".to_string(),
            "text".to_string(),
            "--dangerously-skip-permissions".to_string(),
        ];
        if let Some(ref model) = self.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }

    /// Assemble the prompt from the spec document and optional fix context.
    fn build_prompt(request: &ImplementRequest) -> String {
        let mut prompt = format!(
            "Implement the feature '{}' described by the following specification.\n\n\
             # Specification\n\n{}\n",
            request.feature_id, request.spec_content
        );

        if let Some(ref context) = request.additional_context {
            prompt.push_str("\n# Additional context\n\n");
            prompt.push_str(context);
            prompt.push('\n');
        }

        prompt
    }
}

#[async_trait]
impl CodeGenAgent for ClaudeAgent {
    async fn implement(&self, request: &ImplementRequest) -> Result<AgentOutcome> {
        if !self.is_available() {
            return Err(SpecflowError::AgentUnavailable {
                detail: format!("`{}` not found on PATH", self.command),
            });
        }

        let prompt = Self::build_prompt(request);
        debug!(
            "invoking agent for '{}' ({} prompt bytes)",
            request.feature_id,
            prompt.len()
        );

        let start = Instant::now();

        let mut child = AsyncCommand::new(&self.command)
            .args(self.build_args())
            .current_dir(&request.root)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => SpecflowError::AgentUnavailable {
                    detail: format!("`{}` not found on PATH", self.command),
                },
                _ => SpecflowError::agent(format!("failed to spawn agent: {e}")),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .map_err(|e| SpecflowError::agent(format!("failed to write prompt: {e}")))?;
        }

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(SpecflowError::agent(format!("agent process error: {e}")));
            }
            Err(_elapsed) => {
                warn!(
                    "agent timed out after {}s on '{}'",
                    self.timeout.as_secs(),
                    request.feature_id
                );
                return Ok(AgentOutcome::failed(
                    format!("agent timed out after {}s", self.timeout.as_secs()),
                    String::new(),
                    start.elapsed(),
                ));
            }
        };

        let duration = start.elapsed();
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if output.status.success() {
            info!(
                "agent finished '{}' in {:.1}s",
                request.feature_id,
                duration.as_secs_f64()
            );
            Ok(AgentOutcome::ok(stdout, duration))
        } else {
            let exit_code = output.status.code().unwrap_or(-1);
            let error = AgentApiError::from_stderr(&stderr, exit_code);
            warn!("agent failed '{}': {error}", request.feature_id);
            Ok(AgentOutcome::failed(error.to_string(), stdout, duration))
        }
    }
}
