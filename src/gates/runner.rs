//! Gate command execution with bounded timeouts.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{detect_command, GateKind, QualityCheckResult};
use crate::config::{GatesConfig, ProjectConfig};
use crate::error::{Result, SpecflowError};
use crate::normalize::{FailureDetail, Normalizer, Severity};

/// Executes quality gate commands and normalizes their output.
///
/// Gates run strictly sequentially; the runner never executes two commands
/// at once. Commands go through the shell so configured overrides can use
/// pipes and arguments freely.
pub struct GateRunner {
    root: PathBuf,
    gates: GatesConfig,
    normalizer: Normalizer,
}

impl GateRunner {
    /// Create a runner for the given project root.
    pub fn new(root: impl AsRef<Path>, config: &ProjectConfig) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            gates: config.gates.clone(),
            normalizer: Normalizer::new(),
        }
    }

    /// Gates that are enabled in configuration, in fixed execution order.
    #[must_use]
    pub fn enabled_gates(&self) -> Vec<GateKind> {
        GateKind::ALL
            .into_iter()
            .filter(|kind| self.gate_config(*kind).enabled)
            .collect()
    }

    /// Run a single gate.
    ///
    /// A disabled gate, or an enabled gate with no override and no detected
    /// tooling, passes vacuously. A timeout is reported as a failed result
    /// with a synthetic failure record, never as a hang or a Rust error.
    ///
    /// # Errors
    ///
    /// Returns an error only if the command cannot be spawned at all.
    pub async fn run(&self, kind: GateKind) -> Result<QualityCheckResult> {
        let gate = self.gate_config(kind);

        if !gate.enabled {
            debug!("{kind} gate disabled, skipping");
            return Ok(QualityCheckResult::vacuous(kind));
        }

        let command = match gate
            .command
            .clone()
            .or_else(|| detect_command(&self.root, kind))
        {
            Some(cmd) => cmd,
            None => {
                debug!("no tooling detected for {kind} gate, vacuous pass");
                return Ok(QualityCheckResult::vacuous(kind));
            }
        };

        info!("running {kind} gate: {command}");
        let timeout = Duration::from_secs(gate.timeout_secs);
        let start = Instant::now();

        let output_future = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .current_dir(&self.root)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(timeout, output_future).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(SpecflowError::gate(
                    kind.name(),
                    format!("failed to spawn `{command}`: {e}"),
                ));
            }
            Err(_elapsed) => {
                warn!("{kind} gate timed out after {}s", gate.timeout_secs);
                return Ok(QualityCheckResult {
                    kind,
                    passed: false,
                    output: String::new(),
                    failures: vec![FailureDetail::new(
                        Severity::Error,
                        format!("{kind} gate timed out after {}s", gate.timeout_secs),
                    )],
                    duration: start.elapsed(),
                });
            }
        };

        let duration = start.elapsed();
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let combined = format!("{stdout}\n{stderr}");

        let failures = self.normalizer.parse(&combined);

        // Exit status decides pass/fail; parsed failures are diagnostics.
        let passed = output.status.success();

        if passed {
            debug!("{kind} gate passed in {:.1}s", duration.as_secs_f64());
        } else {
            info!(
                "{kind} gate failed with {} parsed issue(s) in {:.1}s",
                failures.len(),
                duration.as_secs_f64()
            );
        }

        Ok(QualityCheckResult {
            kind,
            passed,
            output: combined,
            failures,
            duration,
        })
    }

    /// Run all enabled gates in fixed order, no short-circuiting.
    ///
    /// Every enabled gate runs on every pass so a fix prompt can address all
    /// problems in one shot rather than one gate at a time.
    pub async fn run_all(&self) -> Result<Vec<QualityCheckResult>> {
        let mut results = Vec::new();
        for kind in self.enabled_gates() {
            results.push(self.run(kind).await?);
        }
        Ok(results)
    }

    fn gate_config(&self, kind: GateKind) -> &crate::config::GateConfig {
        match kind {
            GateKind::Test => &self.gates.test,
            GateKind::Lint => &self.gates.lint,
            GateKind::Build => &self.gates.build,
        }
    }
}
