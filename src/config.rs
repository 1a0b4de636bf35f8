//! Configuration loading and validation.
//!
//! Configuration lives in `specflow.toml` at the project root. Every field
//! has a default, so a missing file is a valid configuration; a present but
//! malformed file is a hard error. The loaded [`ProjectConfig`] is created
//! once at startup and passed by reference into each component constructor —
//! there is no global configuration state.
//!
//! # Example
//!
//! ```toml
//! [pipeline]
//! max_retries = 3
//!
//! [gates.test]
//! command = "npm test"
//!
//! [gates.lint]
//! enabled = false
//!
//! [agent]
//! timeout_secs = 900
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, SpecflowError};
use crate::gates::GateKind;

/// Configuration file name, resolved relative to the project root.
pub const CONFIG_FILE: &str = "specflow.toml";

/// Default retry budget for the fix loop.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default per-gate command timeout in seconds.
pub const DEFAULT_GATE_TIMEOUT_SECS: u64 = 300;

/// Default agent invocation timeout in seconds.
pub const DEFAULT_AGENT_TIMEOUT_SECS: u64 = 1200;

// ============================================================================
// Sections
// ============================================================================

/// Pipeline-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum fix-loop iterations per feature.
    pub max_retries: u32,
    /// Directory (relative to the root) holding per-feature spec documents.
    pub specs_dir: String,
    /// Directory (relative to the root) holding persisted pipeline state.
    pub state_dir: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            specs_dir: "specs".to_string(),
            state_dir: ".specflow".to_string(),
        }
    }
}

/// Settings for one quality gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Whether this gate runs at all.
    pub enabled: bool,
    /// Explicit command override; when absent the gate is auto-detected.
    pub command: Option<String>,
    /// Command timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: None,
            timeout_secs: DEFAULT_GATE_TIMEOUT_SECS,
        }
    }
}

/// Per-gate settings, keyed by gate kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatesConfig {
    pub test: GateConfig,
    pub lint: GateConfig,
    pub build: GateConfig,
}

/// Settings for the external code generation agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Agent CLI binary name.
    pub command: String,
    /// Extra arguments passed on every invocation.
    pub args: Vec<String>,
    /// Invocation timeout in seconds.
    pub timeout_secs: u64,
    /// Model override passed to the agent CLI.
    pub model: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            args: Vec::new(),
            timeout_secs: DEFAULT_AGENT_TIMEOUT_SECS,
            model: None,
        }
    }
}

// ============================================================================
// ProjectConfig
// ============================================================================

/// Root configuration object, loaded once per process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub pipeline: PipelineConfig,
    pub gates: GatesConfig,
    pub agent: AgentConfig,
}

impl ProjectConfig {
    /// Load configuration from `specflow.toml` under the given root.
    ///
    /// A missing file yields defaults. A present but malformed file is a
    /// configuration error carrying the offending path.
    pub fn load(root: impl AsRef<Path>) -> Result<Self> {
        let path = root.as_ref().join(CONFIG_FILE);

        if !path.exists() {
            tracing::debug!("no {CONFIG_FILE} found, using defaults");
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&path)
            .map_err(|e| SpecflowError::config_with_path(e.to_string(), path.clone()))?;

        let config: Self = toml::from_str(&contents)
            .map_err(|e| SpecflowError::config_with_path(e.to_string(), path))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.max_retries > 100 {
            return Err(SpecflowError::InvalidConfig {
                field: "pipeline.max_retries".to_string(),
                reason: format!("{} exceeds the maximum of 100", self.pipeline.max_retries),
            });
        }

        for (name, gate) in [
            ("gates.test", &self.gates.test),
            ("gates.lint", &self.gates.lint),
            ("gates.build", &self.gates.build),
        ] {
            if gate.timeout_secs == 0 {
                return Err(SpecflowError::InvalidConfig {
                    field: format!("{name}.timeout_secs"),
                    reason: "timeout must be nonzero".to_string(),
                });
            }
        }

        if self.agent.timeout_secs == 0 {
            return Err(SpecflowError::InvalidConfig {
                field: "agent.timeout_secs".to_string(),
                reason: "timeout must be nonzero".to_string(),
            });
        }

        if self.agent.command.trim().is_empty() {
            return Err(SpecflowError::InvalidConfig {
                field: "agent.command".to_string(),
                reason: "command must not be empty".to_string(),
            });
        }

        Ok(())
    }

    /// Settings for the given gate kind.
    #[must_use]
    pub fn gate(&self, kind: GateKind) -> &GateConfig {
        match kind {
            GateKind::Test => &self.gates.test,
            GateKind::Lint => &self.gates.lint,
            GateKind::Build => &self.gates.build,
        }
    }

    /// Absolute path of the per-feature specs directory.
    #[must_use]
    pub fn specs_dir(&self, root: impl AsRef<Path>) -> PathBuf {
        root.as_ref().join(&self.pipeline.specs_dir)
    }

    /// Absolute path of the state directory.
    #[must_use]
    pub fn state_dir(&self, root: impl AsRef<Path>) -> PathBuf {
        root.as_ref().join(&self.pipeline.state_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_without_file() {
        let temp = TempDir::new().unwrap();
        let config = ProjectConfig::load(temp.path()).unwrap();
        assert_eq!(config.pipeline.max_retries, DEFAULT_MAX_RETRIES);
        assert!(config.gates.test.enabled);
        assert!(config.gates.lint.enabled);
        assert!(config.gates.build.enabled);
        assert_eq!(config.agent.command, "claude");
    }

    #[test]
    fn test_load_partial_file() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(CONFIG_FILE),
            "[pipeline]\nmax_retries = 5\n\n[gates.lint]\nenabled = false\n",
        )
        .unwrap();

        let config = ProjectConfig::load(temp.path()).unwrap();
        assert_eq!(config.pipeline.max_retries, 5);
        assert!(!config.gates.lint.enabled);
        // Unspecified sections keep their defaults.
        assert!(config.gates.test.enabled);
        assert_eq!(config.gates.test.timeout_secs, DEFAULT_GATE_TIMEOUT_SECS);
    }

    #[test]
    fn test_load_command_override() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(CONFIG_FILE),
            "[gates.test]\ncommand = \"npm test\"\n",
        )
        .unwrap();

        let config = ProjectConfig::load(temp.path()).unwrap();
        assert_eq!(config.gates.test.command.as_deref(), Some("npm test"));
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join(CONFIG_FILE), "this is {{ not toml").unwrap();

        let err = ProjectConfig::load(temp.path()).unwrap_err();
        assert!(matches!(err, SpecflowError::Config { .. }));
        assert_eq!(err.exit_code(), 7);
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut config = ProjectConfig::default();
        config.gates.build.timeout_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, SpecflowError::InvalidConfig { .. }));
    }

    #[test]
    fn test_validate_rejects_empty_agent_command() {
        let mut config = ProjectConfig::default();
        config.agent.command = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_gate_accessor() {
        let mut config = ProjectConfig::default();
        config.gates.lint.enabled = false;
        assert!(config.gate(GateKind::Test).enabled);
        assert!(!config.gate(GateKind::Lint).enabled);
    }

    #[test]
    fn test_paths() {
        let config = ProjectConfig::default();
        assert_eq!(
            config.specs_dir("/proj"),
            PathBuf::from("/proj/specs")
        );
        assert_eq!(
            config.state_dir("/proj"),
            PathBuf::from("/proj/.specflow")
        );
    }
}
