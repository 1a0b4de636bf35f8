//! Fix-prompt generation for quality gate failures.
//!
//! When gates fail, the fix loop asks the agent for a correction rather than
//! restarting generation from scratch. The prompt groups all current
//! failures by gate with `file:line: message` formatting so one fix attempt
//! can address every problem in one shot. When a gate's output yields no
//! structured failures, a raw output excerpt is the fallback diagnostic.
//!
//! # Example
//!
//! ```rust,ignore
//! use specflow::prompt::FixPromptBuilder;
//!
//! let builder = FixPromptBuilder::new();
//! let prompt = builder.build(&failed_gate_results);
//! let request = request.with_context(prompt);
//! ```

use crate::gates::QualityCheckResult;

// ============================================================================
// Fix Prompt Builder
// ============================================================================

/// Configuration for fix prompt generation.
#[derive(Debug, Clone)]
pub struct FixPromptConfig {
    /// Maximum number of failures to list per gate.
    pub max_failures_per_gate: usize,
    /// Maximum characters of raw output quoted when parsing found nothing.
    pub max_raw_excerpt_chars: usize,
}

impl Default for FixPromptConfig {
    fn default() -> Self {
        Self {
            max_failures_per_gate: 20,
            max_raw_excerpt_chars: 2000,
        }
    }
}

/// Builds fix prompts from failing gate results.
pub struct FixPromptBuilder {
    config: FixPromptConfig,
}

impl FixPromptBuilder {
    /// Create a builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: FixPromptConfig::default(),
        }
    }

    /// Create a builder with custom configuration.
    #[must_use]
    pub fn with_config(config: FixPromptConfig) -> Self {
        Self { config }
    }

    /// Generate a fix prompt for the given gate results.
    ///
    /// Passing gates are ignored; an all-passing slice yields an empty
    /// string.
    #[must_use]
    pub fn build(&self, results: &[QualityCheckResult]) -> String {
        let failing: Vec<_> = results.iter().filter(|r| !r.passed).collect();
        if failing.is_empty() {
            return String::new();
        }

        let mut prompt = String::new();
        prompt.push_str("# Quality gate failures\n\n");
        prompt.push_str(
            "The previous implementation attempt failed the following quality gates. \
             Fix every issue listed below without breaking passing gates.\n\n",
        );

        for result in &failing {
            prompt.push_str(&format!("## {} gate\n\n", result.kind));
            prompt.push_str(&self.format_gate(result));
            prompt.push('\n');
        }

        prompt.push_str("After fixing, all gates will be re-run.\n");
        prompt
    }

    /// Format one failing gate: structured failures, or a raw excerpt when
    /// nothing was parsed.
    fn format_gate(&self, result: &QualityCheckResult) -> String {
        let mut section = String::new();

        if result.failures.is_empty() {
            section.push_str("The command failed but no structured diagnostics were parsed. ");
            section.push_str("Raw output:\n\n```\n");
            section.push_str(&excerpt(&result.output, self.config.max_raw_excerpt_chars));
            section.push_str("\n```\n");
            return section;
        }

        for failure in result.failures.iter().take(self.config.max_failures_per_gate) {
            section.push_str("- ");
            section.push_str(&failure.format());
            section.push('\n');
        }

        let hidden = result
            .failures
            .len()
            .saturating_sub(self.config.max_failures_per_gate);
        if hidden > 0 {
            section.push_str(&format!(
                "- ... and {hidden} more. Fix the above first.\n"
            ));
        }

        section
    }
}

impl Default for FixPromptBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Take a leading excerpt without splitting a UTF-8 character.
fn excerpt(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(max_chars).collect();
    out.push_str("\n... (truncated)");
    out
}
