//! Durable per-feature state and the pipeline checkpoint.
//!
//! The [`StateStore`] owns everything the pipeline persists: one
//! [`FeatureState`] per feature, the global [`PipelineStep`] checkpoint, and
//! run metadata. All other components receive read-only views or request
//! mutations through the store's API.
//!
//! # Persistence model
//!
//! Calls are always sequential within a single process run, so the in-memory
//! copy is the working state and [`StateStore::save`] is an explicit atomic
//! flush after every transition. A crash mid-run therefore always leaves a
//! file that corresponds to the last completed action. Corrupt or missing
//! files load as "start empty", never as a fatal error.

pub mod persistence;

pub use persistence::StatePersistence;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::error::Result;

/// Current schema version for the persisted state file.
/// Increment when making breaking changes to the serialization format.
pub const STATE_VERSION: u32 = 1;

/// Minimum supported schema version; older files are discarded.
pub const MIN_SUPPORTED_VERSION: u32 = 1;

// ============================================================================
// Feature Status
// ============================================================================

/// Implementation status of a single feature.
///
/// A feature with no recorded state is implicitly `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FeatureStatus {
    /// Never attempted, or explicitly reset.
    #[default]
    Pending,
    /// Generation is underway.
    InProgress,
    /// Generation finished; quality gates are running.
    Testing,
    /// All gates passed. Terminal.
    Completed,
    /// Agent failure or exhausted retry budget. Terminal.
    Failed,
    /// Excluded from the run by the operator.
    Skipped,
}

impl FeatureStatus {
    /// Whether this status ends the feature's lifecycle.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

impl std::fmt::Display for FeatureStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InProgress => write!(f, "in-progress"),
            Self::Testing => write!(f, "testing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

// ============================================================================
// Feature State
// ============================================================================

/// Durable record for one feature.
///
/// Created lazily on first mutation, mutated after every generation attempt
/// and gate run, and deleted only by an explicit reset (which recreates it
/// empty). Sets are `BTreeSet` so serialization order is deterministic and
/// save/load round-trips are byte-stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureState {
    /// Current lifecycle status.
    pub status: FeatureStatus,
    /// Pipeline step names already applied. Re-adding is a no-op.
    #[serde(default)]
    pub implemented_steps: BTreeSet<String>,
    /// Gate names that failed on the most recent attempt.
    #[serde(default)]
    pub failed_checks: BTreeSet<String>,
    /// Fix-loop iterations consumed. Reset to 0 only by an explicit reset.
    #[serde(default)]
    pub retry_count: u32,
    /// Timestamp of the last status transition.
    #[serde(default)]
    pub last_attempt: Option<DateTime<Utc>>,
}

// ============================================================================
// Pipeline Step
// ============================================================================

/// The six pipeline steps, a total order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStep {
    Initialize,
    Specify,
    Plan,
    Tasks,
    Implement,
    Quality,
}

impl PipelineStep {
    /// All steps in execution order.
    pub const ALL: [PipelineStep; 6] = [
        PipelineStep::Initialize,
        PipelineStep::Specify,
        PipelineStep::Plan,
        PipelineStep::Tasks,
        PipelineStep::Implement,
        PipelineStep::Quality,
    ];

    /// Stable lowercase name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::Specify => "specify",
            Self::Plan => "plan",
            Self::Tasks => "tasks",
            Self::Implement => "implement",
            Self::Quality => "quality",
        }
    }

    /// The step after this one, or `None` for the last.
    #[must_use]
    pub fn next(&self) -> Option<PipelineStep> {
        let idx = Self::ALL.iter().position(|s| s == self)?;
        Self::ALL.get(idx + 1).copied()
    }

    /// This step and everything after it, in order.
    #[must_use]
    pub fn through_end(&self) -> Vec<PipelineStep> {
        let idx = Self::ALL
            .iter()
            .position(|s| s == self)
            .unwrap_or(Self::ALL.len());
        Self::ALL[idx..].to_vec()
    }
}

impl std::fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ============================================================================
// Persisted Record
// ============================================================================

/// The single durable record for a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineState {
    /// Schema version for forward compatibility.
    pub version: u32,
    /// When the last run started.
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    /// Identifier of the last run.
    #[serde(default)]
    pub run_id: Option<String>,
    /// Per-feature state, keyed by feature id.
    #[serde(default)]
    pub features: BTreeMap<String, FeatureState>,
    /// Last successfully completed pipeline step. Absent means no run has
    /// ever started.
    #[serde(default)]
    pub checkpoint: Option<PipelineStep>,
    /// Feature the pipeline was working on when last saved.
    #[serde(default)]
    pub current_feature_id: Option<String>,
}

impl PipelineState {
    /// Create an empty state at the current schema version.
    #[must_use]
    pub fn new() -> Self {
        Self {
            version: STATE_VERSION,
            last_run: None,
            run_id: None,
            features: BTreeMap::new(),
            checkpoint: None,
            current_feature_id: None,
        }
    }

    /// Whether this state's schema version can be loaded.
    #[must_use]
    pub fn is_version_compatible(&self) -> bool {
        self.version >= MIN_SUPPORTED_VERSION && self.version <= STATE_VERSION
    }
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// State Store
// ============================================================================

/// Exclusive owner of [`PipelineState`], backed by an atomic file store.
///
/// Every mutator lazily materializes a default [`FeatureState`] when the
/// feature has no record yet. Mutations touch only the in-memory copy;
/// callers flush with [`StateStore::save`] after each transition.
pub struct StateStore {
    persistence: StatePersistence,
    state: PipelineState,
}

impl StateStore {
    /// Open the store for the given state directory, loading prior state.
    ///
    /// Missing, corrupt, or version-incompatible files start empty.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let persistence = StatePersistence::new(dir);
        let state = persistence.load()?.unwrap_or_default();
        Ok(Self { persistence, state })
    }

    /// Flush the in-memory state to disk atomically.
    pub fn save(&self) -> Result<()> {
        self.persistence.save(&self.state)
    }

    /// Read-only view of the full persisted record.
    #[must_use]
    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    /// Read-only view of one feature's state, if any was ever recorded.
    #[must_use]
    pub fn feature(&self, id: &str) -> Option<&FeatureState> {
        self.state.features.get(id)
    }

    /// Iterate all recorded features.
    pub fn features(&self) -> impl Iterator<Item = (&String, &FeatureState)> {
        self.state.features.iter()
    }

    fn feature_mut(&mut self, id: &str) -> &mut FeatureState {
        self.state.features.entry(id.to_string()).or_default()
    }

    /// Set a feature's status, stamping the transition time.
    pub fn update_status(&mut self, id: &str, status: FeatureStatus) {
        let feature = self.feature_mut(id);
        feature.status = status;
        feature.last_attempt = Some(Utc::now());
    }

    /// Record a pipeline step as applied to a feature. Idempotent.
    pub fn record_step(&mut self, id: &str, step: &str) {
        self.feature_mut(id).implemented_steps.insert(step.to_string());
    }

    /// Record a failing gate for a feature. Idempotent.
    pub fn add_failed_check(&mut self, id: &str, gate: &str) {
        self.feature_mut(id).failed_checks.insert(gate.to_string());
    }

    /// Clear recorded gate failures, typically at the start of an attempt.
    pub fn clear_failed_checks(&mut self, id: &str) {
        self.feature_mut(id).failed_checks.clear();
    }

    /// Increment a feature's retry counter, returning the new count.
    pub fn increment_retry(&mut self, id: &str) -> u32 {
        let feature = self.feature_mut(id);
        feature.retry_count += 1;
        feature.retry_count
    }

    /// Reset one feature to an empty default record.
    pub fn reset_feature(&mut self, id: &str) {
        self.state
            .features
            .insert(id.to_string(), FeatureState::default());
    }

    /// Reset the entire pipeline: all features, checkpoint, run metadata.
    pub fn reset_all(&mut self) {
        self.state = PipelineState::new();
    }

    /// Last successfully completed pipeline step.
    #[must_use]
    pub fn checkpoint(&self) -> Option<PipelineStep> {
        self.state.checkpoint
    }

    /// Record a step as the checkpoint.
    pub fn set_checkpoint(&mut self, step: PipelineStep) {
        self.state.checkpoint = Some(step);
    }

    /// Clear the checkpoint (a fresh run completed).
    pub fn clear_checkpoint(&mut self) {
        self.state.checkpoint = None;
    }

    /// Feature currently being worked on, for external status queries.
    pub fn set_current_feature(&mut self, id: Option<&str>) {
        self.state.current_feature_id = id.map(str::to_string);
    }

    /// Stamp run metadata at the start of a pipeline run.
    pub fn mark_run_started(&mut self) {
        self.state.last_run = Some(Utc::now());
        self.state.run_id = Some(uuid::Uuid::new_v4().to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store(temp: &TempDir) -> StateStore {
        StateStore::open(temp.path().join(".specflow")).expect("open store")
    }

    #[test]
    fn test_unknown_feature_has_no_record() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);
        assert!(store.feature("auth").is_none());
    }

    #[test]
    fn test_mutator_lazily_materializes() {
        let temp = TempDir::new().unwrap();
        let mut store = open_store(&temp);

        store.add_failed_check("auth", "lint");
        let feature = store.feature("auth").unwrap();
        assert_eq!(feature.status, FeatureStatus::Pending);
        assert!(feature.failed_checks.contains("lint"));
    }

    #[test]
    fn test_add_failed_check_idempotent() {
        let temp = TempDir::new().unwrap();
        let mut store = open_store(&temp);

        store.add_failed_check("auth", "lint");
        store.add_failed_check("auth", "lint");
        assert_eq!(store.feature("auth").unwrap().failed_checks.len(), 1);
    }

    #[test]
    fn test_record_step_idempotent() {
        let temp = TempDir::new().unwrap();
        let mut store = open_store(&temp);

        store.record_step("auth", "specify");
        store.record_step("auth", "specify");
        store.record_step("auth", "plan");
        assert_eq!(store.feature("auth").unwrap().implemented_steps.len(), 2);
    }

    #[test]
    fn test_update_status_stamps_time() {
        let temp = TempDir::new().unwrap();
        let mut store = open_store(&temp);

        store.update_status("auth", FeatureStatus::InProgress);
        let feature = store.feature("auth").unwrap();
        assert_eq!(feature.status, FeatureStatus::InProgress);
        assert!(feature.last_attempt.is_some());
    }

    #[test]
    fn test_increment_then_reset() {
        let temp = TempDir::new().unwrap();
        let mut store = open_store(&temp);

        assert_eq!(store.increment_retry("auth"), 1);
        assert_eq!(store.increment_retry("auth"), 2);
        assert_eq!(store.increment_retry("auth"), 3);
        store.update_status("auth", FeatureStatus::Failed);

        store.reset_feature("auth");
        let feature = store.feature("auth").unwrap();
        assert_eq!(feature.retry_count, 0);
        assert_eq!(feature.status, FeatureStatus::Pending);
        assert!(feature.failed_checks.is_empty());
        assert!(feature.last_attempt.is_none());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join(".specflow");

        {
            let mut store = StateStore::open(&dir).unwrap();
            store.update_status("auth", FeatureStatus::Failed);
            store.add_failed_check("auth", "test");
            store.add_failed_check("auth", "build");
            store.increment_retry("auth");
            store.update_status("billing", FeatureStatus::Completed);
            store.set_checkpoint(PipelineStep::Plan);
            store.set_current_feature(Some("auth"));
            store.mark_run_started();
            store.save().unwrap();
        }

        let store = StateStore::open(&dir).unwrap();
        let auth = store.feature("auth").unwrap();
        assert_eq!(auth.status, FeatureStatus::Failed);
        assert_eq!(auth.retry_count, 1);
        assert_eq!(auth.failed_checks.len(), 2);
        assert!(auth.failed_checks.contains("test"));
        assert_eq!(
            store.feature("billing").unwrap().status,
            FeatureStatus::Completed
        );
        assert_eq!(store.checkpoint(), Some(PipelineStep::Plan));
        assert_eq!(store.state().current_feature_id.as_deref(), Some("auth"));
        assert!(store.state().run_id.is_some());
    }

    #[test]
    fn test_unmutated_reload_is_identical() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join(".specflow");

        let mut store = StateStore::open(&dir).unwrap();
        store.update_status("auth", FeatureStatus::Testing);
        store.increment_retry("auth");
        store.save().unwrap();
        let before = store.state().clone();

        let reloaded = StateStore::open(&dir).unwrap();
        assert_eq!(reloaded.state(), &before);

        // Re-saving without mutation keeps the record stable.
        reloaded.save().unwrap();
        let again = StateStore::open(&dir).unwrap();
        assert_eq!(again.state(), &before);
    }

    #[test]
    fn test_reset_all() {
        let temp = TempDir::new().unwrap();
        let mut store = open_store(&temp);

        store.update_status("auth", FeatureStatus::Completed);
        store.set_checkpoint(PipelineStep::Quality);
        store.reset_all();

        assert!(store.feature("auth").is_none());
        assert!(store.checkpoint().is_none());
    }

    #[test]
    fn test_clear_checkpoint() {
        let temp = TempDir::new().unwrap();
        let mut store = open_store(&temp);

        store.set_checkpoint(PipelineStep::Implement);
        assert_eq!(store.checkpoint(), Some(PipelineStep::Implement));
        store.clear_checkpoint();
        assert!(store.checkpoint().is_none());
    }

    #[test]
    fn test_pipeline_step_order() {
        assert_eq!(PipelineStep::Initialize.next(), Some(PipelineStep::Specify));
        assert_eq!(PipelineStep::Quality.next(), None);
        assert!(PipelineStep::Plan < PipelineStep::Implement);
    }

    #[test]
    fn test_pipeline_step_through_end() {
        assert_eq!(
            PipelineStep::Plan.through_end(),
            vec![
                PipelineStep::Plan,
                PipelineStep::Tasks,
                PipelineStep::Implement,
                PipelineStep::Quality,
            ]
        );
        assert_eq!(PipelineStep::Quality.through_end(), vec![PipelineStep::Quality]);
    }

    #[test]
    fn test_status_serde_kebab_case() {
        let json = serde_json::to_string(&FeatureStatus::InProgress).unwrap();
        assert_eq!(json, "\"in-progress\"");
        let back: FeatureStatus = serde_json::from_str("\"in-progress\"").unwrap();
        assert_eq!(back, FeatureStatus::InProgress);
    }

    #[test]
    fn test_status_is_terminal() {
        assert!(FeatureStatus::Completed.is_terminal());
        assert!(FeatureStatus::Failed.is_terminal());
        assert!(FeatureStatus::Skipped.is_terminal());
        assert!(!FeatureStatus::Pending.is_terminal());
        assert!(!FeatureStatus::InProgress.is_terminal());
        assert!(!FeatureStatus::Testing.is_terminal());
    }
}
