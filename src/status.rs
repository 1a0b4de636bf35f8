//! Read-only status policy over the state store.
//!
//! The [`StatusDetector`] answers one question: is this feature eligible for
//! (re)implementation? It never mutates state. [`StatusDetector::filter_pending`]
//! is the sole admission policy for which features a bulk run will attempt.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;

use crate::config::ProjectConfig;
use crate::state::{FeatureStatus, StateStore};

/// Snapshot of one feature's standing, with the retry-eligibility verdict.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub status: FeatureStatus,
    pub retry_count: u32,
    pub last_attempt: Option<DateTime<Utc>>,
    pub failed_checks: BTreeSet<String>,
    pub can_retry: bool,
}

/// Counts of features by status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusSummary {
    pub pending: usize,
    pub in_progress: usize,
    pub testing: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl StatusSummary {
    /// Total features counted.
    #[must_use]
    pub fn total(&self) -> usize {
        self.pending + self.in_progress + self.testing + self.completed + self.failed + self.skipped
    }
}

/// Policy layer answering eligibility questions about features.
pub struct StatusDetector<'a> {
    store: &'a StateStore,
    max_retries: u32,
}

impl<'a> StatusDetector<'a> {
    /// Create a detector over the given store.
    #[must_use]
    pub fn new(store: &'a StateStore, config: &ProjectConfig) -> Self {
        Self {
            store,
            max_retries: config.pipeline.max_retries,
        }
    }

    /// Report a feature's status and eligibility.
    ///
    /// A feature with no recorded state is `pending` with a zero retry count
    /// and is always eligible.
    #[must_use]
    pub fn report(&self, id: &str) -> StatusReport {
        match self.store.feature(id) {
            Some(feature) => StatusReport {
                status: feature.status,
                retry_count: feature.retry_count,
                last_attempt: feature.last_attempt,
                failed_checks: feature.failed_checks.clone(),
                can_retry: self.is_eligible(feature.status, feature.retry_count),
            },
            None => StatusReport {
                status: FeatureStatus::Pending,
                retry_count: 0,
                last_attempt: None,
                failed_checks: BTreeSet::new(),
                can_retry: true,
            },
        }
    }

    /// Select the features a bulk run may attempt: `pending`, or `failed`
    /// and still within the retry budget.
    #[must_use]
    pub fn filter_pending(&self, ids: &[String]) -> Vec<String> {
        ids.iter()
            .filter(|id| {
                let report = self.report(id);
                matches!(report.status, FeatureStatus::Pending)
                    || (matches!(report.status, FeatureStatus::Failed) && report.can_retry)
            })
            .cloned()
            .collect()
    }

    /// Count features by status. Unknown features count as pending.
    #[must_use]
    pub fn summary(&self, ids: &[String]) -> StatusSummary {
        let mut summary = StatusSummary::default();
        for id in ids {
            match self.report(id).status {
                FeatureStatus::Pending => summary.pending += 1,
                FeatureStatus::InProgress => summary.in_progress += 1,
                FeatureStatus::Testing => summary.testing += 1,
                FeatureStatus::Completed => summary.completed += 1,
                FeatureStatus::Failed => summary.failed += 1,
                FeatureStatus::Skipped => summary.skipped += 1,
            }
        }
        summary
    }

    /// Retry eligibility for a recorded status.
    ///
    /// Retry does not apply to success, and a mid-attempt feature is not
    /// eligible for a second concurrent attempt.
    fn is_eligible(&self, status: FeatureStatus, retry_count: u32) -> bool {
        match status {
            FeatureStatus::Pending => true,
            FeatureStatus::Failed => retry_count < self.max_retries,
            FeatureStatus::InProgress
            | FeatureStatus::Testing
            | FeatureStatus::Completed
            | FeatureStatus::Skipped => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, StateStore, ProjectConfig) {
        let temp = TempDir::new().unwrap();
        let store = StateStore::open(temp.path().join(".specflow")).unwrap();
        (temp, store, ProjectConfig::default())
    }

    #[test]
    fn test_unknown_feature_is_pending_and_eligible() {
        let (_temp, store, config) = setup();
        let detector = StatusDetector::new(&store, &config);

        let report = detector.report("never-seen");
        assert_eq!(report.status, FeatureStatus::Pending);
        assert_eq!(report.retry_count, 0);
        assert!(report.last_attempt.is_none());
        assert!(report.failed_checks.is_empty());
        assert!(report.can_retry);
    }

    #[test]
    fn test_completed_never_eligible() {
        let (_temp, mut store, config) = setup();
        store.update_status("auth", FeatureStatus::Completed);
        // Even with retries left, success is final.
        let detector = StatusDetector::new(&store, &config);
        assert!(!detector.report("auth").can_retry);
    }

    #[test]
    fn test_failed_eligible_within_budget() {
        let (_temp, mut store, config) = setup();
        store.update_status("auth", FeatureStatus::Failed);
        store.increment_retry("auth");

        let detector = StatusDetector::new(&store, &config);
        let report = detector.report("auth");
        assert_eq!(report.retry_count, 1);
        assert!(report.can_retry);
    }

    #[test]
    fn test_failed_ineligible_at_budget() {
        let (_temp, mut store, config) = setup();
        store.update_status("auth", FeatureStatus::Failed);
        for _ in 0..config.pipeline.max_retries {
            store.increment_retry("auth");
        }

        let detector = StatusDetector::new(&store, &config);
        assert!(!detector.report("auth").can_retry);
    }

    #[test]
    fn test_in_progress_not_eligible() {
        let (_temp, mut store, config) = setup();
        store.update_status("auth", FeatureStatus::InProgress);
        let detector = StatusDetector::new(&store, &config);
        assert!(!detector.report("auth").can_retry);
    }

    #[test]
    fn test_filter_pending_admission_policy() {
        let (_temp, mut store, config) = setup();
        store.update_status("done", FeatureStatus::Completed);
        store.update_status("stuck", FeatureStatus::Failed);
        for _ in 0..config.pipeline.max_retries {
            store.increment_retry("stuck");
        }
        store.update_status("retryable", FeatureStatus::Failed);
        store.increment_retry("retryable");
        store.update_status("skipped", FeatureStatus::Skipped);

        let ids: Vec<String> = ["fresh", "done", "stuck", "retryable", "skipped"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let detector = StatusDetector::new(&store, &config);
        assert_eq!(
            detector.filter_pending(&ids),
            vec!["fresh".to_string(), "retryable".to_string()]
        );
    }

    #[test]
    fn test_summary_counts() {
        let (_temp, mut store, config) = setup();
        store.update_status("a", FeatureStatus::Completed);
        store.update_status("b", FeatureStatus::Completed);
        store.update_status("c", FeatureStatus::Failed);

        let ids: Vec<String> = ["a", "b", "c", "unknown"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let detector = StatusDetector::new(&store, &config);
        let summary = detector.summary(&ids);
        assert_eq!(summary.completed, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.pending, 1);
        assert_eq!(summary.total(), 4);
    }

    #[test]
    fn test_report_carries_failed_checks() {
        let (_temp, mut store, config) = setup();
        store.update_status("auth", FeatureStatus::Failed);
        store.add_failed_check("auth", "lint");
        store.add_failed_check("auth", "test");

        let detector = StatusDetector::new(&store, &config);
        let report = detector.report("auth");
        assert!(report.failed_checks.contains("lint"));
        assert!(report.failed_checks.contains("test"));
    }
}
