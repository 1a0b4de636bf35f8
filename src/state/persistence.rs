//! Atomic file-based storage for the pipeline state record.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::warn;

use super::{PipelineState, STATE_VERSION};
use crate::error::{Result, SpecflowError};

/// State file name inside the state directory.
const STATE_FILE: &str = "state.json";

/// Temporary file suffix for atomic writes.
const TMP_SUFFIX: &str = ".tmp";

/// Lock file suffix for concurrent access prevention.
const LOCK_SUFFIX: &str = ".lock";

/// State persistence manager providing atomic file operations.
///
/// Writes go to a temp file that is fsynced and renamed into place, under an
/// exclusive lock, so an external status query or a crash never observes a
/// half-written record.
#[derive(Debug, Clone)]
pub struct StatePersistence {
    /// Directory where the state file lives.
    dir: PathBuf,
}

impl StatePersistence {
    /// Creates a new persistence manager for the given directory.
    #[must_use]
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Returns the path to the state file.
    #[must_use]
    pub fn state_file_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    /// Returns the path to the temporary state file.
    #[must_use]
    pub fn tmp_file_path(&self) -> PathBuf {
        self.dir.join(format!("{STATE_FILE}{TMP_SUFFIX}"))
    }

    /// Returns the path to the lock file.
    #[must_use]
    pub fn lock_file_path(&self) -> PathBuf {
        self.dir.join(format!("{STATE_FILE}{LOCK_SUFFIX}"))
    }

    /// Saves pipeline state atomically.
    pub fn save(&self, state: &PipelineState) -> Result<()> {
        fs::create_dir_all(&self.dir)?;

        let lock_file = File::create(self.lock_file_path())?;
        FileExt::lock_exclusive(&lock_file)
            .map_err(|e| SpecflowError::state(format!("failed to acquire state lock: {e}")))?;

        let tmp_path = self.tmp_file_path();
        let json = serde_json::to_string_pretty(state)?;

        let mut tmp_file = File::create(&tmp_path)?;
        tmp_file.write_all(json.as_bytes())?;
        tmp_file.sync_all()?;

        fs::rename(&tmp_path, self.state_file_path())?;

        Ok(())
    }

    /// Loads pipeline state from file.
    ///
    /// Missing files, corrupt JSON, and incompatible schema versions all
    /// yield `None` — the caller starts empty.
    pub fn load(&self) -> Result<Option<PipelineState>> {
        let state_path = self.state_file_path();

        if !state_path.exists() {
            return Ok(None);
        }

        let lock_path = self.lock_file_path();
        if lock_path.exists() {
            let lock_file = File::open(&lock_path)?;
            FileExt::lock_shared(&lock_file)
                .map_err(|e| SpecflowError::state(format!("failed to acquire state lock: {e}")))?;
        }

        let mut file = match File::open(&state_path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut contents = String::new();
        file.read_to_string(&mut contents)?;

        let state: PipelineState = match serde_json::from_str(&contents) {
            Ok(s) => s,
            Err(e) => {
                warn!(
                    "Corrupted state file at {}: {}. Deleting and starting fresh.",
                    state_path.display(),
                    e
                );
                let _ = fs::remove_file(&state_path);
                return Ok(None);
            }
        };

        if !state.is_version_compatible() {
            warn!(
                "Incompatible state version {} (supported: {}). Starting fresh.",
                state.version, STATE_VERSION
            );
            let _ = fs::remove_file(&state_path);
            return Ok(None);
        }

        Ok(Some(state))
    }

    /// Deletes the state file if it exists.
    pub fn delete(&self) -> Result<()> {
        let state_path = self.state_file_path();
        if state_path.exists() {
            fs::remove_file(&state_path)?;
        }
        Ok(())
    }

    /// Checks if a state file exists.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.state_file_path().exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{FeatureState, FeatureStatus, PipelineStep};
    use tempfile::TempDir;

    fn test_persistence() -> (StatePersistence, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let persistence = StatePersistence::new(temp_dir.path().join(".specflow"));
        (persistence, temp_dir)
    }

    #[test]
    fn test_save_creates_file() {
        let (persistence, _temp_dir) = test_persistence();
        let state = PipelineState::new();

        assert!(!persistence.exists());
        persistence.save(&state).expect("save should succeed");
        assert!(persistence.exists());
    }

    #[test]
    fn test_load_returns_none_when_missing() {
        let (persistence, _temp_dir) = test_persistence();
        let result = persistence.load().expect("load should not error");
        assert!(result.is_none());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let (persistence, _temp_dir) = test_persistence();

        let mut state = PipelineState::new();
        state.features.insert(
            "auth".to_string(),
            FeatureState {
                status: FeatureStatus::Failed,
                retry_count: 2,
                ..Default::default()
            },
        );
        state.checkpoint = Some(PipelineStep::Tasks);
        state.current_feature_id = Some("auth".to_string());

        persistence.save(&state).expect("save should succeed");

        let loaded = persistence.load().expect("load should succeed").unwrap();
        assert_eq!(loaded, state);
    }

    #[test]
    fn test_atomic_write_leaves_no_tmp_file() {
        let (persistence, _temp_dir) = test_persistence();
        persistence
            .save(&PipelineState::new())
            .expect("save should succeed");
        assert!(!persistence.tmp_file_path().exists());
        assert!(persistence.state_file_path().exists());
    }

    #[test]
    fn test_corrupted_file_returns_none_and_self_heals() {
        let (persistence, _temp_dir) = test_persistence();

        fs::create_dir_all(&persistence.dir).expect("create dir");
        fs::write(persistence.state_file_path(), "not valid json {{{")
            .expect("write corrupted file");

        let result = persistence.load().expect("load should not error");
        assert!(result.is_none());
        assert!(!persistence.state_file_path().exists());

        // The next save writes a clean file.
        persistence.save(&PipelineState::new()).expect("save");
        assert!(persistence.load().expect("load").is_some());
    }

    #[test]
    fn test_incompatible_version_returns_none() {
        let (persistence, _temp_dir) = test_persistence();

        let incompatible = r#"{"version": 999, "features": {}}"#;
        fs::create_dir_all(&persistence.dir).expect("create dir");
        fs::write(persistence.state_file_path(), incompatible).expect("write");

        let result = persistence.load().expect("load should not error");
        assert!(result.is_none());
        assert!(!persistence.state_file_path().exists());
    }

    #[test]
    fn test_creates_directory_if_missing() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let nested = temp_dir.path().join("deep").join("nested").join(".specflow");
        let persistence = StatePersistence::new(&nested);

        assert!(!nested.exists());
        persistence.save(&PipelineState::new()).expect("save");
        assert!(nested.exists());
    }

    #[test]
    fn test_delete_removes_file() {
        let (persistence, _temp_dir) = test_persistence();
        persistence.save(&PipelineState::new()).expect("save");
        assert!(persistence.exists());

        persistence.delete().expect("delete should succeed");
        assert!(!persistence.exists());
    }

    #[test]
    fn test_delete_succeeds_when_missing() {
        let (persistence, _temp_dir) = test_persistence();
        persistence.delete().expect("delete should succeed");
    }

    #[test]
    fn test_overwrites_existing_file() {
        let (persistence, _temp_dir) = test_persistence();

        let mut state1 = PipelineState::new();
        state1.checkpoint = Some(PipelineStep::Specify);
        persistence.save(&state1).expect("first save");

        let mut state2 = PipelineState::new();
        state2.checkpoint = Some(PipelineStep::Implement);
        persistence.save(&state2).expect("second save");

        let loaded = persistence.load().expect("load").unwrap();
        assert_eq!(loaded.checkpoint, Some(PipelineStep::Implement));
    }
}
