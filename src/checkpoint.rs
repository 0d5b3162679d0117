//! Persisted "last processed ID".
//!
//! The checkpoint is a one-field JSON object, `{"last_processed_id": N}`. It is
//! replaced by writing a `.tmp` sibling and renaming it over the real file, so
//! a reader sees either the old value or the new one, never a torn write.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Serialize, Deserialize)]
struct CheckpointFile {
    #[serde(default)]
    last_processed_id: i64,
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        self.path.with_extension("tmp")
    }

    /// The stored ID, or 0 when no checkpoint has been written yet.
    pub fn load(&self) -> Result<i64> {
        if !self.path.exists() {
            return Ok(0);
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read checkpoint: {}", self.path.display()))?;
        let file: CheckpointFile = serde_json::from_str(&content)
            .with_context(|| format!("Corrupt checkpoint file: {}", self.path.display()))?;
        Ok(file.last_processed_id)
    }

    pub fn save(&self, last_processed_id: i64) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create checkpoint directory: {}", parent.display())
            })?;
        }

        let tmp = self.tmp_path();
        let body = serde_json::to_vec(&CheckpointFile { last_processed_id })?;
        {
            let mut f = fs::File::create(&tmp)
                .with_context(|| format!("Failed to create {}", tmp.display()))?;
            f.write_all(&body)?;
            f.sync_all()?;
        }
        fs::rename(&tmp, &self.path).with_context(|| {
            format!(
                "Failed to move {} over {}",
                tmp.display(),
                self.path.display()
            )
        })?;

        tracing::debug!(last_processed_id, path = %self.path.display(), "checkpoint saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_loads_zero() {
        let tmp = TempDir::new().unwrap();
        let store = CheckpointStore::new(tmp.path().join("state.json"));
        assert_eq!(store.load().unwrap(), 0);
    }

    #[test]
    fn save_then_load() {
        let tmp = TempDir::new().unwrap();
        let store = CheckpointStore::new(tmp.path().join("data").join("state.json"));
        store.save(41).unwrap();
        assert_eq!(store.load().unwrap(), 41);
        store.save(42).unwrap();
        assert_eq!(store.load().unwrap(), 42);
        assert!(!store.tmp_path().exists());
    }

    #[test]
    fn file_format_is_single_key_object() {
        let tmp = TempDir::new().unwrap();
        let store = CheckpointStore::new(tmp.path().join("state.json"));
        store.save(7).unwrap();
        let raw = fs::read_to_string(store.path()).unwrap();
        let v: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(v, serde_json::json!({ "last_processed_id": 7 }));
    }

    #[test]
    fn object_without_key_loads_zero() {
        let tmp = TempDir::new().unwrap();
        let store = CheckpointStore::new(tmp.path().join("state.json"));
        fs::write(store.path(), "{}").unwrap();
        assert_eq!(store.load().unwrap(), 0);
    }

    #[test]
    fn crash_before_rename_keeps_previous_checkpoint() {
        let tmp = TempDir::new().unwrap();
        let store = CheckpointStore::new(tmp.path().join("state.json"));
        store.save(10).unwrap();

        // A writer died after filling the temp file but before the rename.
        fs::write(store.tmp_path(), "{\"last_processed_id\": 9").unwrap();

        assert_eq!(store.load().unwrap(), 10);

        // The next save replaces the stale temp file.
        store.save(11).unwrap();
        assert_eq!(store.load().unwrap(), 11);
    }

    #[test]
    fn garbage_checkpoint_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let store = CheckpointStore::new(tmp.path().join("state.json"));
        fs::write(store.path(), "not json").unwrap();
        assert!(store.load().is_err());
    }
}
