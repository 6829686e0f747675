//! Durable persistence of stage results and run records.
//!
//! The [`ArtifactStore`] is the only shared mutable resource of a pipeline.
//! Results are keyed by `(run id, stage name)`; each key has one current
//! record plus an append-only history of every record ever written to it.

mod fs;
mod memory;

pub use fs::FsArtifactStore;
pub use memory::InMemoryArtifactStore;

use crate::core::{RunRecord, StageResult};
use crate::errors::PersistenceError;
use async_trait::async_trait;
use std::collections::BTreeSet;

/// Storage backend for stage results and run records.
///
/// `put` must be atomic with respect to `get`: a reader sees either the
/// previous record or the new one, never a partial write.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Durably writes a result as the current record for its key and appends
    /// it to the key's history.
    async fn put(&self, result: &StageResult) -> Result<(), PersistenceError>;

    /// Returns the current result for a key.
    async fn get(&self, run_id: &str, stage: &str) -> Result<Option<StageResult>, PersistenceError>;

    /// Returns the names of stages whose current result is `SUCCESS`.
    async fn list_completed(&self, run_id: &str) -> Result<BTreeSet<String>, PersistenceError>;

    /// Returns every result written for a key, oldest first.
    async fn history(&self, run_id: &str, stage: &str) -> Result<Vec<StageResult>, PersistenceError>;

    /// Returns the current result of every stage of a run, sorted by stage.
    async fn list_results(&self, run_id: &str) -> Result<Vec<StageResult>, PersistenceError>;

    /// Writes a run record.
    async fn put_run(&self, run: &RunRecord) -> Result<(), PersistenceError>;

    /// Reads a run record.
    async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>, PersistenceError>;

    /// Lists all run records, oldest first.
    async fn list_runs(&self) -> Result<Vec<RunRecord>, PersistenceError>;
}

/// Checks that a run id or stage name is usable as a storage key.
///
/// Keys double as path components in [`FsArtifactStore`], so only
/// `[A-Za-z0-9._-]` is accepted and `.`/`..` are rejected.
///
/// # Errors
///
/// Returns `PersistenceError::InvalidKey` when the key is unusable.
pub fn validate_key(key: &str) -> Result<(), PersistenceError> {
    let invalid = |reason: &str| PersistenceError::InvalidKey {
        key: key.to_string(),
        reason: reason.to_string(),
    };

    if key.is_empty() {
        return Err(invalid("key is empty"));
    }
    if key == "." || key == ".." {
        return Err(invalid("key is a relative path component"));
    }
    if key.starts_with('.') {
        return Err(invalid("key starts with '.'"));
    }
    if let Some(c) = key
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(invalid(&format!("unsupported character {c:?}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key_accepts_simple_names() {
        assert!(validate_key("r1").is_ok());
        assert!(validate_key("market_research-v2.1").is_ok());
    }

    #[test]
    fn test_validate_key_rejects_paths() {
        for key in ["", ".", "..", ".hidden", "a/b", "a\\b", "spaced out", "ümlaut"] {
            assert!(
                matches!(validate_key(key), Err(PersistenceError::InvalidKey { .. })),
                "{key:?} should be rejected"
            );
        }
    }
}
