//! Filesystem artifact store.
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/<run_id>/run.json
//! <root>/<run_id>/stages/<stage>.json            current result
//! <root>/<run_id>/stages/<stage>.history.jsonl   every result, oldest first
//! ```
//!
//! Current files are replaced with write-to-temp, fsync, rename, followed by
//! an fsync of the containing directory, so a reader never observes a torn
//! record and a committed rename survives power loss.
//!
//! History lines are appended and fsynced before the current file is
//! swapped. If the swap then fails, `put` returns an error but the history
//! keeps the line: history is a log of attempted writes, and may end with a
//! record that never became current.

use super::{validate_key, ArtifactStore};
use crate::core::{RunRecord, StageResult, StageStatus};
use crate::errors::PersistenceError;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const RUN_FILE: &str = "run.json";
const STAGES_DIR: &str = "stages";
const HISTORY_SUFFIX: &str = ".history.jsonl";

/// Artifact store backed by a directory tree.
#[derive(Debug)]
pub struct FsArtifactStore {
    root: PathBuf,
    /// Per-key write locks so history order equals commit order. Entries
    /// are dropped once no writer holds or waits on them.
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl FsArtifactStore {
    /// Creates a store rooted at `root`. The directory is created lazily.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: DashMap::new(),
        }
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn run_dir(&self, run_id: &str) -> PathBuf {
        self.root.join(run_id)
    }

    fn stages_dir(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join(STAGES_DIR)
    }

    fn current_path(&self, run_id: &str, stage: &str) -> PathBuf {
        self.stages_dir(run_id).join(format!("{stage}.json"))
    }

    fn history_path(&self, run_id: &str, stage: &str) -> PathBuf {
        self.stages_dir(run_id).join(format!("{stage}{HISTORY_SUFFIX}"))
    }

    fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks.entry(key.to_string()).or_default().clone()
    }

    /// Drops the lock entry for `key` if only the map still references it.
    fn release_lock(&self, key: &str, lock: Arc<Mutex<()>>) {
        drop(lock);
        self.locks.remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Creates `dir` and its parents, syncing each parent whose entries
    /// changed.
    async fn ensure_dir(&self, dir: &Path) -> Result<(), PersistenceError> {
        if tokio::fs::try_exists(dir).await.unwrap_or(false) {
            return Ok(());
        }
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| PersistenceError::io(format!("creating {}", dir.display()), e))?;

        let mut current = dir;
        while let Some(parent) = current.parent() {
            if parent.as_os_str().is_empty() {
                break;
            }
            sync_dir(parent).await?;
            if parent == self.root || !parent.starts_with(&self.root) {
                break;
            }
            current = parent;
        }
        Ok(())
    }

    async fn append_line(&self, path: &Path, line: &[u8]) -> Result<(), PersistenceError> {
        let ctx = || format!("appending to {}", path.display());
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| PersistenceError::io(ctx(), e))?;
        file.write_all(line)
            .await
            .map_err(|e| PersistenceError::io(ctx(), e))?;
        file.write_all(b"\n")
            .await
            .map_err(|e| PersistenceError::io(ctx(), e))?;
        file.sync_all().await.map_err(|e| PersistenceError::io(ctx(), e))
    }

    async fn write_atomic<T: Serialize + Sync>(&self, path: &Path, value: &T) -> Result<(), PersistenceError> {
        let dir = path
            .parent()
            .ok_or_else(|| PersistenceError::Unavailable(format!("{} has no parent", path.display())))?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("record");
        let temp_path = dir.join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));

        let bytes = serde_json::to_vec_pretty(value)
            .map_err(|e| PersistenceError::serialization(format!("encoding {}", path.display()), e))?;

        let write = async {
            let mut file = tokio::fs::File::create(&temp_path).await?;
            file.write_all(&bytes).await?;
            file.sync_all().await?;
            tokio::fs::rename(&temp_path, path).await
        };

        if let Err(err) = write.await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(PersistenceError::io(format!("writing {}", path.display()), err));
        }
        sync_dir(dir).await
    }

    async fn read_json<T: serde::de::DeserializeOwned>(&self, path: &Path) -> Result<Option<T>, PersistenceError> {
        let text = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(PersistenceError::io(format!("reading {}", path.display()), err)),
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| PersistenceError::Corrupt {
                path: path.to_path_buf(),
                message: e.to_string(),
            })
    }

    /// Appends the history line, then swaps the current file. Caller holds
    /// the key lock.
    async fn write_result(&self, result: &StageResult) -> Result<(), PersistenceError> {
        self.ensure_dir(&self.stages_dir(&result.run_id)).await?;

        let line = serde_json::to_vec(result)
            .map_err(|e| PersistenceError::serialization("encoding history line", e))?;
        self.append_line(&self.history_path(&result.run_id, &result.stage), &line)
            .await?;
        self.write_atomic(&self.current_path(&result.run_id, &result.stage), result)
            .await
    }

    /// Reads every current stage record of a run, skipping unreadable ones.
    async fn current_records(&self, run_id: &str) -> Result<Vec<StageResult>, PersistenceError> {
        validate_key(run_id)?;
        let dir = self.stages_dir(run_id);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(PersistenceError::io(format!("listing {}", dir.display()), err)),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PersistenceError::io(format!("listing {}", dir.display()), e))?
        {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with('.') || !name.ends_with(".json") {
                continue;
            }
            match self.read_json::<StageResult>(&entry.path()).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(err) => warn!(run_id, file = name, error = %err, "Skipping unreadable stage record"),
            }
        }
        records.sort_by(|a, b| a.stage.cmp(&b.stage));
        Ok(records)
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn put(&self, result: &StageResult) -> Result<(), PersistenceError> {
        validate_key(&result.run_id)?;
        validate_key(&result.stage)?;

        let key = format!("{}/{}", result.run_id, result.stage);
        let lock = self.lock_for(&key);
        let written = {
            let _guard = lock.lock().await;
            self.write_result(result).await
        };
        self.release_lock(&key, lock);
        written?;

        debug!(
            run_id = %result.run_id,
            stage = %result.stage,
            status = %result.status,
            attempt = result.attempt,
            "Stage result persisted"
        );
        Ok(())
    }

    async fn get(&self, run_id: &str, stage: &str) -> Result<Option<StageResult>, PersistenceError> {
        validate_key(run_id)?;
        validate_key(stage)?;
        self.read_json(&self.current_path(run_id, stage)).await
    }

    async fn list_completed(&self, run_id: &str) -> Result<BTreeSet<String>, PersistenceError> {
        Ok(self
            .current_records(run_id)
            .await?
            .into_iter()
            .filter(|r| r.status == StageStatus::Success)
            .map(|r| r.stage)
            .collect())
    }

    async fn history(&self, run_id: &str, stage: &str) -> Result<Vec<StageResult>, PersistenceError> {
        validate_key(run_id)?;
        validate_key(stage)?;
        let path = self.history_path(run_id, stage);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(PersistenceError::io(format!("reading {}", path.display()), err)),
        };

        let mut history = Vec::new();
        for (line_no, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<StageResult>(line) {
                Ok(record) => history.push(record),
                Err(err) => warn!(
                    path = %path.display(),
                    line = line_no + 1,
                    error = %err,
                    "Skipping unparsable history line"
                ),
            }
        }
        Ok(history)
    }

    async fn list_results(&self, run_id: &str) -> Result<Vec<StageResult>, PersistenceError> {
        self.current_records(run_id).await
    }

    async fn put_run(&self, run: &RunRecord) -> Result<(), PersistenceError> {
        validate_key(&run.run_id)?;

        let key = format!("{}/{RUN_FILE}", run.run_id);
        let lock = self.lock_for(&key);
        let written = {
            let _guard = lock.lock().await;
            let dir = self.run_dir(&run.run_id);
            match self.ensure_dir(&dir).await {
                Ok(()) => self.write_atomic(&dir.join(RUN_FILE), run).await,
                Err(err) => Err(err),
            }
        };
        self.release_lock(&key, lock);
        written
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>, PersistenceError> {
        validate_key(run_id)?;
        self.read_json(&self.run_dir(run_id).join(RUN_FILE)).await
    }

    async fn list_runs(&self) -> Result<Vec<RunRecord>, PersistenceError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(PersistenceError::io(
                    format!("listing {}", self.root.display()),
                    err,
                ))
            }
        };

        let mut runs = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PersistenceError::io(format!("listing {}", self.root.display()), e))?
        {
            let path = entry.path().join(RUN_FILE);
            match self.read_json::<RunRecord>(&path).await {
                Ok(Some(run)) => runs.push(run),
                Ok(None) => {}
                Err(err) => warn!(path = %path.display(), error = %err, "Skipping unreadable run record"),
            }
        }
        runs.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.run_id.cmp(&b.run_id))
        });
        Ok(runs)
    }
}

/// Flushes directory entries (creations, renames) to disk.
#[cfg(unix)]
async fn sync_dir(dir: &Path) -> Result<(), PersistenceError> {
    let ctx = || format!("syncing directory {}", dir.display());
    let handle = tokio::fs::File::open(dir)
        .await
        .map_err(|e| PersistenceError::io(ctx(), e))?;
    handle.sync_all().await.map_err(|e| PersistenceError::io(ctx(), e))
}

/// Directory handles cannot be synced on this platform.
#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> Result<(), PersistenceError> {
    Ok(())
}
