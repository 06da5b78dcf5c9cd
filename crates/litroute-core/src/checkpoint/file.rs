//! JSON-file checkpoint backend.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::{
    CheckpointError, CheckpointResult, CheckpointStore, CheckpointSummary, Cursor, OutcomeEntry,
    PendingMove, RunStatus, WorkflowCheckpoint, WorkflowId,
};

const EXTENSION: &str = "json";

/// Stores each workflow as `<dir>/<id>.json`.
///
/// Every update rewrites the document into a temporary file in the same
/// directory, syncs it and renames it over the old one, so readers only ever
/// see complete documents.
#[derive(Debug)]
pub struct FileCheckpointStore {
    dir: PathBuf,
    // Serialises read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl FileCheckpointStore {
    /// Opens (and creates) the checkpoint directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new(dir: impl Into<PathBuf>) -> CheckpointResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            lock: Mutex::new(()),
        })
    }

    /// Directory holding the documents.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &WorkflowId) -> PathBuf {
        self.dir.join(format!("{id}.{EXTENSION}"))
    }

    async fn read(&self, id: &WorkflowId) -> CheckpointResult<Option<WorkflowCheckpoint>> {
        let path = self.path_for(id);
        blocking(move || read_document(&path)).await
    }

    async fn write(&self, checkpoint: WorkflowCheckpoint) -> CheckpointResult<()> {
        let dir = self.dir.clone();
        let path = self.path_for(&checkpoint.id);
        blocking(move || publish(&dir, &path, &checkpoint)).await
    }

    async fn update<F>(&self, id: &WorkflowId, mutate: F) -> CheckpointResult<()>
    where
        F: FnOnce(&mut WorkflowCheckpoint) + Send,
    {
        let _guard = self.lock.lock().await;
        let mut checkpoint = self
            .read(id)
            .await?
            .ok_or_else(|| CheckpointError::NotFound(id.clone()))?;
        mutate(&mut checkpoint);
        self.write(checkpoint).await
    }
}

async fn blocking<T, F>(f: F) -> CheckpointResult<T>
where
    F: FnOnce() -> CheckpointResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CheckpointError::Io(std::io::Error::other(e)))?
}

fn read_document(path: &Path) -> CheckpointResult<Option<WorkflowCheckpoint>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn publish(dir: &Path, path: &Path, checkpoint: &WorkflowCheckpoint) -> CheckpointResult<()> {
    let bytes = serde_json::to_vec_pretty(checkpoint)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(&bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| CheckpointError::Io(e.error))?;
    debug!(path = %path.display(), "Published checkpoint");
    Ok(())
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self, id: &WorkflowId) -> CheckpointResult<Option<WorkflowCheckpoint>> {
        self.read(id).await
    }

    async fn create(&self, checkpoint: &WorkflowCheckpoint) -> CheckpointResult<()> {
        let _guard = self.lock.lock().await;
        if self.read(&checkpoint.id).await?.is_some() {
            return Err(CheckpointError::AlreadyExists(checkpoint.id.clone()));
        }
        self.write(checkpoint.clone()).await
    }

    async fn append(
        &self,
        id: &WorkflowId,
        entry: &OutcomeEntry,
        cursor: Cursor,
    ) -> CheckpointResult<()> {
        let entry = entry.clone();
        self.update(id, move |c| c.record(entry, cursor)).await
    }

    async fn stage(&self, id: &WorkflowId, pending: Option<&PendingMove>) -> CheckpointResult<()> {
        let pending = pending.cloned();
        self.update(id, move |c| c.stage(pending)).await
    }

    async fn advance(
        &self,
        id: &WorkflowId,
        cursor: Cursor,
        skipped: usize,
    ) -> CheckpointResult<()> {
        self.update(id, move |c| c.advance(cursor, skipped)).await
    }

    async fn set_status(&self, id: &WorkflowId, status: RunStatus) -> CheckpointResult<()> {
        self.update(id, move |c| c.set_status(status)).await
    }

    async fn finalize(&self, id: &WorkflowId) -> CheckpointResult<bool> {
        let _guard = self.lock.lock().await;
        let path = self.path_for(id);
        blocking(move || match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        })
        .await
    }

    async fn list(&self) -> CheckpointResult<Vec<CheckpointSummary>> {
        let dir = self.dir.clone();
        blocking(move || {
            let mut summaries = Vec::new();
            for entry in std::fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                    continue;
                }
                if let Some(checkpoint) = read_document(&path)? {
                    summaries.push(checkpoint.summary());
                }
            }
            summaries.sort_by(|a, b| a.id.cmp(&b.id));
            Ok(summaries)
        })
        .await
    }
}
