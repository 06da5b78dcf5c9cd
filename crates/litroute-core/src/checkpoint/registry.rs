//! Lookup across the committed and dry-run stores.

use std::sync::Arc;

use tracing::info;

use super::{CheckpointStore, CheckpointSummary, WorkflowCheckpoint, WorkflowId};
use crate::error::{Error, Result};

/// The pair of stores a deployment keeps checkpoints in.
///
/// Dry runs never share a record with committed runs, so the same workflow id
/// may exist once in each.
#[derive(Clone)]
pub struct WorkflowRegistry {
    committed: Arc<dyn CheckpointStore>,
    dry_run: Arc<dyn CheckpointStore>,
}

impl WorkflowRegistry {
    /// Wraps a committed store and a dry-run store.
    pub fn new(committed: Arc<dyn CheckpointStore>, dry_run: Arc<dyn CheckpointStore>) -> Self {
        Self { committed, dry_run }
    }

    /// The store that records runs of the given kind.
    #[must_use]
    pub fn store_for(&self, dry_run: bool) -> &dyn CheckpointStore {
        if dry_run {
            self.dry_run.as_ref()
        } else {
            self.committed.as_ref()
        }
    }

    /// Finds a checkpoint, preferring the committed store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WorkflowNotFound`] when neither store knows `id`.
    pub async fn locate(
        &self,
        id: &WorkflowId,
    ) -> Result<(&dyn CheckpointStore, WorkflowCheckpoint)> {
        for store in [self.committed.as_ref(), self.dry_run.as_ref()] {
            if let Some(checkpoint) = store.load(id).await? {
                return Ok((store, checkpoint));
            }
        }
        Err(Error::WorkflowNotFound(id.clone()))
    }

    /// Loads a checkpoint from either store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WorkflowNotFound`] when neither store knows `id`.
    pub async fn show(&self, id: &WorkflowId) -> Result<WorkflowCheckpoint> {
        Ok(self.locate(id).await?.1)
    }

    /// Summaries of committed and dry-run workflows, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns the store error.
    pub async fn list(&self) -> Result<Vec<CheckpointSummary>> {
        let mut all = self.committed.list().await?;
        all.extend(self.dry_run.list().await?);
        all.sort_by(|a, b| a.id.cmp(&b.id).then(a.dry_run.cmp(&b.dry_run)));
        Ok(all)
    }

    /// Deletes a workflow's checkpoints. Returns whether any existed.
    ///
    /// # Errors
    ///
    /// Returns the store error.
    pub async fn finalize(&self, id: &WorkflowId) -> Result<bool> {
        let committed = self.committed.finalize(id).await?;
        let dry = self.dry_run.finalize(id).await?;
        if committed || dry {
            info!(workflow = %id, "Workflow finalized");
        }
        Ok(committed || dry)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::checkpoint::tests::sample_params;
    use crate::memory::MemoryCheckpointStore;

    fn id(s: &str) -> WorkflowId {
        WorkflowId::new(s).unwrap()
    }

    #[tokio::test]
    async fn test_committed_store_wins_lookup() {
        let committed = Arc::new(MemoryCheckpointStore::new());
        let dry = Arc::new(MemoryCheckpointStore::new());
        let registry = WorkflowRegistry::new(committed.clone(), dry.clone());

        let mut planned = WorkflowCheckpoint::new(id("w"), sample_params());
        planned.params.dry_run = true;
        dry.create(&planned).await.unwrap();
        assert!(registry.show(&id("w")).await.unwrap().params.dry_run);

        committed
            .create(&WorkflowCheckpoint::new(id("w"), sample_params()))
            .await
            .unwrap();
        assert!(!registry.show(&id("w")).await.unwrap().params.dry_run);

        let listed = registry.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(!listed[0].dry_run && listed[1].dry_run);

        assert!(registry.finalize(&id("w")).await.unwrap());
        assert!(registry.list().await.unwrap().is_empty());
        assert!(matches!(
            registry.show(&id("w")).await,
            Err(Error::WorkflowNotFound(_))
        ));
    }
}
