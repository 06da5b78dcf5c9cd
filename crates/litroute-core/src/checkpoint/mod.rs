//! Persistent per-workflow progress records.
//!
//! A checkpoint holds the run parameters, the scan cursor and an append-only
//! log with one terminal entry per processed item. Counts are always derived
//! from the log, never from the library.
//!
//! Two backends are provided:
//! - [`FileCheckpointStore`]: one JSON document per workflow, published with
//!   write-to-temp, fsync, rename
//! - [`SqliteCheckpointStore`]: `workflows` and `outcomes` tables, one
//!   transaction per append

mod file;
mod registry;
mod sqlite;

use std::collections::HashSet;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::library::Source;
use crate::model::{ClassificationOutcome, Destination};

pub use file::FileCheckpointStore;
pub use registry::WorkflowRegistry;
pub use sqlite::SqliteCheckpointStore;

/// Errors raised by checkpoint stores.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// File system failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Database failure.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored record could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// A stored record is inconsistent.
    #[error("Corrupt checkpoint: {0}")]
    Corrupt(String),

    /// The workflow has no checkpoint.
    #[error("No checkpoint for workflow {0}")]
    NotFound(WorkflowId),

    /// A checkpoint already exists for the workflow.
    #[error("Checkpoint for workflow {0} already exists")]
    AlreadyExists(WorkflowId),

    /// The workflow id is not usable as a record name.
    #[error("Invalid workflow id: {0:?}")]
    InvalidId(String),
}

/// Result type for checkpoint operations.
pub type CheckpointResult<T> = std::result::Result<T, CheckpointError>;

/// Workflow identifier: ASCII letters, digits, `-`, `_` and `.`, not starting with `.`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WorkflowId(String);

impl WorkflowId {
    /// Validates and wraps an id.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::InvalidId`] for empty ids, ids starting with
    /// `.` and ids containing other characters.
    pub fn new(id: impl Into<String>) -> CheckpointResult<Self> {
        let id = id.into();
        let valid = !id.is_empty()
            && id.len() <= 128
            && !id.starts_with('.')
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if valid {
            Ok(Self(id))
        } else {
            Err(CheckpointError::InvalidId(id))
        }
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for WorkflowId {
    type Error = CheckpointError;

    fn try_from(value: String) -> CheckpointResult<Self> {
        Self::new(value)
    }
}

impl From<WorkflowId> for String {
    fn from(id: WorkflowId) -> Self {
        id.0
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// A run is (or was, until a crash) in progress.
    #[default]
    Running,
    /// Stopped early; resumable.
    Suspended,
    /// Source drained or budget met.
    Completed,
    /// Stopped because progress could not be persisted.
    Aborted,
}

impl RunStatus {
    /// Parse from stored string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "suspended" => Some(Self::Suspended),
            "completed" => Some(Self::Completed),
            "aborted" => Some(Self::Aborted),
            _ => None,
        }
    }

    /// Convert to stored string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position of the scan: source index and offset of the next unseen item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Cursor {
    /// Index into [`RunParams::sources`].
    pub source: usize,
    /// Items of that source already observed and still in it.
    pub offset: u32,
}

/// Parameters a workflow was started with; reused on resume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunParams {
    /// Sources in priority order.
    pub sources: Vec<Source>,
    /// Items per page.
    pub page_size: u32,
    /// Maximum processed (non-skipped) items over the workflow's lifetime.
    pub treated_limit: usize,
    /// Whether library writes are suppressed.
    pub dry_run: bool,
}

/// Terminal result of one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum ItemResult {
    /// The router chose a destination and membership is settled.
    Routed {
        /// Chosen destination.
        destination: Destination,
        /// Collection key of the destination.
        collection: String,
        /// Whether membership actually changed.
        moved: bool,
    },
    /// Processing failed; the item is not retried by this workflow.
    Failed {
        /// Description of the last error.
        error: String,
    },
}

/// One line of the outcome log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeEntry {
    /// Item key.
    pub item_key: String,
    /// When the entry was written.
    pub recorded_at: DateTime<Utc>,
    /// Classification, if it got that far.
    pub outcome: Option<ClassificationOutcome>,
    /// Destination or error.
    pub result: ItemResult,
}

impl OutcomeEntry {
    /// Entry for a routed item.
    #[must_use]
    pub fn routed(
        item_key: impl Into<String>,
        outcome: ClassificationOutcome,
        destination: Destination,
        collection: impl Into<String>,
        moved: bool,
    ) -> Self {
        Self {
            item_key: item_key.into(),
            recorded_at: Utc::now(),
            outcome: Some(outcome),
            result: ItemResult::Routed {
                destination,
                collection: collection.into(),
                moved,
            },
        }
    }

    /// Entry for a failed item.
    #[must_use]
    pub fn failed(
        item_key: impl Into<String>,
        outcome: Option<ClassificationOutcome>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            item_key: item_key.into(),
            recorded_at: Utc::now(),
            outcome,
            result: ItemResult::Failed {
                error: error.into(),
            },
        }
    }

    /// Destination, if routed.
    #[must_use]
    pub const fn destination(&self) -> Option<Destination> {
        match &self.result {
            ItemResult::Routed { destination, .. } => Some(*destination),
            ItemResult::Failed { .. } => None,
        }
    }
}

/// A membership write that has been started but not logged yet.
///
/// Stored before the library is touched and cleared by the next append, so
/// a crash between the write and its log entry can be settled on resume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingMove {
    /// Item key.
    pub item_key: String,
    /// Classification that chose the destination.
    pub outcome: ClassificationOutcome,
    /// Chosen destination.
    pub destination: Destination,
    /// Collection key of the destination.
    pub collection: String,
    /// Whether the item was outside `collection` when observed.
    pub moved: bool,
    /// Collection being scanned when the item was observed.
    pub source: Option<String>,
    /// Scan position right after the item was observed.
    pub cursor: Cursor,
}

impl PendingMove {
    /// Whether finishing the write takes the item out of the scanned collection.
    #[must_use]
    pub fn departs(&self) -> bool {
        self.moved
            && self
                .source
                .as_deref()
                .is_some_and(|source| source != self.collection)
    }

    /// Scan position once the write has landed.
    #[must_use]
    pub fn settled_cursor(&self) -> Cursor {
        let mut cursor = self.cursor;
        if self.departs() {
            cursor.offset = cursor.offset.saturating_sub(1);
        }
        cursor
    }

    /// The log entry for the finished write.
    #[must_use]
    pub fn entry(&self) -> OutcomeEntry {
        OutcomeEntry::routed(
            self.item_key.clone(),
            self.outcome,
            self.destination,
            self.collection.clone(),
            self.moved,
        )
    }
}

/// Full progress record of one workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowCheckpoint {
    /// Workflow id.
    pub id: WorkflowId,
    /// Run parameters.
    pub params: RunParams,
    /// Run status.
    pub status: RunStatus,
    /// Scan position.
    pub cursor: Cursor,
    /// Items skipped by the skip predicate.
    pub skipped: usize,
    /// One terminal entry per processed item, in processing order.
    pub log: Vec<OutcomeEntry>,
    /// A library write whose entry has not been appended yet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<PendingMove>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl WorkflowCheckpoint {
    /// A fresh checkpoint at the start of the first source.
    #[must_use]
    pub fn new(id: WorkflowId, params: RunParams) -> Self {
        let now = Utc::now();
        Self {
            id,
            params,
            status: RunStatus::Running,
            cursor: Cursor::default(),
            skipped: 0,
            log: Vec::new(),
            pending: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Processed (non-skipped) items, rebuilt from the log.
    #[must_use]
    pub fn processed(&self) -> usize {
        self.log.len()
    }

    /// Keys with a terminal entry.
    #[must_use]
    pub fn recorded_keys(&self) -> HashSet<String> {
        self.log.iter().map(|e| e.item_key.clone()).collect()
    }

    /// Number of failed entries.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.log
            .iter()
            .filter(|e| matches!(e.result, ItemResult::Failed { .. }))
            .count()
    }

    /// Listing summary.
    #[must_use]
    pub fn summary(&self) -> CheckpointSummary {
        CheckpointSummary {
            id: self.id.clone(),
            status: self.status,
            processed: self.processed(),
            failed: self.failed(),
            skipped: self.skipped,
            dry_run: self.params.dry_run,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    pub(crate) fn record(&mut self, entry: OutcomeEntry, cursor: Cursor) {
        self.updated_at = entry.recorded_at;
        self.log.push(entry);
        self.cursor = cursor;
        self.pending = None;
    }

    pub(crate) fn stage(&mut self, pending: Option<PendingMove>) {
        self.pending = pending;
        self.updated_at = Utc::now();
    }

    pub(crate) fn advance(&mut self, cursor: Cursor, skipped: usize) {
        self.cursor = cursor;
        self.skipped = skipped;
        self.updated_at = Utc::now();
    }

    pub(crate) fn set_status(&mut self, status: RunStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// One row of a workflow listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointSummary {
    /// Workflow id.
    pub id: WorkflowId,
    /// Run status.
    pub status: RunStatus,
    /// Processed items.
    pub processed: usize,
    /// Failed items (included in `processed`).
    pub failed: usize,
    /// Skipped items.
    pub skipped: usize,
    /// Whether this was a dry run.
    pub dry_run: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

/// Persistence of workflow checkpoints.
///
/// Implementations must never expose a partially written update: after a
/// crash, `load` returns either the state before or after the interrupted
/// call.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Loads a checkpoint; `None` when the workflow is unknown.
    async fn load(&self, id: &WorkflowId) -> CheckpointResult<Option<WorkflowCheckpoint>>;

    /// Stores a new checkpoint.
    async fn create(&self, checkpoint: &WorkflowCheckpoint) -> CheckpointResult<()>;

    /// Appends a terminal entry, moves the cursor and clears any pending
    /// move, atomically.
    async fn append(
        &self,
        id: &WorkflowId,
        entry: &OutcomeEntry,
        cursor: Cursor,
    ) -> CheckpointResult<()>;

    /// Records a library write about to start, or clears it with `None`.
    async fn stage(&self, id: &WorkflowId, pending: Option<&PendingMove>)
    -> CheckpointResult<()>;

    /// Moves the cursor past skipped items.
    async fn advance(&self, id: &WorkflowId, cursor: Cursor, skipped: usize)
    -> CheckpointResult<()>;

    /// Updates the run status.
    async fn set_status(&self, id: &WorkflowId, status: RunStatus) -> CheckpointResult<()>;

    /// Deletes the checkpoint. Returns whether one existed.
    async fn finalize(&self, id: &WorkflowId) -> CheckpointResult<bool>;

    /// Summaries of all stored checkpoints, ordered by id.
    async fn list(&self) -> CheckpointResult<Vec<CheckpointSummary>>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;

    pub fn sample_params() -> RunParams {
        RunParams {
            sources: vec![Source::Collection("INBOX001".into()), Source::Library],
            page_size: 50,
            treated_limit: 20,
            dry_run: false,
        }
    }

    /// Exercises the full store contract against any backend.
    pub async fn exercise_store(store: &dyn CheckpointStore) {
        let id = WorkflowId::new("inbox-2024").unwrap();
        assert!(store.load(&id).await.unwrap().is_none());

        store
            .create(&WorkflowCheckpoint::new(id.clone(), sample_params()))
            .await
            .unwrap();
        let again = store
            .create(&WorkflowCheckpoint::new(id.clone(), sample_params()))
            .await;
        assert!(matches!(again, Err(CheckpointError::AlreadyExists(_))));

        let first = OutcomeEntry::routed(
            "AAAA2222",
            ClassificationOutcome::Review,
            Destination::ReviewHolding,
            "REVIEW01",
            true,
        );
        let second = OutcomeEntry::failed("BBBB3333", None, "not found: BBBB3333");
        let pending = PendingMove {
            item_key: "AAAA2222".into(),
            outcome: ClassificationOutcome::Review,
            destination: Destination::ReviewHolding,
            collection: "REVIEW01".into(),
            moved: true,
            source: Some("INBOX001".into()),
            cursor: Cursor { source: 0, offset: 1 },
        };
        store.stage(&id, Some(&pending)).await.unwrap();
        let staged = store.load(&id).await.unwrap().unwrap();
        assert_eq!(staged.pending.as_ref(), Some(&pending));
        assert_eq!(staged.processed(), 0);

        store
            .append(&id, &first, pending.settled_cursor())
            .await
            .unwrap();
        assert!(store.load(&id).await.unwrap().unwrap().pending.is_none());

        store.stage(&id, Some(&pending)).await.unwrap();
        store.stage(&id, None).await.unwrap();
        assert!(store.load(&id).await.unwrap().unwrap().pending.is_none());
        store
            .advance(&id, Cursor { source: 0, offset: 2 }, 2)
            .await
            .unwrap();
        store
            .append(&id, &second, Cursor { source: 0, offset: 3 })
            .await
            .unwrap();
        store.set_status(&id, RunStatus::Suspended).await.unwrap();

        let loaded = store.load(&id).await.unwrap().unwrap();
        assert_eq!(loaded.params, sample_params());
        assert_eq!(loaded.status, RunStatus::Suspended);
        assert_eq!(loaded.cursor, Cursor { source: 0, offset: 3 });
        assert_eq!(loaded.skipped, 2);
        assert_eq!(loaded.processed(), 2);
        assert_eq!(loaded.failed(), 1);
        assert_eq!(loaded.log[0].item_key, "AAAA2222");
        assert_eq!(loaded.log[0].result, first.result);
        assert_eq!(loaded.log[1].result, second.result);
        assert!(loaded.recorded_keys().contains("BBBB3333"));

        let other = WorkflowId::new("library-sweep").unwrap();
        store
            .create(&WorkflowCheckpoint::new(other.clone(), sample_params()))
            .await
            .unwrap();
        let listed = store.list().await.unwrap();
        assert_eq!(
            listed.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(),
            vec!["inbox-2024", "library-sweep"]
        );
        assert_eq!(listed[0].processed, 2);

        let missing = WorkflowId::new("missing").unwrap();
        assert!(matches!(
            store
                .append(&missing, &first, Cursor::default())
                .await,
            Err(CheckpointError::NotFound(_))
        ));

        assert!(store.finalize(&id).await.unwrap());
        assert!(!store.finalize(&id).await.unwrap());
        assert!(store.load(&id).await.unwrap().is_none());
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[test]
    fn test_pending_move_cursor() {
        let mut pending = PendingMove {
            item_key: "AAAA2222".into(),
            outcome: ClassificationOutcome::MainPaper,
            destination: Destination::Inbox,
            collection: "INBOX001".into(),
            moved: true,
            source: Some("SOURCE01".into()),
            cursor: Cursor { source: 0, offset: 4 },
        };
        assert_eq!(pending.settled_cursor(), Cursor { source: 0, offset: 3 });

        // Scanning the destination itself, or the whole library, keeps the item in view.
        pending.source = Some("INBOX001".into());
        assert_eq!(pending.settled_cursor().offset, 4);
        pending.source = None;
        assert_eq!(pending.settled_cursor().offset, 4);

        pending.source = Some("SOURCE01".into());
        pending.moved = false;
        assert_eq!(pending.settled_cursor().offset, 4);
        assert!(matches!(
            pending.entry().result,
            ItemResult::Routed { moved: false, .. }
        ));
    }

    #[test]
    fn test_checkpoint_without_pending_field_loads() {
        let checkpoint = WorkflowCheckpoint::new(
            WorkflowId::new("older").unwrap(),
            sample_params(),
        );
        let json = serde_json::to_string(&checkpoint).unwrap();
        assert!(!json.contains("pending"));
        let loaded: WorkflowCheckpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded, checkpoint);
    }

    #[test]
    fn test_workflow_id_validation() {
        assert!(WorkflowId::new("inbox_2024-01.a").is_ok());
        assert!(WorkflowId::new("").is_err());
        assert!(WorkflowId::new("../etc").is_err());
        assert!(WorkflowId::new(".hidden").is_err());
        assert!(WorkflowId::new("with space").is_err());
    }

    #[test]
    fn test_workflow_id_serde_validates() {
        let ok: WorkflowId = serde_json::from_str(r#""run-1""#).unwrap();
        assert_eq!(ok.as_str(), "run-1");
        assert!(serde_json::from_str::<WorkflowId>(r#""a/b""#).is_err());
    }

    #[test]
    fn test_item_result_serde() {
        let routed = ItemResult::Routed {
            destination: Destination::Inbox,
            collection: "INBOX001".into(),
            moved: false,
        };
        let json = serde_json::to_value(&routed).unwrap();
        assert_eq!(json["status"], "routed");
        assert_eq!(json["destination"], "inbox");
    }

    #[test]
    fn test_run_status_round_trip() {
        for status in [
            RunStatus::Running,
            RunStatus::Suspended,
            RunStatus::Completed,
            RunStatus::Aborted,
        ] {
            assert_eq!(RunStatus::parse(status.as_str()), Some(status));
        }
    }
}
