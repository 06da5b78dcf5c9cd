//! `SQLite` checkpoint backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};

use super::{
    CheckpointError, CheckpointResult, CheckpointStore, CheckpointSummary, Cursor, ItemResult,
    OutcomeEntry, PendingMove, RunStatus, WorkflowCheckpoint, WorkflowId,
};
use crate::model::ClassificationOutcome;

/// Repository for workflow checkpoints.
pub struct SqliteCheckpointStore {
    pool: SqlitePool,
}

impl SqliteCheckpointStore {
    /// Create a new store with the given database path.
    ///
    /// Creates the database and tables if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn new(database_path: &str) -> CheckpointResult<Self> {
        let url = format!("sqlite:{database_path}?mode=rwc");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let store = Self { pool };
        store.initialize().await?;
        Ok(store)
    }

    /// Create an in-memory store for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn in_memory() -> CheckpointResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let store = Self { pool };
        store.initialize().await?;
        Ok(store)
    }

    async fn initialize(&self) -> CheckpointResult<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS workflows (
                id TEXT PRIMARY KEY,
                params TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'running',
                cursor_source INTEGER NOT NULL DEFAULT 0,
                cursor_offset INTEGER NOT NULL DEFAULT 0,
                skipped INTEGER NOT NULL DEFAULT 0,
                pending TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS outcomes (
                workflow_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                item_key TEXT NOT NULL,
                recorded_at TEXT NOT NULL,
                outcome TEXT,
                failed INTEGER NOT NULL DEFAULT 0,
                result TEXT NOT NULL,
                PRIMARY KEY (workflow_id, seq)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn parse_time(s: &str) -> CheckpointResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| CheckpointError::Corrupt(format!("bad timestamp {s:?}: {e}")))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn row_to_checkpoint_head(row: &SqliteRow) -> CheckpointResult<WorkflowCheckpoint> {
    let id = WorkflowId::new(row.get::<String, _>("id"))?;
    let status: String = row.get("status");
    Ok(WorkflowCheckpoint {
        id,
        params: serde_json::from_str(&row.get::<String, _>("params"))?,
        status: RunStatus::parse(&status)
            .ok_or_else(|| CheckpointError::Corrupt(format!("unknown status {status:?}")))?,
        cursor: Cursor {
            source: row.get::<i64, _>("cursor_source") as usize,
            offset: row.get::<i64, _>("cursor_offset") as u32,
        },
        skipped: row.get::<i64, _>("skipped") as usize,
        log: Vec::new(),
        pending: row
            .get::<Option<String>, _>("pending")
            .map(|json| serde_json::from_str(&json))
            .transpose()?,
        created_at: parse_time(&row.get::<String, _>("created_at"))?,
        updated_at: parse_time(&row.get::<String, _>("updated_at"))?,
    })
}

fn row_to_entry(row: &SqliteRow) -> CheckpointResult<OutcomeEntry> {
    let outcome = row
        .get::<Option<String>, _>("outcome")
        .map(|s| {
            ClassificationOutcome::parse(&s)
                .ok_or_else(|| CheckpointError::Corrupt(format!("unknown outcome {s:?}")))
        })
        .transpose()?;
    let result: ItemResult = serde_json::from_str(&row.get::<String, _>("result"))?;
    Ok(OutcomeEntry {
        item_key: row.get("item_key"),
        recorded_at: parse_time(&row.get::<String, _>("recorded_at"))?,
        outcome,
        result,
    })
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn load(&self, id: &WorkflowId) -> CheckpointResult<Option<WorkflowCheckpoint>> {
        let row = sqlx::query(
            r"
            SELECT id, params, status, cursor_source, cursor_offset, skipped, pending,
                   created_at, updated_at
            FROM workflows
            WHERE id = ?
            ",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut checkpoint = row_to_checkpoint_head(&row)?;

        let rows = sqlx::query(
            r"
            SELECT item_key, recorded_at, outcome, result
            FROM outcomes
            WHERE workflow_id = ?
            ORDER BY seq
            ",
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await?;
        checkpoint.log = rows.iter().map(row_to_entry).collect::<CheckpointResult<_>>()?;

        Ok(Some(checkpoint))
    }

    #[allow(clippy::cast_possible_wrap)]
    async fn create(&self, checkpoint: &WorkflowCheckpoint) -> CheckpointResult<()> {
        let params = serde_json::to_string(&checkpoint.params)?;
        let pending = checkpoint
            .pending
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let result = sqlx::query(
            r"
            INSERT OR IGNORE INTO workflows
                (id, params, status, cursor_source, cursor_offset, skipped, pending,
                 created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(checkpoint.id.as_str())
        .bind(params)
        .bind(checkpoint.status.as_str())
        .bind(checkpoint.cursor.source as i64)
        .bind(i64::from(checkpoint.cursor.offset))
        .bind(checkpoint.skipped as i64)
        .bind(pending)
        .bind(checkpoint.created_at.to_rfc3339())
        .bind(checkpoint.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CheckpointError::AlreadyExists(checkpoint.id.clone()));
        }
        Ok(())
    }

    #[allow(clippy::cast_possible_wrap)]
    async fn append(
        &self,
        id: &WorkflowId,
        entry: &OutcomeEntry,
        cursor: Cursor,
    ) -> CheckpointResult<()> {
        let result = serde_json::to_string(&entry.result)?;
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r"
            UPDATE workflows
            SET cursor_source = ?, cursor_offset = ?, pending = NULL, updated_at = ?
            WHERE id = ?
            ",
        )
        .bind(cursor.source as i64)
        .bind(i64::from(cursor.offset))
        .bind(entry.recorded_at.to_rfc3339())
        .bind(id.as_str())
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(CheckpointError::NotFound(id.clone()));
        }

        sqlx::query(
            r"
            INSERT INTO outcomes (workflow_id, seq, item_key, recorded_at, outcome, failed, result)
            VALUES (
                ?,
                (SELECT COALESCE(MAX(seq), 0) + 1 FROM outcomes WHERE workflow_id = ?),
                ?, ?, ?, ?, ?
            )
            ",
        )
        .bind(id.as_str())
        .bind(id.as_str())
        .bind(&entry.item_key)
        .bind(entry.recorded_at.to_rfc3339())
        .bind(entry.outcome.map(|o| o.as_str()))
        .bind(matches!(entry.result, ItemResult::Failed { .. }))
        .bind(result)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn stage(&self, id: &WorkflowId, pending: Option<&PendingMove>) -> CheckpointResult<()> {
        let pending = pending.map(serde_json::to_string).transpose()?;
        let result = sqlx::query(
            r"
            UPDATE workflows
            SET pending = ?, updated_at = ?
            WHERE id = ?
            ",
        )
        .bind(pending)
        .bind(Utc::now().to_rfc3339())
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CheckpointError::NotFound(id.clone()));
        }
        Ok(())
    }

    #[allow(clippy::cast_possible_wrap)]
    async fn advance(
        &self,
        id: &WorkflowId,
        cursor: Cursor,
        skipped: usize,
    ) -> CheckpointResult<()> {
        let result = sqlx::query(
            r"
            UPDATE workflows
            SET cursor_source = ?, cursor_offset = ?, skipped = ?, updated_at = ?
            WHERE id = ?
            ",
        )
        .bind(cursor.source as i64)
        .bind(i64::from(cursor.offset))
        .bind(skipped as i64)
        .bind(Utc::now().to_rfc3339())
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CheckpointError::NotFound(id.clone()));
        }
        Ok(())
    }

    async fn set_status(&self, id: &WorkflowId, status: RunStatus) -> CheckpointResult<()> {
        let result = sqlx::query(
            r"
            UPDATE workflows
            SET status = ?, updated_at = ?
            WHERE id = ?
            ",
        )
        .bind(status.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CheckpointError::NotFound(id.clone()));
        }
        Ok(())
    }

    async fn finalize(&self, id: &WorkflowId) -> CheckpointResult<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM outcomes WHERE workflow_id = ?")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM workflows WHERE id = ?")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(deleted.rows_affected() > 0)
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    async fn list(&self) -> CheckpointResult<Vec<CheckpointSummary>> {
        let rows = sqlx::query(
            r"
            SELECT w.id, w.params, w.status, w.cursor_source, w.cursor_offset, w.skipped,
                   w.pending, w.created_at, w.updated_at,
                   (SELECT COUNT(*) FROM outcomes o WHERE o.workflow_id = w.id) AS processed,
                   (SELECT COUNT(*) FROM outcomes o
                     WHERE o.workflow_id = w.id AND o.failed = 1) AS failed
            FROM workflows w
            ORDER BY w.id
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let head = row_to_checkpoint_head(row)?;
                Ok(CheckpointSummary {
                    id: head.id,
                    status: head.status,
                    processed: row.get::<i64, _>("processed") as usize,
                    failed: row.get::<i64, _>("failed") as usize,
                    skipped: head.skipped,
                    dry_run: head.params.dry_run,
                    created_at: head.created_at,
                    updated_at: head.updated_at,
                })
            })
            .collect()
    }
}
