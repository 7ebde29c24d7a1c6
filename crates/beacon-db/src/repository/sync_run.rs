//! # Sync Run Repository
//!
//! Durable state of every sync run: status, progress, the append-only
//! checkpoint log, and the bounded error and warning logs.
//!
//! ## Resume Contract
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  sync_runs            1 row per run (status, progress, options)         │
//! │  sync_checkpoints     UNIQUE(run_id, step, location_ref)                │
//! │                       INSERT OR IGNORE → a unit is never logged twice   │
//! │  sync_errors          newest N kept per run (oldest evicted)            │
//! │  sync_warnings        newest N kept per run                             │
//! │                                                                         │
//! │  resume = load run → checkpoints become the "already done" set         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use beacon_core::classify::{ErrorCategory, Severity};
use beacon_core::{Checkpoint, ErrorRecord, Progress, RunOptions, SyncRun, SyncStatus};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{DbError, DbResult};

// =============================================================================
// Row Types
// =============================================================================

#[derive(Debug, FromRow)]
struct SyncRunRow {
    id: String,
    owner_account_id: String,
    status: SyncStatus,
    current_step: Option<String>,
    progress_total: i64,
    progress_completed: i64,
    progress_percentage: i64,
    options: String,
    started_at: DateTime<Utc>,
    last_updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    archived_at: Option<DateTime<Utc>>,
}

#[derive(Debug, FromRow)]
struct CheckpointRow {
    step: String,
    location_ref: String,
    records_processed: i64,
    created_at: DateTime<Utc>,
}

impl From<CheckpointRow> for Checkpoint {
    fn from(row: CheckpointRow) -> Self {
        Checkpoint {
            step: row.step,
            location_ref: row.location_ref,
            records_processed: row.records_processed.max(0) as u32,
            timestamp: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct ErrorRow {
    code: String,
    category: String,
    severity: String,
    retryable: bool,
    message: String,
    context_entity: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<ErrorRow> for ErrorRecord {
    fn from(row: ErrorRow) -> Self {
        ErrorRecord {
            code: row.code,
            category: ErrorCategory::parse(&row.category),
            severity: Severity::parse(&row.severity),
            retryable: row.retryable,
            message: row.message,
            context_entity: row.context_entity,
            timestamp: row.created_at,
        }
    }
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for sync run bookkeeping.
#[derive(Debug, Clone)]
pub struct SyncRunRepository {
    pool: SqlitePool,
}

impl SyncRunRepository {
    /// Creates a new SyncRunRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SyncRunRepository { pool }
    }

    /// Creates a pending run.
    pub async fn create(&self, owner_account_id: &str, options: &RunOptions) -> DbResult<SyncRun> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let options_json = serde_json::to_string(options).map_err(|e| DbError::Decode {
            column: "sync_runs.options".to_string(),
            message: e.to_string(),
        })?;

        sqlx::query(
            r#"
            INSERT INTO sync_runs (
                id, owner_account_id, status, options, started_at, last_updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?5)
            "#,
        )
        .bind(&id)
        .bind(owner_account_id)
        .bind(SyncStatus::Pending)
        .bind(&options_json)
        .bind(now)
        .execute(&self.pool)
        .await?;

        info!(run_id = %id, owner = %owner_account_id, "Sync run created");

        Ok(SyncRun {
            id,
            owner_account_id: owner_account_id.to_string(),
            status: SyncStatus::Pending,
            current_step: None,
            progress: Progress::default(),
            checkpoints: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            options: options.clone(),
            started_at: now,
            last_updated_at: now,
            completed_at: None,
            archived_at: None,
        })
    }

    /// Loads a run with its checkpoints, errors, and warnings.
    pub async fn get(&self, id: &str) -> DbResult<SyncRun> {
        self.find(id)
            .await?
            .ok_or_else(|| DbError::not_found("SyncRun", id))
    }

    /// Like [`SyncRunRepository::get`] but `None` when absent.
    pub async fn find(&self, id: &str) -> DbResult<Option<SyncRun>> {
        let row: Option<SyncRunRow> = sqlx::query_as(
            r#"
            SELECT id, owner_account_id, status, current_step,
                   progress_total, progress_completed, progress_percentage,
                   options, started_at, last_updated_at, completed_at, archived_at
            FROM sync_runs
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let options: RunOptions =
            serde_json::from_str(&row.options).map_err(|e| DbError::Decode {
                column: "sync_runs.options".to_string(),
                message: e.to_string(),
            })?;

        Ok(Some(SyncRun {
            checkpoints: self.list_checkpoints(&row.id).await?,
            errors: self.list_errors(&row.id).await?,
            warnings: self.list_warnings(&row.id).await?,
            id: row.id,
            owner_account_id: row.owner_account_id,
            status: row.status,
            current_step: row.current_step,
            progress: Progress {
                total: row.progress_total.max(0) as u32,
                completed: row.progress_completed.max(0) as u32,
                percentage: row.progress_percentage.clamp(0, 100) as u8,
            },
            options,
            started_at: row.started_at,
            last_updated_at: row.last_updated_at,
            completed_at: row.completed_at,
            archived_at: row.archived_at,
        }))
    }

    /// Persists a status change. Callers validate the transition first.
    ///
    /// `completed_at` is stamped when the new status is terminal and cleared
    /// when a run is resumed.
    pub async fn update_status(&self, id: &str, status: SyncStatus) -> DbResult<()> {
        let now = Utc::now();
        let completed_at = status.is_terminal().then_some(now);

        let result = sqlx::query(
            r#"
            UPDATE sync_runs SET
                status = ?2,
                completed_at = ?3,
                last_updated_at = ?4
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(completed_at)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("SyncRun", id));
        }

        info!(run_id = %id, status = %status, "Sync run status updated");
        Ok(())
    }

    /// Persists the progress snapshot and current step.
    ///
    /// The stored percentage only moves forward, whatever the caller sends.
    pub async fn update_progress(
        &self,
        id: &str,
        current_step: Option<&str>,
        progress: &Progress,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE sync_runs SET
                current_step = COALESCE(?2, current_step),
                progress_total = ?3,
                progress_completed = ?4,
                progress_percentage = MAX(progress_percentage, ?5),
                last_updated_at = ?6
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(current_step)
        .bind(i64::from(progress.total))
        .bind(i64::from(progress.completed))
        .bind(i64::from(progress.percentage))
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Appends a checkpoint.
    ///
    /// ## Returns
    /// `true` if the checkpoint was new, `false` if `(run, step, location)`
    /// was already recorded.
    pub async fn append_checkpoint(&self, run_id: &str, checkpoint: &Checkpoint) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO sync_checkpoints (
                run_id, step, location_ref, records_processed, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(run_id)
        .bind(&checkpoint.step)
        .bind(&checkpoint.location_ref)
        .bind(i64::from(checkpoint.records_processed))
        .bind(checkpoint.timestamp)
        .execute(&self.pool)
        .await?;

        let inserted = result.rows_affected() > 0;
        debug!(
            run_id = %run_id,
            step = %checkpoint.step,
            location_ref = %checkpoint.location_ref,
            inserted,
            "Checkpoint appended"
        );
        Ok(inserted)
    }

    /// Checkpoints of a run, oldest first.
    pub async fn list_checkpoints(&self, run_id: &str) -> DbResult<Vec<Checkpoint>> {
        let rows: Vec<CheckpointRow> = sqlx::query_as(
            r#"
            SELECT step, location_ref, records_processed, created_at
            FROM sync_checkpoints
            WHERE run_id = ?1
            ORDER BY id ASC
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Checkpoint::from).collect())
    }

    /// Appends error records, keeping only the newest `max_retained`.
    pub async fn append_errors(
        &self,
        run_id: &str,
        errors: &[ErrorRecord],
        max_retained: usize,
    ) -> DbResult<()> {
        if errors.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for error in errors {
            sqlx::query(
                r#"
                INSERT INTO sync_errors (
                    run_id, code, category, severity, retryable,
                    message, context_entity, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )
            .bind(run_id)
            .bind(&error.code)
            .bind(error.category.as_str())
            .bind(error.severity.as_str())
            .bind(error.retryable)
            .bind(&error.message)
            .bind(&error.context_entity)
            .bind(error.timestamp)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            DELETE FROM sync_errors
            WHERE run_id = ?1
              AND id NOT IN (
                SELECT id FROM sync_errors WHERE run_id = ?1 ORDER BY id DESC LIMIT ?2
              )
            "#,
        )
        .bind(run_id)
        .bind(max_retained as i64)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Retained error records, oldest first.
    pub async fn list_errors(&self, run_id: &str) -> DbResult<Vec<ErrorRecord>> {
        let rows: Vec<ErrorRow> = sqlx::query_as(
            r#"
            SELECT code, category, severity, retryable, message, context_entity, created_at
            FROM sync_errors
            WHERE run_id = ?1
            ORDER BY id ASC
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ErrorRecord::from).collect())
    }

    /// Appends warnings, keeping only the newest `max_retained`.
    pub async fn append_warnings(
        &self,
        run_id: &str,
        warnings: &[String],
        max_retained: usize,
    ) -> DbResult<()> {
        if warnings.is_empty() {
            return Ok(());
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        for warning in warnings {
            sqlx::query("INSERT INTO sync_warnings (run_id, message, created_at) VALUES (?1, ?2, ?3)")
                .bind(run_id)
                .bind(warning)
                .bind(now)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(
            r#"
            DELETE FROM sync_warnings
            WHERE run_id = ?1
              AND id NOT IN (
                SELECT id FROM sync_warnings WHERE run_id = ?1 ORDER BY id DESC LIMIT ?2
              )
            "#,
        )
        .bind(run_id)
        .bind(max_retained as i64)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Retained warnings, oldest first.
    pub async fn list_warnings(&self, run_id: &str) -> DbResult<Vec<String>> {
        let rows: Vec<String> = sqlx::query_scalar(
            "SELECT message FROM sync_warnings WHERE run_id = ?1 ORDER BY id ASC",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Marks runs that completed before `cutoff` as archived.
    ///
    /// ## Returns
    /// Number of runs archived by this call.
    pub async fn archive_completed_before(&self, cutoff: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE sync_runs SET archived_at = ?2
            WHERE archived_at IS NULL
              AND status = ?3
              AND completed_at IS NOT NULL
              AND completed_at < ?1
            "#,
        )
        .bind(cutoff)
        .bind(Utc::now())
        .bind(SyncStatus::Completed)
        .execute(&self.pool)
        .await?;

        let archived = result.rows_affected();
        if archived > 0 {
            info!(archived, "Archived completed sync runs");
        }
        Ok(archived)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use beacon_core::classify::{classify, FailureKind};
    use beacon_core::DataType;

    async fn setup() -> SyncRunRepository {
        Database::new(DbConfig::in_memory()).await.unwrap().sync_runs()
    }

    fn error(message: &str) -> ErrorRecord {
        ErrorRecord::new(
            classify(&FailureKind::Http {
                status: 404,
                message: message.to_string(),
            }),
            message,
            Some("locations/1".to_string()),
        )
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let repo = setup().await;
        let options = RunOptions {
            data_types: vec![DataType::Reviews],
            ..RunOptions::default()
        };
        let run = repo.create("owner-1", &options).await.unwrap();

        let loaded = repo.get(&run.id).await.unwrap();
        assert_eq!(loaded.status, SyncStatus::Pending);
        assert_eq!(loaded.owner_account_id, "owner-1");
        assert_eq!(loaded.options.data_types, vec![DataType::Reviews]);
        assert!(loaded.checkpoints.is_empty());
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let repo = setup().await;
        assert!(matches!(
            repo.get("nope").await,
            Err(DbError::NotFound { .. })
        ));
        assert!(repo.find("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_checkpoint_is_appended_once() {
        let repo = setup().await;
        let run = repo.create("owner-1", &RunOptions::default()).await.unwrap();
        let cp = Checkpoint::new(DataType::Reviews, "locations/1", 150);

        assert!(repo.append_checkpoint(&run.id, &cp).await.unwrap());
        assert!(!repo.append_checkpoint(&run.id, &cp).await.unwrap());

        let checkpoints = repo.list_checkpoints(&run.id).await.unwrap();
        assert_eq!(checkpoints.len(), 1);
        assert_eq!(checkpoints[0].records_processed, 150);
    }

    #[tokio::test]
    async fn test_errors_are_bounded() {
        let repo = setup().await;
        let run = repo.create("owner-1", &RunOptions::default()).await.unwrap();

        let batch: Vec<ErrorRecord> = (0..5).map(|i| error(&format!("e{i}"))).collect();
        repo.append_errors(&run.id, &batch, 3).await.unwrap();

        let kept = repo.list_errors(&run.id).await.unwrap();
        let messages: Vec<&str> = kept.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["e2", "e3", "e4"]);
        assert_eq!(kept[0].code, "API_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_progress_never_regresses_in_store() {
        let repo = setup().await;
        let run = repo.create("owner-1", &RunOptions::default()).await.unwrap();

        let high = Progress {
            total: 4,
            completed: 3,
            percentage: 75,
        };
        let low = Progress {
            total: 8,
            completed: 3,
            percentage: 37,
        };
        repo.update_progress(&run.id, Some("reviews"), &high).await.unwrap();
        repo.update_progress(&run.id, None, &low).await.unwrap();

        let loaded = repo.get(&run.id).await.unwrap();
        assert_eq!(loaded.progress.percentage, 75);
        assert_eq!(loaded.progress.total, 8);
        assert_eq!(loaded.current_step.as_deref(), Some("reviews"));
    }

    #[tokio::test]
    async fn test_archive_completed_before() {
        let repo = setup().await;
        let done = repo.create("owner-1", &RunOptions::default()).await.unwrap();
        let active = repo.create("owner-1", &RunOptions::default()).await.unwrap();

        repo.update_status(&done.id, SyncStatus::InProgress).await.unwrap();
        repo.update_status(&done.id, SyncStatus::Completed).await.unwrap();
        repo.update_status(&active.id, SyncStatus::InProgress).await.unwrap();

        let cutoff = Utc::now() + chrono::Duration::seconds(1);
        assert_eq!(repo.archive_completed_before(cutoff).await.unwrap(), 1);
        assert_eq!(repo.archive_completed_before(cutoff).await.unwrap(), 0);

        assert!(repo.get(&done.id).await.unwrap().archived_at.is_some());
        assert!(repo.get(&active.id).await.unwrap().archived_at.is_none());
    }
}
