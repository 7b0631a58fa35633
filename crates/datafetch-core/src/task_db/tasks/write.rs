//! Task write operations: add, status, progress, patch, remove, recovery.

use anyhow::{anyhow, Result};

use super::super::db::{unix_timestamp, TaskDb};
use super::super::types::{NewTask, TaskId, TaskPatch, TaskStatus};
use super::read::{row_to_task, TASK_COLUMNS};

impl TaskDb {
    /// Insert a new Pending task.
    pub async fn add_task(&self, task: &NewTask) -> Result<TaskId> {
        let now = unix_timestamp();
        let row_id = sqlx::query(
            r#"
            INSERT INTO download_tasks (
                source_id, save_path, filename_pattern, max_retries,
                timeout_seconds, status, priority, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(task.source_id)
        .bind(&task.save_path)
        .bind(&task.filename_pattern)
        .bind(task.max_retries)
        .bind(task.timeout_seconds)
        .bind(TaskStatus::Pending.as_str())
        .bind(task.priority)
        .bind(now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(row_id)
    }

    /// Set the status. Running stamps `started_at`, terminal states stamp
    /// `completed_at`; the error message is only written when given.
    pub async fn set_status(
        &self,
        id: TaskId,
        status: TaskStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let now = unix_timestamp();
        sqlx::query(
            r#"
            UPDATE download_tasks
            SET status = ?1,
                error_message = COALESCE(?2, error_message),
                started_at = CASE WHEN ?3 THEN ?5 ELSE started_at END,
                completed_at = CASE WHEN ?4 THEN ?5 ELSE completed_at END
            WHERE id = ?6
            "#,
        )
        .bind(status.as_str())
        .bind(error_message)
        .bind(status == TaskStatus::Running)
        .bind(status.is_terminal())
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Persist a progress update. Byte counters left as None keep their stored value.
    pub async fn update_progress(
        &self,
        id: TaskId,
        progress_percent: f64,
        downloaded_bytes: Option<i64>,
        total_bytes: Option<i64>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE download_tasks
            SET progress_percent = ?1,
                downloaded_bytes = COALESCE(?2, downloaded_bytes),
                total_bytes = COALESCE(?3, total_bytes)
            WHERE id = ?4
            "#,
        )
        .bind(progress_percent.clamp(0.0, 100.0))
        .bind(downloaded_bytes)
        .bind(total_bytes)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Apply a partial update atomically (read-modify-write in one transaction).
    pub async fn update_fields(&self, id: TaskId, patch: &TaskPatch) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let sql = format!("SELECT {} FROM download_tasks WHERE id = ?1", TASK_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| anyhow!("task {} not found", id))?;
        let mut rec = row_to_task(&row);
        patch.apply(&mut rec);

        sqlx::query(
            r#"
            UPDATE download_tasks
            SET status = ?1,
                progress_percent = ?2,
                downloaded_bytes = ?3,
                total_bytes = ?4,
                error_message = ?5,
                priority = ?6,
                retries_used = ?7,
                total_files = ?8,
                completed_files = ?9,
                note = ?10,
                started_at = ?11,
                completed_at = ?12
            WHERE id = ?13
            "#,
        )
        .bind(rec.status.as_str())
        .bind(rec.progress_percent.clamp(0.0, 100.0))
        .bind(rec.downloaded_bytes)
        .bind(rec.total_bytes)
        .bind(&rec.error_message)
        .bind(rec.priority)
        .bind(rec.retries_used)
        .bind(rec.total_files)
        .bind(rec.completed_files)
        .bind(&rec.note)
        .bind(rec.started_at)
        .bind(rec.completed_at)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Delete a task. Returns false if it did not exist.
    pub async fn remove_task(&self, id: TaskId) -> Result<bool> {
        let r = sqlx::query("DELETE FROM download_tasks WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(r.rows_affected() > 0)
    }

    /// Reset tasks stranded in Queued/Running (e.g. after a crash) to Pending.
    /// Call before starting the scheduler. Returns the number of tasks reset.
    pub async fn recover_interrupted_tasks(&self) -> Result<u64> {
        let r = sqlx::query(
            r#"
            UPDATE download_tasks
            SET status = ?1
            WHERE status IN (?2, ?3)
            "#,
        )
        .bind(TaskStatus::Pending.as_str())
        .bind(TaskStatus::Queued.as_str())
        .bind(TaskStatus::Running.as_str())
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected())
    }
}
