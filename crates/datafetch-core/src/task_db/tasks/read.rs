//! Task read operations: get and list.

use anyhow::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::super::db::TaskDb;
use super::super::types::{TaskFilter, TaskId, TaskRecord, TaskStatus};

pub(crate) const TASK_COLUMNS: &str = "id, source_id, save_path, filename_pattern, max_retries, \
     timeout_seconds, status, progress_percent, total_bytes, downloaded_bytes, error_message, \
     priority, retries_used, total_files, completed_files, note, created_at, started_at, \
     completed_at";

pub(crate) fn row_to_task(row: &SqliteRow) -> TaskRecord {
    let status: String = row.get("status");
    // A corrupted status must never be re-admitted.
    let status = status.parse().unwrap_or(TaskStatus::Failed);
    TaskRecord {
        id: row.get("id"),
        source_id: row.get("source_id"),
        save_path: row.get("save_path"),
        filename_pattern: row.get("filename_pattern"),
        max_retries: row.get("max_retries"),
        timeout_seconds: row.get("timeout_seconds"),
        status,
        progress_percent: row.get("progress_percent"),
        total_bytes: row.get("total_bytes"),
        downloaded_bytes: row.get("downloaded_bytes"),
        error_message: row.get("error_message"),
        priority: row.get("priority"),
        retries_used: row.get("retries_used"),
        total_files: row.get("total_files"),
        completed_files: row.get("completed_files"),
        note: row.get("note"),
        created_at: row.get("created_at"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
    }
}

impl TaskDb {
    /// Fetch one task, or None if it was deleted.
    pub async fn get_task(&self, id: TaskId) -> Result<Option<TaskRecord>> {
        let sql = format!("SELECT {} FROM download_tasks WHERE id = ?1", TASK_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_task))
    }

    /// Tasks matching `filter`, newest first.
    pub async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<TaskRecord>> {
        let sql = format!(
            "SELECT {} FROM download_tasks \
             WHERE (?1 IS NULL OR status = ?1) AND (?2 IS NULL OR source_id = ?2) \
             ORDER BY created_at DESC, id DESC LIMIT ?3 OFFSET ?4",
            TASK_COLUMNS
        );
        // SQLite treats a negative LIMIT as unbounded.
        let rows = sqlx::query(&sql)
            .bind(filter.status.map(TaskStatus::as_str))
            .bind(filter.source_id)
            .bind(filter.limit.unwrap_or(-1))
            .bind(filter.offset.max(0))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_task).collect())
    }

    /// Pending tasks in admission order: priority, then creation time.
    pub async fn list_pending(&self) -> Result<Vec<TaskRecord>> {
        let sql = format!(
            "SELECT {} FROM download_tasks WHERE status = ?1 \
             ORDER BY priority ASC, created_at ASC, id ASC",
            TASK_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(TaskStatus::Pending.as_str())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_task).collect())
    }
}
