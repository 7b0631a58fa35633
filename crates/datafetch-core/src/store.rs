//! Task store interface consumed by the scheduler and its running units.

use anyhow::Result;
use async_trait::async_trait;

use crate::task_db::{
    DataSource, NewTask, SourceId, TaskDb, TaskId, TaskPatch, TaskRecord, TaskStatus,
};

/// Persistence operations the engine needs. Every call is fallible.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn get(&self, id: TaskId) -> Result<Option<TaskRecord>>;

    async fn get_source(&self, id: SourceId) -> Result<Option<DataSource>>;

    /// Pending tasks ordered by priority, then creation.
    async fn list_pending(&self) -> Result<Vec<TaskRecord>>;

    async fn insert_task(&self, task: &NewTask) -> Result<TaskId>;

    async fn set_status(
        &self,
        id: TaskId,
        status: TaskStatus,
        error_message: Option<&str>,
    ) -> Result<()>;

    async fn update_progress(
        &self,
        id: TaskId,
        progress_percent: f64,
        downloaded_bytes: Option<i64>,
        total_bytes: Option<i64>,
    ) -> Result<()>;

    async fn update_fields(&self, id: TaskId, patch: &TaskPatch) -> Result<()>;
}

#[async_trait]
impl TaskStore for TaskDb {
    async fn get(&self, id: TaskId) -> Result<Option<TaskRecord>> {
        self.get_task(id).await
    }

    async fn get_source(&self, id: SourceId) -> Result<Option<DataSource>> {
        TaskDb::get_source(self, id).await
    }

    async fn list_pending(&self) -> Result<Vec<TaskRecord>> {
        TaskDb::list_pending(self).await
    }

    async fn insert_task(&self, task: &NewTask) -> Result<TaskId> {
        self.add_task(task).await
    }

    async fn set_status(
        &self,
        id: TaskId,
        status: TaskStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        TaskDb::set_status(self, id, status, error_message).await
    }

    async fn update_progress(
        &self,
        id: TaskId,
        progress_percent: f64,
        downloaded_bytes: Option<i64>,
        total_bytes: Option<i64>,
    ) -> Result<()> {
        TaskDb::update_progress(self, id, progress_percent, downloaded_bytes, total_bytes).await
    }

    async fn update_fields(&self, id: TaskId, patch: &TaskPatch) -> Result<()> {
        TaskDb::update_fields(self, id, patch).await
    }
}
