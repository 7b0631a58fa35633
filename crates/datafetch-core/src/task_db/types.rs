//! Types stored in the task database.

use anyhow::{anyhow, Error};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Task identifier.
pub type TaskId = i64;

/// Data source identifier.
pub type SourceId = i64;

/// Lifecycle state of a task, stored as a lowercase string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Queued,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Paused => "paused",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// Completed, Failed or Cancelled.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Queued or Running: the scheduler owns the task.
    pub fn is_active(self) -> bool {
        matches!(self, TaskStatus::Queued | TaskStatus::Running)
    }
}

impl FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "queued" => Ok(TaskStatus::Queued),
            "running" => Ok(TaskStatus::Running),
            "paused" => Ok(TaskStatus::Paused),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(anyhow!("unknown task status: {}", other)),
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transfer protocol of a data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    /// Chunked HTTP(S) GET.
    DirectFetch,
    /// FTP with LIST-based directory discovery.
    LegacyListing,
    /// SFTP over SSH.
    SecureShell,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::DirectFetch => "http",
            Protocol::LegacyListing => "ftp",
            Protocol::SecureShell => "sftp",
        }
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" | "https" | "directfetch" => Ok(Protocol::DirectFetch),
            "ftp" | "legacylisting" => Ok(Protocol::LegacyListing),
            "sftp" | "ssh" | "secureshell" => Ok(Protocol::SecureShell),
            other => Err(anyhow!("unsupported protocol: {}", other)),
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: Option<String>,
}

/// Reusable remote endpoint. Tasks reference it by id.
#[derive(Debug, Clone)]
pub struct DataSource {
    pub id: SourceId,
    pub name: String,
    pub url: String,
    pub description: Option<String>,
    pub protocol: Protocol,
    pub auth_required: bool,
    pub credentials: Option<Credentials>,
    pub active: bool,
}

#[derive(Debug, Clone)]
pub struct NewDataSource {
    pub name: String,
    pub url: String,
    pub description: Option<String>,
    pub protocol: Protocol,
    pub credentials: Option<Credentials>,
}

/// Partial update of a data source. `None` leaves a field untouched;
/// `credentials: Some(None)` clears them.
#[derive(Debug, Clone, Default)]
pub struct SourcePatch {
    pub name: Option<String>,
    pub url: Option<String>,
    pub description: Option<Option<String>>,
    pub protocol: Option<Protocol>,
    pub credentials: Option<Option<Credentials>>,
}

impl SourcePatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.url.is_none()
            && self.description.is_none()
            && self.protocol.is_none()
            && self.credentials.is_none()
    }

    pub(crate) fn apply(&self, src: &mut DataSource) {
        if let Some(v) = &self.name {
            src.name = v.clone();
        }
        if let Some(v) = &self.url {
            src.url = v.clone();
        }
        if let Some(v) = &self.description {
            src.description = v.clone();
        }
        if let Some(v) = self.protocol {
            src.protocol = v;
        }
        if let Some(v) = &self.credentials {
            src.credentials = v.clone();
            src.auth_required = v.is_some();
        }
    }
}

/// Selection for [`TaskDb::list_tasks`](super::TaskDb::list_tasks). The
/// default selects every task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub source_id: Option<SourceId>,
    /// Rows to skip, newest first.
    pub offset: i64,
    pub limit: Option<i64>,
}

/// Full task row.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub id: TaskId,
    pub source_id: SourceId,
    pub save_path: String,
    pub filename_pattern: Option<String>,
    pub max_retries: i64,
    pub timeout_seconds: i64,
    pub status: TaskStatus,
    pub progress_percent: f64,
    pub total_bytes: Option<i64>,
    pub downloaded_bytes: i64,
    pub error_message: Option<String>,
    pub priority: i64,
    pub retries_used: i64,
    pub total_files: i64,
    pub completed_files: i64,
    pub note: Option<String>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

pub const DEFAULT_PRIORITY: i64 = 5;
pub const DEFAULT_MAX_RETRIES: i64 = 3;
pub const DEFAULT_TIMEOUT_SECONDS: i64 = 300;

/// Caller request for a new task. Inserted as Pending.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub source_id: SourceId,
    pub save_path: String,
    pub filename_pattern: Option<String>,
    pub max_retries: i64,
    pub timeout_seconds: i64,
    pub priority: i64,
}

impl NewTask {
    pub fn new(source_id: SourceId, save_path: impl Into<String>) -> Self {
        Self {
            source_id,
            save_path: save_path.into(),
            filename_pattern: None,
            max_retries: DEFAULT_MAX_RETRIES,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            priority: DEFAULT_PRIORITY,
        }
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.filename_pattern = Some(pattern.into());
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: i64) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_timeout(mut self, timeout_seconds: i64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }
}

/// Partial update of a task row. `None` leaves a column untouched;
/// nested options write NULL with `Some(None)`.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub status: Option<TaskStatus>,
    pub progress_percent: Option<f64>,
    pub downloaded_bytes: Option<i64>,
    pub total_bytes: Option<Option<i64>>,
    pub error_message: Option<Option<String>>,
    pub priority: Option<i64>,
    pub retries_used: Option<i64>,
    pub total_files: Option<i64>,
    pub completed_files: Option<i64>,
    pub note: Option<Option<String>>,
    pub started_at: Option<Option<i64>>,
    pub completed_at: Option<Option<i64>>,
}

impl TaskPatch {
    /// Patch that puts a task back to Pending with zeroed progress.
    pub fn reset_for_requeue() -> Self {
        Self {
            status: Some(TaskStatus::Pending),
            progress_percent: Some(0.0),
            downloaded_bytes: Some(0),
            total_bytes: Some(None),
            error_message: Some(None),
            total_files: Some(0),
            completed_files: Some(0),
            note: Some(None),
            started_at: Some(None),
            completed_at: Some(None),
            ..Self::default()
        }
    }

    pub(crate) fn apply(&self, rec: &mut TaskRecord) {
        if let Some(v) = self.status {
            rec.status = v;
        }
        if let Some(v) = self.progress_percent {
            rec.progress_percent = v;
        }
        if let Some(v) = self.downloaded_bytes {
            rec.downloaded_bytes = v;
        }
        if let Some(v) = self.total_bytes {
            rec.total_bytes = v;
        }
        if let Some(v) = &self.error_message {
            rec.error_message = v.clone();
        }
        if let Some(v) = self.priority {
            rec.priority = v;
        }
        if let Some(v) = self.retries_used {
            rec.retries_used = v;
        }
        if let Some(v) = self.total_files {
            rec.total_files = v;
        }
        if let Some(v) = self.completed_files {
            rec.completed_files = v;
        }
        if let Some(v) = &self.note {
            rec.note = v.clone();
        }
        if let Some(v) = self.started_at {
            rec.started_at = v;
        }
        if let Some(v) = self.completed_at {
            rec.completed_at = v;
        }
    }
}
