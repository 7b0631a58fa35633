//! Error types: transfer failures (driver side) and caller-facing scheduler errors.

use thiserror::Error;

use crate::task_db::{SourceId, TaskId, TaskStatus};

/// Failure of one driver invocation. Never escapes the admission loop;
/// the running unit maps it to a terminal status.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Connection, DNS, auth or HTTP status failure before any bytes arrived.
    #[error("source unreachable: {0}")]
    SourceUnreachable(String),
    /// Stream broke after the transfer had started. Partial bytes stay on disk.
    #[error("transfer interrupted: {0}")]
    Interrupted(String),
    /// Directory listing had no entry matching the filename pattern.
    #[error("no files matching '{pattern}' among {listed} listed entries")]
    PatternMatchEmpty { pattern: String, listed: usize },
    /// The unit's cancellation token fired.
    #[error("transfer cancelled")]
    Cancelled,
    /// Aggregate task timeout expired.
    #[error("timed out after {0}s")]
    Timeout(u64),
    /// URL or source configuration the driver cannot work with.
    #[error("invalid source: {0}")]
    InvalidSource(String),
    /// Local disk failure.
    #[error("local I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// Discriminant of [`TransferError`], used for retry decisions and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferErrorKind {
    SourceUnreachable,
    Interrupted,
    PatternMatchEmpty,
    Cancelled,
    Timeout,
    InvalidSource,
    Io,
}

impl TransferError {
    pub fn kind(&self) -> TransferErrorKind {
        match self {
            TransferError::SourceUnreachable(_) => TransferErrorKind::SourceUnreachable,
            TransferError::Interrupted(_) => TransferErrorKind::Interrupted,
            TransferError::PatternMatchEmpty { .. } => TransferErrorKind::PatternMatchEmpty,
            TransferError::Cancelled => TransferErrorKind::Cancelled,
            TransferError::Timeout(_) => TransferErrorKind::Timeout,
            TransferError::InvalidSource(_) => TransferErrorKind::InvalidSource,
            TransferError::Io(_) => TransferErrorKind::Io,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransferError::Cancelled)
    }
}

/// Errors returned to callers of the scheduler API.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("task {0} not found")]
    TaskNotFound(TaskId),
    #[error("priority {0} out of range (1..=10)")]
    InvalidPriority(i64),
    #[error("max retries must not be negative (got {0})")]
    InvalidMaxRetries(i64),
    #[error("timeout must be at least 1 second (got {0})")]
    InvalidTimeout(i64),
    #[error("task {task_id} is {status}; cannot {op}")]
    InvalidState {
        task_id: TaskId,
        status: TaskStatus,
        op: &'static str,
    },
    #[error("task {task_id} used {used} of {max} retries")]
    RetryBudgetExhausted { task_id: TaskId, used: i64, max: i64 },
    #[error("data source {0} not found")]
    SourceNotFound(SourceId),
    #[error("task store: {0:#}")]
    Store(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        assert_eq!(
            TransferError::Timeout(30).kind(),
            TransferErrorKind::Timeout
        );
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        assert_eq!(TransferError::from(io).kind(), TransferErrorKind::Io);
        assert!(TransferError::Cancelled.is_cancelled());
    }

    #[test]
    fn messages_are_human_readable() {
        let e = TransferError::PatternMatchEmpty {
            pattern: "*.nc".to_string(),
            listed: 4,
        };
        assert_eq!(e.to_string(), "no files matching '*.nc' among 4 listed entries");
        let e = SchedulerError::InvalidState {
            task_id: 7,
            status: TaskStatus::Running,
            op: "resume",
        };
        assert_eq!(e.to_string(), "task 7 is running; cannot resume");
    }
}
