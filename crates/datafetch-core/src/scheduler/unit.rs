//! One running unit: a task from Running to exactly one terminal write.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::control::StopReason;
use crate::error::{TransferError, TransferErrorKind};
use crate::notify::ProgressEvent;
use crate::pattern::FilenamePattern;
use crate::retry::{AutoRetryPolicy, RetryDecision};
use crate::task_db::db::unix_timestamp;
use crate::task_db::{DataSource, TaskId, TaskPatch, TaskRecord, TaskStatus};
use crate::transfer::{
    execute_transfer, ProgressSink, ProgressUpdate, TransferDriver, TransferReport, TransferRequest,
};
use crate::url_model::parse_source_url;

use super::progress_worker::run_progress_worker;
use super::{Inner, Scheduler};

const PROGRESS_CHANNEL: usize = 64;
const TERMINAL_WRITE_RETRY_DELAY: Duration = Duration::from_millis(200);

struct Outcome {
    status: TaskStatus,
    error: Option<String>,
    kind: Option<TransferErrorKind>,
    report: Option<TransferReport>,
}

fn build_request(
    inner: &Inner,
    task: &TaskRecord,
    source: DataSource,
) -> Result<TransferRequest, TransferError> {
    let target = parse_source_url(&source.url)?;
    let glob = task
        .filename_pattern
        .as_deref()
        .filter(|p| !p.trim().is_empty())
        .unwrap_or(&inner.cfg.default_filename_pattern);
    Ok(TransferRequest {
        task_id: task.id,
        source,
        target,
        save_path: PathBuf::from(&task.save_path),
        pattern: FilenamePattern::new(glob)?,
    })
}

fn settle_outcome(
    result: Result<TransferReport, TransferError>,
    reason: Option<StopReason>,
    timeout_secs: u64,
) -> Outcome {
    match result {
        Ok(report) => Outcome {
            status: TaskStatus::Completed,
            error: None,
            kind: None,
            report: Some(report),
        },
        Err(e) if e.is_cancelled() => {
            let (status, error) = match reason {
                Some(StopReason::Paused) => (TaskStatus::Paused, "paused by user".to_string()),
                Some(StopReason::Timeout) => {
                    (TaskStatus::Failed, TransferError::Timeout(timeout_secs).to_string())
                }
                Some(StopReason::Shutdown) => (TaskStatus::Cancelled, "scheduler stopped".to_string()),
                Some(StopReason::UserCancelled) | None => {
                    (TaskStatus::Cancelled, "cancelled by user".to_string())
                }
            };
            let kind = match reason {
                Some(StopReason::Timeout) => TransferErrorKind::Timeout,
                _ => TransferErrorKind::Cancelled,
            };
            Outcome {
                status,
                error: Some(error),
                kind: Some(kind),
                report: None,
            }
        }
        Err(e) => Outcome {
            status: TaskStatus::Failed,
            error: Some(e.to_string()),
            kind: Some(e.kind()),
            report: None,
        },
    }
}

fn terminal_patch(outcome: &Outcome, snapshot: &ProgressUpdate, last_percent: f64) -> TaskPatch {
    let downloaded = snapshot.downloaded_bytes as i64;
    let total = snapshot
        .total_bytes
        .map(|t| (t as i64).max(downloaded));
    let mut patch = TaskPatch {
        status: Some(outcome.status),
        downloaded_bytes: Some(downloaded),
        error_message: Some(outcome.error.clone()),
        completed_at: Some(outcome.status.is_terminal().then(unix_timestamp)),
        ..TaskPatch::default()
    };
    match &outcome.report {
        Some(report) => {
            patch.progress_percent = Some(100.0);
            patch.total_bytes = Some(Some(total.unwrap_or(downloaded)));
            patch.total_files = Some(report.listed_files as i64);
            patch.completed_files = Some(report.completed_files as i64);
            patch.note = Some(report.note());
        }
        None => {
            patch.progress_percent = Some(snapshot.progress_percent.unwrap_or(last_percent));
            if total.is_some() {
                patch.total_bytes = Some(total);
            }
            patch.total_files = Some(snapshot.total_files as i64);
            patch.completed_files = Some(snapshot.completed_files as i64);
        }
    }
    patch
}

pub(super) async fn run_unit(
    inner: Arc<Inner>,
    task: TaskRecord,
    source: DataSource,
    driver: Arc<dyn TransferDriver>,
    cancel: CancellationToken,
) {
    let task_id = task.id;
    let source_id = source.id;

    if let Err(e) = inner.store.set_status(task_id, TaskStatus::Running, None).await {
        tracing::warn!(task_id, "mark running failed: {:#}", e);
    }
    inner.notifier.publish(ProgressEvent {
        task_id,
        progress_percent: Some(0.0),
        downloaded_bytes: 0,
        total_bytes: None,
        status: TaskStatus::Running,
        current_file: None,
        error_message: None,
    });
    tracing::info!(task_id, source_id, url = %source.url, "transfer started");

    let (tx, rx) = mpsc::channel(PROGRESS_CHANNEL);
    let sink = ProgressSink::from_config(tx, &inner.cfg);
    let worker = tokio::spawn(run_progress_worker(
        rx,
        Arc::clone(&inner.store),
        Arc::clone(&inner.notifier),
        task_id,
    ));

    let timeout_secs = task.timeout_seconds.max(1) as u64;
    let result = match build_request(&inner, &task, source) {
        Ok(req) => {
            let run = execute_transfer(driver.as_ref(), &req, &sink, &cancel);
            tokio::pin!(run);
            tokio::select! {
                r = &mut run => r,
                _ = tokio::time::sleep(Duration::from_secs(timeout_secs)) => {
                    tracing::warn!(task_id, timeout_secs, "task timed out, cancelling");
                    inner.control.request_abort(task_id, StopReason::Timeout);
                    run.await
                }
            }
        }
        Err(e) => Err(e),
    };

    let snapshot = sink.snapshot();
    drop(sink);
    let last_percent = task.progress_percent;
    if let Err(e) = worker.await {
        tracing::warn!(task_id, "progress worker join: {}", e);
    }

    let reason = inner.control.unregister(task_id);
    let outcome = settle_outcome(result, reason, timeout_secs);
    let patch = terminal_patch(&outcome, &snapshot, last_percent);

    if let Err(first) = inner.store.update_fields(task_id, &patch).await {
        tracing::warn!(task_id, "terminal write failed, retrying once: {:#}", first);
        tokio::time::sleep(TERMINAL_WRITE_RETRY_DELAY).await;
        if let Err(e) = inner.store.update_fields(task_id, &patch).await {
            tracing::error!(task_id, status = %outcome.status, "terminal write failed: {:#}", e);
        }
    }

    inner.notifier.publish(ProgressEvent {
        task_id,
        progress_percent: patch.progress_percent,
        downloaded_bytes: snapshot.downloaded_bytes,
        total_bytes: patch.total_bytes.flatten().map(|b| b as u64),
        status: outcome.status,
        current_file: None,
        error_message: outcome.error.clone(),
    });

    match (&outcome.report, &outcome.error) {
        (Some(report), _) => tracing::info!(
            task_id,
            files = report.completed_files,
            skipped = report.skipped.len(),
            bytes = report.bytes,
            "transfer completed"
        ),
        (None, Some(error)) => {
            tracing::info!(task_id, status = %outcome.status, error = %error, "transfer ended")
        }
        (None, None) => {}
    }

    {
        let mut st = inner.lock();
        st.running.remove(&task_id);
    }
    inner.wake.notify_one();

    if outcome.status == TaskStatus::Failed {
        if let Some(kind) = outcome.kind {
            schedule_auto_retry(&inner, &task, kind);
        }
    }
}

/// Opt-in: re-admit a failed task after backoff if its error kind is retryable.
fn schedule_auto_retry(inner: &Arc<Inner>, task: &TaskRecord, kind: TransferErrorKind) {
    let Some(cfg) = inner.cfg.auto_retry_enabled() else {
        return;
    };
    let policy = AutoRetryPolicy::from_config(cfg);
    let RetryDecision::RetryAfter(delay) = policy.decide(task.retries_used, task.max_retries, kind)
    else {
        return;
    };
    let task_id = task.id;
    let shutdown = inner.lock().root.clone();
    let scheduler = Scheduler {
        inner: Arc::clone(inner),
    };
    tracing::info!(task_id, delay_ms = delay.as_millis() as u64, "auto-retry scheduled");
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
        if let Err(e) = auto_retry(&scheduler, task_id).await {
            tracing::warn!(task_id, "auto-retry skipped: {}", e);
        }
    });
}

async fn auto_retry(scheduler: &Scheduler, task_id: TaskId) -> Result<(), crate::error::SchedulerError> {
    let task = scheduler.load(task_id).await?;
    // A caller may have restarted or removed it meanwhile.
    if task.status != TaskStatus::Failed {
        return Ok(());
    }
    scheduler.retry_failed(&task).await
}
