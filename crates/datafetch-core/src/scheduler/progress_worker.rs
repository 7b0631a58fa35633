//! Background task that persists throttled progress and forwards it to the notifier.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::notify::{ProgressEvent, ProgressNotifier};
use crate::store::TaskStore;
use crate::task_db::{TaskId, TaskPatch, TaskStatus};
use crate::transfer::ProgressUpdate;

/// Drains `rx` in order until every sender is dropped. Store errors are
/// logged; the transfer keeps going.
pub(super) async fn run_progress_worker(
    mut rx: mpsc::Receiver<ProgressUpdate>,
    store: Arc<dyn TaskStore>,
    notifier: Arc<dyn ProgressNotifier>,
    task_id: TaskId,
) {
    let mut last_percent = 0.0f64;
    let mut last_files = (0usize, 0usize);
    while let Some(update) = rx.recv().await {
        if let Some(pct) = update.progress_percent {
            last_percent = pct;
        }
        let files = (update.total_files, update.completed_files);
        // File counters move once per file; only then is the wider patch written.
        let written = if files != last_files {
            let patch = TaskPatch {
                progress_percent: Some(last_percent),
                downloaded_bytes: Some(update.downloaded_bytes as i64),
                total_bytes: update.total_bytes.map(|b| Some(b as i64)),
                total_files: Some(files.0 as i64),
                completed_files: Some(files.1 as i64),
                ..TaskPatch::default()
            };
            store.update_fields(task_id, &patch).await
        } else {
            store
                .update_progress(
                    task_id,
                    last_percent,
                    Some(update.downloaded_bytes as i64),
                    update.total_bytes.map(|b| b as i64),
                )
                .await
        };
        match written {
            Ok(()) => last_files = files,
            Err(e) => tracing::warn!(task_id, "progress update failed: {:#}", e),
        }
        notifier.publish(ProgressEvent {
            task_id,
            progress_percent: update.progress_percent,
            downloaded_bytes: update.downloaded_bytes,
            total_bytes: update.total_bytes,
            status: TaskStatus::Running,
            current_file: update.current_file,
            error_message: None,
        });
    }
}
