//! One driver invocation for one task: single resource or filtered directory.

use std::collections::HashSet;
use std::path::PathBuf;

use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::TransferError;
use crate::pattern::FilenamePattern;
use crate::task_db::{DataSource, TaskId};
use crate::url_model::{directory_url, local_filename, sanitize_filename, TargetKind};

use super::{ProgressSink, RemoteEntry, TransferDriver};

/// Everything a running unit hands to [`execute_transfer`].
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub task_id: TaskId,
    pub source: DataSource,
    pub target: Url,
    pub save_path: PathBuf,
    pub pattern: FilenamePattern,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    Single,
    Directory,
}

/// Outcome of a successful invocation.
#[derive(Debug, Clone)]
pub struct TransferReport {
    pub mode: TransferMode,
    /// File entries returned by the listing (1 in single mode).
    pub listed_files: usize,
    pub matched_files: usize,
    pub completed_files: usize,
    /// `name: error` for each matched file that failed.
    pub skipped: Vec<String>,
    pub bytes: u64,
}

impl TransferReport {
    /// Completion note for partial directory downloads.
    pub fn note(&self) -> Option<String> {
        if self.skipped.is_empty() {
            return None;
        }
        Some(format!(
            "{} of {} matching files skipped: {}",
            self.skipped.len(),
            self.matched_files,
            self.skipped.join("; ")
        ))
    }
}

/// Cancellation wins over whatever error the driver surfaced while unwinding.
fn settle(err: TransferError, cancel: &CancellationToken) -> TransferError {
    if cancel.is_cancelled() {
        TransferError::Cancelled
    } else {
        err
    }
}

/// Run one task against `driver`. Never retries; the first fatal error is returned.
pub async fn execute_transfer(
    driver: &dyn TransferDriver,
    req: &TransferRequest,
    sink: &ProgressSink,
    cancel: &CancellationToken,
) -> Result<TransferReport, TransferError> {
    if cancel.is_cancelled() {
        return Err(TransferError::Cancelled);
    }
    match driver.resolve_target(&req.target) {
        TargetKind::SingleResource => single(driver, req, sink, cancel).await,
        TargetKind::Directory => directory(driver, req, sink, cancel).await,
    }
}

async fn single(
    driver: &dyn TransferDriver,
    req: &TransferRequest,
    sink: &ProgressSink,
    cancel: &CancellationToken,
) -> Result<TransferReport, TransferError> {
    tokio::fs::create_dir_all(&req.save_path).await?;
    let name = local_filename(&req.target);
    let dest = req.save_path.join(&name);
    tracing::debug!(task_id = req.task_id, url = %req.target, dest = %dest.display(), "single resource");

    sink.begin_file(&name, None);
    let bytes = driver
        .stream_resource(&req.source, &req.target, &dest, sink, cancel)
        .await
        .map_err(|e| settle(e, cancel))?;
    sink.finish_file(true);

    Ok(TransferReport {
        mode: TransferMode::Single,
        listed_files: 1,
        matched_files: 1,
        completed_files: 1,
        skipped: Vec::new(),
        bytes,
    })
}

async fn directory(
    driver: &dyn TransferDriver,
    req: &TransferRequest,
    sink: &ProgressSink,
    cancel: &CancellationToken,
) -> Result<TransferReport, TransferError> {
    let dir = directory_url(&req.target);
    let entries = driver
        .list_directory(&req.source, &dir, cancel)
        .await
        .map_err(|e| settle(e, cancel))?;
    let listed = entries.len();
    sink.record_listing(listed);
    let matched: Vec<RemoteEntry> = entries
        .into_iter()
        .filter(|e| req.pattern.matches(&e.name))
        .collect();
    tracing::info!(
        task_id = req.task_id,
        url = %dir,
        listed,
        matched = matched.len(),
        pattern = req.pattern.glob(),
        "directory listed"
    );
    if matched.is_empty() {
        return Err(TransferError::PatternMatchEmpty {
            pattern: req.pattern.glob().to_string(),
            listed,
        });
    }

    tokio::fs::create_dir_all(&req.save_path).await?;
    let known_total = matched.iter().map(|e| e.size).sum::<Option<u64>>();
    sink.begin_directory(matched.len(), known_total);

    let mut completed = 0usize;
    let mut bytes = 0u64;
    let mut skipped = Vec::new();
    let mut claimed: HashSet<String> = HashSet::new();
    for entry in &matched {
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        let local = sanitize_filename(&entry.name);
        if local.is_empty() {
            tracing::warn!(task_id = req.task_id, file = %entry.name, "skipping entry with unusable name");
            skipped.push(format!("{}: unusable local name", entry.name));
            sink.finish_file(false);
            continue;
        }
        // First entry wins a local name; later ones would overwrite it.
        if !claimed.insert(local.clone()) {
            tracing::warn!(task_id = req.task_id, file = %entry.name, local = %local, "local name already taken, skipping");
            skipped.push(format!("{}: local name {} already used", entry.name, local));
            sink.finish_file(false);
            continue;
        }
        sink.begin_file(&local, entry.size);
        let dest = req.save_path.join(&local);
        let transferred = match driver
            .stream_resource(&req.source, &entry.url, &dest, sink, cancel)
            .await
        {
            Ok(n) => {
                completed += 1;
                bytes += n;
                tracing::debug!(task_id = req.task_id, file = %local, bytes = n, "file transferred");
                true
            }
            Err(e) => {
                let e = settle(e, cancel);
                if e.is_cancelled() {
                    return Err(e);
                }
                tracing::warn!(task_id = req.task_id, file = %entry.name, error = %e, "file failed, skipping");
                skipped.push(format!("{}: {}", entry.name, e));
                false
            }
        };
        sink.finish_file(transferred);
    }

    if completed == 0 {
        return Err(TransferError::Interrupted(format!(
            "all {} matching files failed: {}",
            matched.len(),
            skipped.join("; ")
        )));
    }

    Ok(TransferReport {
        mode: TransferMode::Directory,
        listed_files: listed,
        matched_files: matched.len(),
        completed_files: completed,
        skipped,
        bytes,
    })
}
