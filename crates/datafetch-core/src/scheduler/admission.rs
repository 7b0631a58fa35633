//! Admission loop: drains the pending queue into running units.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::control::StopReason;
use crate::task_db::{DataSource, TaskId, TaskRecord, TaskStatus};
use crate::transfer::TransferDriver;

use super::{unit, Inner};

enum Prepared {
    Ready(TaskRecord, DataSource, Arc<dyn TransferDriver>),
    /// Not dispatchable (deleted, no longer Pending, or failed at dispatch).
    Skip,
    /// Store unavailable: put the task back and wait for the next round.
    Defer,
}

pub(super) async fn run_loop(inner: Arc<Inner>, shutdown: CancellationToken) {
    let cadence = inner.cfg.admission_interval();
    loop {
        admit(&inner).await;
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = inner.wake.notified() => {}
            _ = tokio::time::sleep(cadence) => {}
        }
    }
    tracing::debug!("admission loop exited");
}

/// Admit tasks while slots are free. Only this loop adds running units, so a
/// slot counted free here stays free until the unit is spawned.
async fn admit(inner: &Arc<Inner>) {
    loop {
        let task_id = {
            let mut st = inner.lock();
            if !st.loop_running || st.running.len() >= inner.max_concurrent {
                return;
            }
            let Some(task_id) = st.queue.pop() else {
                return;
            };
            st.dispatching.insert(task_id, None);
            task_id
        };

        match prepare(inner, task_id).await {
            Prepared::Ready(task, source, driver) => spawn_unit(inner, task, source, driver).await,
            Prepared::Skip => {
                inner.lock().dispatching.remove(&task_id);
            }
            Prepared::Defer => {
                let priority = inner
                    .store
                    .get(task_id)
                    .await
                    .ok()
                    .flatten()
                    .map(|t| t.priority)
                    .unwrap_or(super::MAX_PRIORITY);
                let mut st = inner.lock();
                st.dispatching.remove(&task_id);
                st.queue.push(task_id, priority);
                return;
            }
        }
    }
}

/// Re-verify the task and resolve its source and driver; mark it Queued.
async fn prepare(inner: &Arc<Inner>, task_id: TaskId) -> Prepared {
    let task = match inner.store.get(task_id).await {
        Ok(Some(task)) => task,
        Ok(None) => {
            tracing::debug!(task_id, "task deleted before dispatch");
            return Prepared::Skip;
        }
        Err(e) => {
            tracing::warn!(task_id, "task lookup failed, deferring: {:#}", e);
            return Prepared::Defer;
        }
    };
    if task.status != TaskStatus::Pending {
        tracing::debug!(task_id, status = %task.status, "task no longer pending, skipping");
        return Prepared::Skip;
    }

    let source = match inner.store.get_source(task.source_id).await {
        Ok(Some(source)) if source.active => source,
        Ok(Some(source)) => {
            return dispatch_failed(inner, task_id, format!("data source '{}' is inactive", source.name)).await
        }
        Ok(None) => {
            return dispatch_failed(inner, task_id, format!("data source {} not found", task.source_id)).await
        }
        Err(e) => {
            tracing::warn!(task_id, "source lookup failed, deferring: {:#}", e);
            return Prepared::Defer;
        }
    };
    let Some(driver) = inner.drivers.get(source.protocol) else {
        return dispatch_failed(
            inner,
            task_id,
            format!("no transfer driver for protocol {}", source.protocol),
        )
        .await;
    };

    if let Err(e) = inner.store.set_status(task_id, TaskStatus::Queued, None).await {
        tracing::warn!(task_id, "mark queued failed, deferring: {:#}", e);
        return Prepared::Defer;
    }
    Prepared::Ready(task, source, driver)
}

async fn dispatch_failed(inner: &Arc<Inner>, task_id: TaskId, message: String) -> Prepared {
    tracing::warn!(task_id, "dispatch failed: {}", message);
    if let Err(e) = inner
        .finish_unstarted(task_id, TaskStatus::Failed, &message)
        .await
    {
        tracing::error!(task_id, "recording dispatch failure: {}", e);
    }
    Prepared::Skip
}

async fn spawn_unit(
    inner: &Arc<Inner>,
    task: TaskRecord,
    source: DataSource,
    driver: Arc<dyn TransferDriver>,
) {
    let task_id = task.id;
    let stopped = {
        let mut st = inner.lock();
        let parked = st.dispatching.remove(&task_id).flatten();
        match parked {
            Some(reason) => Some(reason),
            // Already dispatched (stored as Queued): ends like a running unit
            // caught by shutdown, not back in the pending queue.
            None if !st.loop_running => Some(StopReason::Shutdown),
            None => {
                let token = inner.control.register(task_id, &st.root);
                let span = tracing::info_span!("unit", task_id, source_id = source.id);
                let handle = tokio::spawn(
                    unit::run_unit(Arc::clone(inner), task.clone(), source, driver, token)
                        .instrument(span),
                );
                st.running.insert(task_id, handle);
                None
            }
        }
    };

    let Some(reason) = stopped else {
        return;
    };
    let (status, message) = match reason {
        StopReason::Shutdown => (TaskStatus::Cancelled, "scheduler stopped"),
        StopReason::Paused => (TaskStatus::Paused, "paused by user"),
        StopReason::UserCancelled | StopReason::Timeout => {
            (TaskStatus::Cancelled, "cancelled by user")
        }
    };
    if let Err(e) = inner.finish_unstarted(task_id, status, message).await {
        tracing::error!(task_id, "recording stop before start: {}", e);
    }
}
