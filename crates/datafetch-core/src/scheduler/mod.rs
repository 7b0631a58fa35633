//! Task scheduler: priority queue, bounded admission, lifecycle control.
//!
//! A single admission loop pops the most urgent pending task while fewer than
//! `max_concurrent` units are running, re-checks the task in the store, and
//! spawns a running unit for it. Units free their slot and wake the loop when
//! they reach a terminal state. The loop also wakes on a fixed cadence.
//!
//! The queue and the running-unit table share one `std::sync::Mutex` that is
//! never held across an await.

mod admission;
mod progress_worker;
mod queue;
mod unit;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::FetchConfig;
use crate::control::{JobControl, StopReason};
use crate::error::SchedulerError;
use crate::notify::{ProgressEvent, ProgressNotifier};
use crate::store::TaskStore;
use crate::task_db::db::unix_timestamp;
use crate::task_db::{NewTask, TaskId, TaskPatch, TaskRecord, TaskStatus};
use crate::transfer::Drivers;

use self::queue::PendingQueue;

pub const MIN_PRIORITY: i64 = 1;
pub const MAX_PRIORITY: i64 = 10;

/// Snapshot returned by [`Scheduler::queue_status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub running_tasks: usize,
    pub pending_tasks: usize,
    pub max_concurrent: usize,
    pub scheduler_running: bool,
    pub running_task_ids: Vec<TaskId>,
    pub pending_task_ids: Vec<TaskId>,
}

struct State {
    queue: PendingQueue,
    running: HashMap<TaskId, JoinHandle<()>>,
    /// Popped by the admission loop but not yet spawned; a stop request
    /// arriving in that window is parked here.
    dispatching: HashMap<TaskId, Option<StopReason>>,
    loop_running: bool,
    loop_handle: Option<JoinHandle<()>>,
    root: CancellationToken,
}

pub(crate) struct Inner {
    store: Arc<dyn TaskStore>,
    drivers: Drivers,
    notifier: Arc<dyn ProgressNotifier>,
    cfg: FetchConfig,
    max_concurrent: usize,
    state: Mutex<State>,
    wake: Notify,
    control: JobControl,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish the stored counters of a task with the given status.
    async fn publish_stored(&self, task_id: TaskId, status: TaskStatus, error: Option<String>) {
        let task = self.store.get(task_id).await.ok().flatten();
        self.notifier.publish(ProgressEvent {
            task_id,
            progress_percent: task.as_ref().map(|t| t.progress_percent),
            downloaded_bytes: task
                .as_ref()
                .map(|t| t.downloaded_bytes.max(0) as u64)
                .unwrap_or(0),
            total_bytes: task
                .as_ref()
                .and_then(|t| t.total_bytes)
                .map(|b| b.max(0) as u64),
            status,
            current_file: None,
            error_message: error,
        });
    }

    /// Terminal write for a task that never reached a running unit.
    async fn finish_unstarted(
        &self,
        task_id: TaskId,
        status: TaskStatus,
        message: &str,
    ) -> Result<(), SchedulerError> {
        let patch = TaskPatch {
            status: Some(status),
            error_message: Some(Some(message.to_string())),
            completed_at: Some(status.is_terminal().then(unix_timestamp)),
            ..TaskPatch::default()
        };
        self.store.update_fields(task_id, &patch).await?;
        self.publish_stored(task_id, status, Some(message.to_string()))
            .await;
        Ok(())
    }
}

fn check_priority(priority: i64) -> Result<(), SchedulerError> {
    if (MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
        Ok(())
    } else {
        Err(SchedulerError::InvalidPriority(priority))
    }
}

fn check_new_task(task: &NewTask) -> Result<(), SchedulerError> {
    check_priority(task.priority)?;
    if task.max_retries < 0 {
        return Err(SchedulerError::InvalidMaxRetries(task.max_retries));
    }
    if task.timeout_seconds < 1 {
        return Err(SchedulerError::InvalidTimeout(task.timeout_seconds));
    }
    Ok(())
}

/// Cheap cloneable handle; all clones drive the same queue and units.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn TaskStore>,
        drivers: Drivers,
        notifier: Arc<dyn ProgressNotifier>,
        cfg: FetchConfig,
    ) -> Self {
        let max_concurrent = cfg.max_concurrent_tasks.max(1);
        Self {
            inner: Arc::new(Inner {
                store,
                drivers,
                notifier,
                cfg,
                max_concurrent,
                state: Mutex::new(State {
                    queue: PendingQueue::new(),
                    running: HashMap::new(),
                    dispatching: HashMap::new(),
                    loop_running: false,
                    loop_handle: None,
                    root: CancellationToken::new(),
                }),
                wake: Notify::new(),
                control: JobControl::new(),
            }),
        }
    }

    async fn load(&self, task_id: TaskId) -> Result<TaskRecord, SchedulerError> {
        self.inner
            .store
            .get(task_id)
            .await?
            .ok_or(SchedulerError::TaskNotFound(task_id))
    }

    fn push(&self, task_id: TaskId, priority: i64) {
        self.inner.lock().queue.push(task_id, priority);
        self.inner.wake.notify_one();
    }

    /// Persist a new Pending task and queue it.
    pub async fn enqueue(&self, task: NewTask) -> Result<TaskId, SchedulerError> {
        check_new_task(&task)?;
        if self.inner.store.get_source(task.source_id).await?.is_none() {
            return Err(SchedulerError::SourceNotFound(task.source_id));
        }
        let task_id = self.inner.store.insert_task(&task).await?;
        tracing::info!(task_id, source_id = task.source_id, priority = task.priority, "task enqueued");
        self.push(task_id, task.priority);
        Ok(task_id)
    }

    /// Queue an existing Pending task at `priority` (persisted).
    pub async fn queue_task(&self, task_id: TaskId, priority: i64) -> Result<(), SchedulerError> {
        check_priority(priority)?;
        let task = self.load(task_id).await?;
        if task.status != TaskStatus::Pending {
            return Err(SchedulerError::InvalidState {
                task_id,
                status: task.status,
                op: "queue",
            });
        }
        if task.priority != priority {
            let patch = TaskPatch {
                priority: Some(priority),
                ..TaskPatch::default()
            };
            self.inner.store.update_fields(task_id, &patch).await?;
        }
        let mut st = self.inner.lock();
        if !st.queue.set_priority(task_id, priority) {
            st.queue.push(task_id, priority);
        }
        drop(st);
        self.inner.wake.notify_one();
        Ok(())
    }

    /// Drop a task from the pending queue. Its stored status is untouched.
    pub fn remove(&self, task_id: TaskId) -> bool {
        let removed = self.inner.lock().queue.remove(task_id);
        if removed {
            tracing::debug!(task_id, "removed from pending queue");
        }
        removed
    }

    /// Persist a new priority; reorders the task if it is still queued.
    pub async fn set_priority(&self, task_id: TaskId, priority: i64) -> Result<(), SchedulerError> {
        check_priority(priority)?;
        self.load(task_id).await?;
        let patch = TaskPatch {
            priority: Some(priority),
            ..TaskPatch::default()
        };
        self.inner.store.update_fields(task_id, &patch).await?;
        let requeued = self.inner.lock().queue.set_priority(task_id, priority);
        if requeued {
            tracing::debug!(task_id, priority, "queued task re-prioritized");
        }
        Ok(())
    }

    pub fn queue_status(&self) -> QueueStatus {
        let st = self.inner.lock();
        let mut running_task_ids: Vec<TaskId> = st.running.keys().copied().collect();
        running_task_ids.sort_unstable();
        QueueStatus {
            running_tasks: st.running.len(),
            pending_tasks: st.queue.len(),
            max_concurrent: self.inner.max_concurrent,
            scheduler_running: st.loop_running,
            running_task_ids,
            pending_task_ids: st.queue.ids(),
        }
    }

    /// Load Pending tasks from the store and start the admission loop.
    /// No-op if already running.
    pub async fn start_scheduler(&self) -> Result<(), SchedulerError> {
        if self.inner.lock().loop_running {
            return Ok(());
        }
        let pending = self.inner.store.list_pending().await?;

        let mut st = self.inner.lock();
        if st.loop_running {
            return Ok(());
        }
        for task in &pending {
            st.queue.push(task.id, task.priority);
        }
        st.root = CancellationToken::new();
        st.loop_running = true;
        let root = st.root.clone();
        st.loop_handle = Some(tokio::spawn(admission::run_loop(
            Arc::clone(&self.inner),
            root,
        )));
        tracing::info!(
            loaded = pending.len(),
            max_concurrent = self.inner.max_concurrent,
            "scheduler started"
        );
        Ok(())
    }

    /// Stop admitting, cancel every running unit and wait until each has
    /// written its terminal state.
    ///
    /// Every dispatched task (stored as Queued or Running) ends Cancelled with
    /// "scheduler stopped"; a later `start` restarts it. Tasks still waiting
    /// in the pending queue stay Pending and are loaded again by the next
    /// `start_scheduler`.
    pub async fn stop_scheduler(&self) {
        let (loop_handle, root) = {
            let mut st = self.inner.lock();
            st.loop_running = false;
            (st.loop_handle.take(), st.root.clone())
        };
        let signalled = self.inner.control.abort_all(StopReason::Shutdown);
        root.cancel();
        if let Some(handle) = loop_handle {
            if let Err(e) = handle.await {
                tracing::warn!("admission loop join: {}", e);
            }
        }

        let handles: Vec<(TaskId, JoinHandle<()>)> = self.inner.lock().running.drain().collect();
        for (task_id, handle) in handles {
            if let Err(e) = handle.await {
                tracing::warn!(task_id, "running unit join: {}", e);
            }
        }
        tracing::info!(signalled, "scheduler stopped");
    }

    /// Cancel a task: dequeue it if it has not started, signal its unit if it has.
    /// Returns false if the task was already finished.
    pub async fn cancel(&self, task_id: TaskId) -> Result<bool, SchedulerError> {
        let dequeued = {
            let mut st = self.inner.lock();
            if let Some(reason) = st.dispatching.get_mut(&task_id) {
                reason.get_or_insert(StopReason::UserCancelled);
                return Ok(true);
            }
            st.queue.remove(task_id)
        };
        if dequeued {
            self.inner
                .finish_unstarted(task_id, TaskStatus::Cancelled, "cancelled by user")
                .await?;
            tracing::info!(task_id, "queued task cancelled");
            return Ok(true);
        }
        if self.inner.control.request_abort(task_id, StopReason::UserCancelled) {
            tracing::info!(task_id, "cancellation requested");
            return Ok(true);
        }
        let task = self.load(task_id).await?;
        match task.status {
            TaskStatus::Pending | TaskStatus::Paused => {
                self.inner
                    .finish_unstarted(task_id, TaskStatus::Cancelled, "cancelled by user")
                    .await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Pause: a running unit stops through the cancellation path and ends
    /// Paused; a queued task is dequeued and marked Paused. Resuming restarts
    /// the transfer from scratch.
    pub async fn pause(&self, task_id: TaskId) -> Result<(), SchedulerError> {
        let dequeued = {
            let mut st = self.inner.lock();
            if let Some(reason) = st.dispatching.get_mut(&task_id) {
                reason.get_or_insert(StopReason::Paused);
                return Ok(());
            }
            st.queue.remove(task_id)
        };
        if dequeued {
            self.inner
                .finish_unstarted(task_id, TaskStatus::Paused, "paused by user")
                .await?;
            tracing::info!(task_id, "queued task paused");
            return Ok(());
        }
        if self.inner.control.request_abort(task_id, StopReason::Paused) {
            tracing::info!(task_id, "pause requested");
            return Ok(());
        }
        let task = self.load(task_id).await?;
        if task.status == TaskStatus::Pending {
            self.inner
                .finish_unstarted(task_id, TaskStatus::Paused, "paused by user")
                .await?;
            return Ok(());
        }
        Err(SchedulerError::InvalidState {
            task_id,
            status: task.status,
            op: "pause",
        })
    }

    /// Re-enqueue a Paused task with progress reset.
    pub async fn resume(&self, task_id: TaskId) -> Result<(), SchedulerError> {
        let task = self.load(task_id).await?;
        if task.status != TaskStatus::Paused {
            return Err(SchedulerError::InvalidState {
                task_id,
                status: task.status,
                op: "resume",
            });
        }
        self.requeue(&task, TaskPatch::reset_for_requeue()).await
    }

    /// Start or restart a task.
    ///
    /// Pending tasks are queued, Paused and Cancelled tasks restart from
    /// scratch, and Failed tasks restart only while `retries_used < max_retries`
    /// (consuming one retry).
    pub async fn start(&self, task_id: TaskId) -> Result<(), SchedulerError> {
        let task = self.load(task_id).await?;
        match task.status {
            TaskStatus::Pending => {
                self.push(task_id, task.priority);
                Ok(())
            }
            TaskStatus::Paused | TaskStatus::Cancelled => {
                self.requeue(&task, TaskPatch::reset_for_requeue()).await
            }
            TaskStatus::Failed => self.retry_failed(&task).await,
            status => Err(SchedulerError::InvalidState {
                task_id,
                status,
                op: "start",
            }),
        }
    }

    /// [`start`](Self::start) each id in order. One id failing does not stop
    /// the rest; repeated ids are handled once.
    pub async fn start_many(&self, task_ids: &[TaskId]) -> Vec<BatchOutcome<()>> {
        let mut out = Vec::new();
        for id in distinct(task_ids) {
            out.push((id, self.start(id).await));
        }
        log_batch("start", &out);
        out
    }

    pub async fn pause_many(&self, task_ids: &[TaskId]) -> Vec<BatchOutcome<()>> {
        let mut out = Vec::new();
        for id in distinct(task_ids) {
            out.push((id, self.pause(id).await));
        }
        log_batch("pause", &out);
        out
    }

    pub async fn resume_many(&self, task_ids: &[TaskId]) -> Vec<BatchOutcome<()>> {
        let mut out = Vec::new();
        for id in distinct(task_ids) {
            out.push((id, self.resume(id).await));
        }
        log_batch("resume", &out);
        out
    }

    /// `Ok(false)` entries are tasks that had already finished.
    pub async fn cancel_many(&self, task_ids: &[TaskId]) -> Vec<BatchOutcome<bool>> {
        let mut out = Vec::new();
        for id in distinct(task_ids) {
            out.push((id, self.cancel(id).await));
        }
        log_batch("cancel", &out);
        out
    }

    async fn retry_failed(&self, task: &TaskRecord) -> Result<(), SchedulerError> {
        if task.retries_used >= task.max_retries {
            return Err(SchedulerError::RetryBudgetExhausted {
                task_id: task.id,
                used: task.retries_used,
                max: task.max_retries,
            });
        }
        let patch = TaskPatch {
            retries_used: Some(task.retries_used + 1),
            ..TaskPatch::reset_for_requeue()
        };
        tracing::info!(
            task_id = task.id,
            retry = task.retries_used + 1,
            max_retries = task.max_retries,
            "re-enqueueing failed task"
        );
        self.requeue(task, patch).await
    }

    async fn requeue(&self, task: &TaskRecord, patch: TaskPatch) -> Result<(), SchedulerError> {
        self.inner.store.update_fields(task.id, &patch).await?;
        self.inner
            .publish_stored(task.id, TaskStatus::Pending, None)
            .await;
        self.push(task.id, task.priority);
        Ok(())
    }
}

/// Per-task result of a batch lifecycle call.
pub type BatchOutcome<T> = (TaskId, Result<T, SchedulerError>);

fn distinct(task_ids: &[TaskId]) -> Vec<TaskId> {
    let mut seen = std::collections::HashSet::new();
    task_ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

fn log_batch<T>(op: &str, outcomes: &[BatchOutcome<T>]) {
    let failed = outcomes.iter().filter(|(_, r)| r.is_err()).count();
    tracing::info!(op, total = outcomes.len(), failed, "batch request handled");
}
