//! Shared fixtures for scheduler integration tests: fake drivers, a store
//! that fails on demand, and polling helpers.
#![allow(dead_code)]

pub mod http_server;

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use datafetch_core::config::FetchConfig;
use datafetch_core::error::TransferError;
use datafetch_core::notify::NoopNotifier;
use datafetch_core::scheduler::Scheduler;
use datafetch_core::store::TaskStore;
use datafetch_core::task_db::{
    DataSource, NewDataSource, NewTask, Protocol, SourceId, TaskDb, TaskId, TaskPatch,
    TaskRecord, TaskStatus,
};
use datafetch_core::transfer::{Drivers, ProgressSink, RemoteEntry, TransferDriver};
use tokio_util::sync::CancellationToken;
use url::Url;

/// Fast cadence and eager progress so tests do not wait on defaults.
pub fn test_config(max_concurrent: usize) -> FetchConfig {
    FetchConfig {
        max_concurrent_tasks: max_concurrent,
        admission_interval_secs: 1,
        progress_byte_interval: 1,
        progress_interval_ms: 10,
        connect_timeout_secs: 5,
        ..FetchConfig::default()
    }
}

pub async fn add_source(db: &TaskDb, name: &str, url: &str) -> SourceId {
    db.add_source(&NewDataSource {
        name: name.to_string(),
        url: url.to_string(),
        description: None,
        protocol: Protocol::DirectFetch,
        credentials: None,
    })
    .await
    .unwrap()
}

pub fn scheduler_with(
    store: Arc<dyn TaskStore>,
    driver: Arc<dyn TransferDriver>,
    cfg: FetchConfig,
) -> Scheduler {
    let drivers = Drivers::empty().with(Protocol::DirectFetch, driver);
    Scheduler::new(store, drivers, Arc::new(NoopNotifier), cfg)
}

pub fn new_task(source_id: SourceId, dir: &Path) -> NewTask {
    NewTask::new(source_id, dir.to_string_lossy().into_owned())
}

/// Poll the store until `pred` holds; panics after 10 s.
pub async fn wait_for<F>(db: &TaskDb, task_id: TaskId, pred: F) -> TaskRecord
where
    F: Fn(&TaskRecord) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let task = db.get_task(task_id).await.unwrap().expect("task exists");
        if pred(&task) {
            return task;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("task {} stuck in {:?}", task_id, task.status);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

pub async fn wait_for_status(db: &TaskDb, task_id: TaskId, status: TaskStatus) -> TaskRecord {
    wait_for(db, task_id, |t| t.status == status).await
}

/// Poll `cond` until it holds; panics after 10 s.
pub async fn wait_until<F: Fn() -> bool>(what: &str, cond: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !cond() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Completes every resource with `body` after holding it for `hold`.
/// Records the order of invocations and the peak number running at once.
pub struct RecordingDriver {
    body: Vec<u8>,
    hold: Duration,
    calls: Mutex<Vec<String>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl RecordingDriver {
    pub fn new(body: &[u8], hold: Duration) -> Self {
        Self {
            body: body.to_vec(),
            hold,
            calls: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransferDriver for RecordingDriver {
    async fn list_directory(
        &self,
        _source: &DataSource,
        _dir: &Url,
        _cancel: &CancellationToken,
    ) -> Result<Vec<RemoteEntry>, TransferError> {
        Ok(Vec::new())
    }

    async fn stream_resource(
        &self,
        _source: &DataSource,
        resource: &Url,
        dest: &Path,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<u64, TransferError> {
        self.calls.lock().unwrap().push(resource.to_string());
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let held = tokio::select! {
            _ = cancel.cancelled() => Err(TransferError::Cancelled),
            _ = tokio::time::sleep(self.hold) => Ok(()),
        };
        self.active.fetch_sub(1, Ordering::SeqCst);
        held?;
        progress.set_file_total(self.body.len() as u64);
        tokio::fs::write(dest, &self.body).await?;
        progress.advance(self.body.len() as u64);
        Ok(self.body.len() as u64)
    }
}

/// Writes `prefix`, then blocks until cancelled.
pub struct StallDriver {
    prefix: Vec<u8>,
    total: u64,
    started: AtomicUsize,
}

impl StallDriver {
    pub fn new(prefix: &[u8], total: u64) -> Self {
        Self {
            prefix: prefix.to_vec(),
            total,
            started: AtomicUsize::new(0),
        }
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransferDriver for StallDriver {
    async fn list_directory(
        &self,
        _source: &DataSource,
        _dir: &Url,
        _cancel: &CancellationToken,
    ) -> Result<Vec<RemoteEntry>, TransferError> {
        Ok(Vec::new())
    }

    async fn stream_resource(
        &self,
        _source: &DataSource,
        _resource: &Url,
        dest: &Path,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<u64, TransferError> {
        progress.set_file_total(self.total);
        tokio::fs::write(dest, &self.prefix).await?;
        progress.advance(self.prefix.len() as u64);
        self.started.fetch_add(1, Ordering::SeqCst);
        cancel.cancelled().await;
        Err(TransferError::Cancelled)
    }
}

/// Every call fails with a non-retryable error.
pub struct FailingDriver;

#[async_trait]
impl TransferDriver for FailingDriver {
    async fn list_directory(
        &self,
        _source: &DataSource,
        _dir: &Url,
        _cancel: &CancellationToken,
    ) -> Result<Vec<RemoteEntry>, TransferError> {
        Err(TransferError::SourceUnreachable("HTTP 503".to_string()))
    }

    async fn stream_resource(
        &self,
        _source: &DataSource,
        _resource: &Url,
        _dest: &Path,
        _progress: &ProgressSink,
        _cancel: &CancellationToken,
    ) -> Result<u64, TransferError> {
        Err(TransferError::SourceUnreachable("HTTP 503".to_string()))
    }
}

/// Wraps a [`TaskDb`] and rejects the first `fail_terminal` terminal writes.
/// Source lookups can be slowed down to hold the admission loop mid-dispatch.
pub struct FlakyStore {
    db: TaskDb,
    fail_terminal: AtomicUsize,
    terminal_attempts: AtomicUsize,
    source_delay: Duration,
    source_lookups: AtomicUsize,
}

impl FlakyStore {
    pub fn new(db: TaskDb, fail_terminal: usize) -> Self {
        Self {
            db,
            fail_terminal: AtomicUsize::new(fail_terminal),
            terminal_attempts: AtomicUsize::new(0),
            source_delay: Duration::ZERO,
            source_lookups: AtomicUsize::new(0),
        }
    }

    pub fn with_source_delay(mut self, delay: Duration) -> Self {
        self.source_delay = delay;
        self
    }

    pub fn source_lookups(&self) -> usize {
        self.source_lookups.load(Ordering::SeqCst)
    }

    pub fn terminal_attempts(&self) -> usize {
        self.terminal_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskStore for FlakyStore {
    async fn get(&self, id: TaskId) -> Result<Option<TaskRecord>> {
        TaskStore::get(&self.db, id).await
    }

    async fn get_source(&self, id: SourceId) -> Result<Option<DataSource>> {
        self.source_lookups.fetch_add(1, Ordering::SeqCst);
        if !self.source_delay.is_zero() {
            tokio::time::sleep(self.source_delay).await;
        }
        TaskStore::get_source(&self.db, id).await
    }

    async fn list_pending(&self) -> Result<Vec<TaskRecord>> {
        TaskStore::list_pending(&self.db).await
    }

    async fn insert_task(&self, task: &NewTask) -> Result<TaskId> {
        TaskStore::insert_task(&self.db, task).await
    }

    async fn set_status(
        &self,
        id: TaskId,
        status: TaskStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        TaskStore::set_status(&self.db, id, status, error_message).await
    }

    async fn update_progress(
        &self,
        id: TaskId,
        progress_percent: f64,
        downloaded_bytes: Option<i64>,
        total_bytes: Option<i64>,
    ) -> Result<()> {
        TaskStore::update_progress(&self.db, id, progress_percent, downloaded_bytes, total_bytes)
            .await
    }

    async fn update_fields(&self, id: TaskId, patch: &TaskPatch) -> Result<()> {
        if patch.status.is_some_and(|s| s.is_terminal()) {
            self.terminal_attempts.fetch_add(1, Ordering::SeqCst);
            let remaining = self.fail_terminal.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_terminal.store(remaining - 1, Ordering::SeqCst);
                return Err(anyhow!("database is locked"));
            }
        }
        TaskStore::update_fields(&self.db, id, patch).await
    }
}
