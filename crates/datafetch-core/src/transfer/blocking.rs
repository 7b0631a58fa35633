//! Blocking protocol clients behind the async driver trait.
//!
//! libcurl's easy interface and libssh2 block the calling thread. Every call
//! runs on `spawn_blocking`, gated by a semaphore so at most
//! `blocking_workers` transfers occupy blocking threads at once.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::TransferError;
use crate::task_db::DataSource;

use super::{ProgressSink, RemoteEntry, TransferDriver};

/// Synchronous counterpart of [`TransferDriver`]. Implementations poll
/// `cancel.is_cancelled()` between chunks.
pub trait BlockingTransfer: Send + Sync + 'static {
    fn list_directory(
        &self,
        source: &DataSource,
        dir: &Url,
        cancel: &CancellationToken,
    ) -> Result<Vec<RemoteEntry>, TransferError>;

    fn stream_resource(
        &self,
        source: &DataSource,
        resource: &Url,
        dest: &Path,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<u64, TransferError>;
}

/// Bounded pool of blocking worker slots.
#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Wait for a slot (or cancellation), then run `f` on a blocking thread.
    pub async fn run<F, R>(&self, cancel: &CancellationToken, f: F) -> Result<R, TransferError>
    where
        F: FnOnce() -> Result<R, TransferError> + Send + 'static,
        R: Send + 'static,
    {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
            p = Arc::clone(&self.permits).acquire_owned() => p
                .map_err(|_| TransferError::Interrupted("worker pool closed".to_string()))?,
        };
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            f()
        })
        .await
        .map_err(|e| TransferError::Interrupted(format!("blocking worker: {}", e)))?
    }
}

/// Adapts a [`BlockingTransfer`] to [`TransferDriver`].
pub struct BlockingDriver<T> {
    inner: Arc<T>,
    pool: WorkerPool,
}

impl<T: BlockingTransfer> BlockingDriver<T> {
    pub fn new(inner: T, pool: WorkerPool) -> Self {
        Self {
            inner: Arc::new(inner),
            pool,
        }
    }
}

#[async_trait]
impl<T: BlockingTransfer> TransferDriver for BlockingDriver<T> {
    async fn list_directory(
        &self,
        source: &DataSource,
        dir: &Url,
        cancel: &CancellationToken,
    ) -> Result<Vec<RemoteEntry>, TransferError> {
        let inner = Arc::clone(&self.inner);
        let source = source.clone();
        let dir = dir.clone();
        let token = cancel.clone();
        self.pool
            .run(cancel, move || inner.list_directory(&source, &dir, &token))
            .await
    }

    async fn stream_resource(
        &self,
        source: &DataSource,
        resource: &Url,
        dest: &Path,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<u64, TransferError> {
        let inner = Arc::clone(&self.inner);
        let source = source.clone();
        let resource = resource.clone();
        let dest: PathBuf = dest.to_path_buf();
        let progress = progress.clone();
        let token = cancel.clone();
        self.pool
            .run(cancel, move || {
                inner.stream_resource(&source, &resource, &dest, &progress, &token)
            })
            .await
    }
}
