//! Protocol-polymorphic transfer drivers.
//!
//! A driver knows how to list a remote directory and stream one resource to a
//! local file. Everything shared between protocols (target resolution,
//! pattern filtering, per-file skip handling, progress accounting) lives in
//! [`execute`] and runs the same way for every driver.

pub mod blocking;
pub mod execute;
pub mod ftp;
pub mod http;
pub mod progress;
pub mod sftp;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::FetchConfig;
use crate::error::TransferError;
use crate::task_db::{DataSource, Protocol};
use crate::url_model::{self, TargetKind};

pub use blocking::{BlockingDriver, BlockingTransfer, WorkerPool};
pub use execute::{execute_transfer, TransferMode, TransferReport, TransferRequest};
pub use progress::{ProgressSink, ProgressUpdate};

/// A file entry from a directory listing. Subdirectories are never returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub url: Url,
    pub size: Option<u64>,
}

#[async_trait]
pub trait TransferDriver: Send + Sync {
    /// Whether `url` is a single resource or a listable directory.
    fn resolve_target(&self, url: &Url) -> TargetKind {
        url_model::resolve_target(url)
    }

    /// File entries directly inside `dir`.
    async fn list_directory(
        &self,
        source: &DataSource,
        dir: &Url,
        cancel: &CancellationToken,
    ) -> Result<Vec<RemoteEntry>, TransferError>;

    /// Stream `resource` into `dest`, reporting bytes to `progress` and
    /// checking `cancel` between chunks. Returns the bytes written.
    /// On error, bytes already written stay on disk.
    async fn stream_resource(
        &self,
        source: &DataSource,
        resource: &Url,
        dest: &Path,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<u64, TransferError>;
}

/// Driver per protocol.
#[derive(Clone, Default)]
pub struct Drivers {
    map: HashMap<Protocol, Arc<dyn TransferDriver>>,
}

impl Drivers {
    pub fn empty() -> Self {
        Self::default()
    }

    /// HTTP via reqwest; FTP and SFTP on a shared blocking worker pool.
    pub fn standard(cfg: &FetchConfig) -> Result<Self> {
        let pool = WorkerPool::new(cfg.blocking_workers);
        let ftp = BlockingDriver::new(ftp::FtpTransfer::new(cfg), pool.clone());
        let sftp = BlockingDriver::new(sftp::SftpTransfer::new(cfg), pool);
        Ok(Self::empty()
            .with(Protocol::DirectFetch, Arc::new(http::HttpDriver::new(cfg)?))
            .with(Protocol::LegacyListing, Arc::new(ftp))
            .with(Protocol::SecureShell, Arc::new(sftp)))
    }

    pub fn with(mut self, protocol: Protocol, driver: Arc<dyn TransferDriver>) -> Self {
        self.map.insert(protocol, driver);
        self
    }

    pub fn get(&self, protocol: Protocol) -> Option<Arc<dyn TransferDriver>> {
        self.map.get(&protocol).cloned()
    }
}
