//! SecureShell: SFTP via libssh2 (blocking; runs on the worker pool).
//!
//! A fresh session is opened per call. Password auth is used when the source
//! carries a password, the SSH agent otherwise. The session timeout bounds
//! every blocking read, so cancellation is observed within one chunk or one
//! timeout period.

use std::fs::File;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use ssh2::{Session, Sftp};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::FetchConfig;
use crate::error::TransferError;
use crate::retry::classify_ssh_error;
use crate::task_db::DataSource;
use crate::url_model::join_entry;

use super::{BlockingTransfer, ProgressSink, RemoteEntry};

const DEFAULT_PORT: u16 = 22;

pub struct SftpTransfer {
    connect_timeout: Duration,
    chunk_size: usize,
}

struct Connection {
    _session: Session,
    sftp: Sftp,
}

fn remote_path(url: &Url) -> PathBuf {
    let decoded = urlencoding::decode(url.path())
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| url.path().to_string());
    PathBuf::from(decoded)
}

impl SftpTransfer {
    pub fn new(cfg: &FetchConfig) -> Self {
        Self {
            connect_timeout: cfg.connect_timeout(),
            chunk_size: cfg.chunk_size.max(1),
        }
    }

    fn connect(&self, source: &DataSource, url: &Url) -> Result<Connection, TransferError> {
        let host = url
            .host_str()
            .ok_or_else(|| TransferError::InvalidSource(format!("{}: missing host", url)))?;
        let port = url.port().unwrap_or(DEFAULT_PORT);
        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|e| TransferError::SourceUnreachable(format!("resolve {}: {}", host, e)))?
            .next()
            .ok_or_else(|| TransferError::SourceUnreachable(format!("resolve {}: no address", host)))?;
        let tcp = TcpStream::connect_timeout(&addr, self.connect_timeout)
            .map_err(|e| TransferError::SourceUnreachable(format!("connect {}: {}", addr, e)))?;

        let mut session = Session::new().map_err(|e| classify_ssh_error(&e, false))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(self.connect_timeout.as_millis().min(u32::MAX as u128) as u32);
        session.handshake().map_err(|e| classify_ssh_error(&e, false))?;

        let username = match &source.credentials {
            Some(c) => c.username.clone(),
            None if !url.username().is_empty() => url.username().to_string(),
            None => {
                return Err(TransferError::InvalidSource(
                    "SFTP source has no username".to_string(),
                ))
            }
        };
        let password = source.credentials.as_ref().and_then(|c| c.password.as_deref());
        match password {
            Some(p) => session.userauth_password(&username, p),
            None => session.userauth_agent(&username),
        }
        .map_err(|e| classify_ssh_error(&e, false))?;
        if !session.authenticated() {
            return Err(TransferError::SourceUnreachable(format!(
                "authentication failed for {}@{}",
                username, host
            )));
        }

        let sftp = session.sftp().map_err(|e| classify_ssh_error(&e, false))?;
        Ok(Connection {
            _session: session,
            sftp,
        })
    }
}

impl BlockingTransfer for SftpTransfer {
    fn list_directory(
        &self,
        source: &DataSource,
        dir: &Url,
        cancel: &CancellationToken,
    ) -> Result<Vec<RemoteEntry>, TransferError> {
        let conn = self.connect(source, dir)?;
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        let listing = conn
            .sftp
            .readdir(&remote_path(dir))
            .map_err(|e| classify_ssh_error(&e, false))?;

        let mut entries = Vec::new();
        for (path, stat) in listing {
            if !stat.is_file() {
                continue;
            }
            let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            match join_entry(dir, &name) {
                Ok(url) => entries.push(RemoteEntry {
                    name,
                    url,
                    size: stat.size,
                }),
                Err(e) => tracing::debug!(entry = %name, error = %e, "unusable sftp entry"),
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        tracing::debug!(url = %dir, entries = entries.len(), "sftp listing read");
        Ok(entries)
    }

    fn stream_resource(
        &self,
        source: &DataSource,
        resource: &Url,
        dest: &Path,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<u64, TransferError> {
        let conn = self.connect(source, resource)?;
        let path = remote_path(resource);
        let expected = conn
            .sftp
            .stat(&path)
            .map_err(|e| classify_ssh_error(&e, false))?
            .size;
        if let Some(len) = expected {
            progress.set_file_total(len);
        }
        let mut remote = conn
            .sftp
            .open(&path)
            .map_err(|e| classify_ssh_error(&e, false))?;

        let mut file = File::create(dest)?;
        let mut buf = vec![0u8; self.chunk_size];
        let mut written = 0u64;
        loop {
            if cancel.is_cancelled() {
                file.flush()?;
                return Err(TransferError::Cancelled);
            }
            let n = match remote.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    file.flush()?;
                    if cancel.is_cancelled() {
                        return Err(TransferError::Cancelled);
                    }
                    return Err(TransferError::Interrupted(format!(
                        "{} after {} bytes: {}",
                        resource, written, e
                    )));
                }
            };
            file.write_all(&buf[..n])?;
            written += n as u64;
            progress.advance(n as u64);
        }
        file.flush()?;

        if let Some(len) = expected {
            if written < len {
                return Err(TransferError::Interrupted(format!(
                    "{}: expected {} bytes, got {}",
                    resource, len, written
                )));
            }
        }
        Ok(written)
    }
}
