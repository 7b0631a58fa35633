//! DirectFetch: chunked HTTP(S) GET via reqwest.
//!
//! Directory listings are the HTML index pages served by Apache, nginx and
//! THREDDS-style file servers: every `href` that resolves to a direct child
//! file of the directory URL becomes an entry.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use regex::Regex;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::FetchConfig;
use crate::error::TransferError;
use crate::retry::classify_http_status;
use crate::task_db::DataSource;

use super::{ProgressSink, RemoteEntry, TransferDriver};

pub struct HttpDriver {
    client: reqwest::Client,
    chunk_size: usize,
    href: Regex,
}

impl HttpDriver {
    pub fn new(cfg: &FetchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(cfg.connect_timeout())
            .user_agent(concat!("datafetch/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build HTTP client")?;
        Ok(Self {
            client,
            chunk_size: cfg.chunk_size.max(1),
            href: href_regex()?,
        })
    }

    fn get(&self, source: &DataSource, url: &Url) -> reqwest::RequestBuilder {
        let req = self.client.get(url.clone());
        match &source.credentials {
            Some(c) => req.basic_auth(&c.username, c.password.as_ref()),
            None => req,
        }
    }

    /// Send the request and check the status; nothing has been written yet.
    async fn open(
        &self,
        source: &DataSource,
        url: &Url,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response, TransferError> {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
            r = self.get(source, url).send() => r
                .map_err(|e| TransferError::SourceUnreachable(format!("{}: {}", url, e)))?,
        };
        let status = response.status();
        if !status.is_success() {
            return Err(classify_http_status(status.as_u16()));
        }
        Ok(response)
    }
}

fn href_regex() -> Result<Regex> {
    Regex::new(r#"(?i)href\s*=\s*["']([^"'#?]+)["']"#).context("compile href pattern")
}

/// File entries linked from an HTML index page at `dir`.
pub(crate) fn parse_index(dir: &Url, html: &str, href: &Regex) -> Vec<RemoteEntry> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for cap in href.captures_iter(html) {
        let Ok(url) = dir.join(&cap[1]) else {
            continue;
        };
        if url.scheme() != dir.scheme()
            || url.host_str() != dir.host_str()
            || url.port_or_known_default() != dir.port_or_known_default()
        {
            continue;
        }
        let Some(rest) = url.path().strip_prefix(dir.path()) else {
            continue;
        };
        if rest.is_empty() || rest.contains('/') {
            continue;
        }
        let name = urlencoding::decode(rest)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| rest.to_string());
        if seen.insert(name.clone()) {
            out.push(RemoteEntry {
                name,
                url,
                size: None,
            });
        }
    }
    out
}

#[async_trait]
impl TransferDriver for HttpDriver {
    async fn list_directory(
        &self,
        source: &DataSource,
        dir: &Url,
        cancel: &CancellationToken,
    ) -> Result<Vec<RemoteEntry>, TransferError> {
        let response = self.open(source, dir, cancel).await?;
        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
            b = response.text() => b.map_err(|e| TransferError::Interrupted(format!("read index: {}", e)))?,
        };
        let entries = parse_index(dir, &body, &self.href);
        tracing::debug!(url = %dir, entries = entries.len(), "http index parsed");
        Ok(entries)
    }

    async fn stream_resource(
        &self,
        source: &DataSource,
        resource: &Url,
        dest: &Path,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<u64, TransferError> {
        let response = self.open(source, resource, cancel).await?;
        let expected = response.content_length();
        if let Some(len) = expected {
            progress.set_file_total(len);
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    file.flush().await?;
                    return Err(TransferError::Cancelled);
                }
                n = stream.next() => n,
            };
            let bytes = match next {
                None => break,
                Some(Ok(bytes)) => bytes,
                Some(Err(e)) => {
                    file.flush().await?;
                    return Err(TransferError::Interrupted(format!(
                        "{} after {} bytes: {}",
                        resource, written, e
                    )));
                }
            };
            for chunk in bytes.chunks(self.chunk_size) {
                if cancel.is_cancelled() {
                    file.flush().await?;
                    return Err(TransferError::Cancelled);
                }
                file.write_all(chunk).await?;
                written += chunk.len() as u64;
                progress.advance(chunk.len() as u64);
            }
        }
        file.flush().await?;

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
