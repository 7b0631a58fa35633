//! LegacyListing: FTP via libcurl's easy interface (blocking; runs on the worker pool).
//!
//! Directory discovery parses `LIST` output in the Unix `ls -l` and DOS/IIS
//! formats. Cancellation is observed from curl's progress callback, which
//! fires roughly once a second even when the server stalls, and from the
//! write callback between chunks.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;

use curl::easy::Easy;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::FetchConfig;
use crate::error::TransferError;
use crate::retry::classify_curl_error;
use crate::task_db::DataSource;
use crate::url_model::join_entry;

use super::{BlockingTransfer, ProgressSink, RemoteEntry};

pub struct FtpTransfer {
    connect_timeout: Duration,
    buffer_size: usize,
}

fn setopt(e: curl::Error) -> TransferError {
    TransferError::InvalidSource(format!("curl option: {}", e))
}

impl FtpTransfer {
    pub fn new(cfg: &FetchConfig) -> Self {
        Self {
            connect_timeout: cfg.connect_timeout(),
            buffer_size: cfg.chunk_size.max(1024),
        }
    }

    fn easy_for(&self, source: &DataSource, url: &Url) -> Result<Easy, TransferError> {
        let mut easy = Easy::new();
        easy.url(url.as_str())
            .map_err(|e| TransferError::InvalidSource(format!("{}: {}", url, e)))?;
        easy.connect_timeout(self.connect_timeout).map_err(setopt)?;
        easy.buffer_size(self.buffer_size).map_err(setopt)?;
        easy.progress(true).map_err(setopt)?;
        if let Some(c) = &source.credentials {
            easy.username(&c.username).map_err(setopt)?;
            if let Some(p) = &c.password {
                easy.password(p).map_err(setopt)?;
            }
        }
        Ok(easy)
    }

    /// Remote size via SIZE; None when the server does not report it.
    fn probe_size(
        &self,
        source: &DataSource,
        url: &Url,
        cancel: &CancellationToken,
    ) -> Result<Option<u64>, TransferError> {
        let mut easy = self.easy_for(source, url)?;
        easy.nobody(true).map_err(setopt)?;
        let result = {
            let mut transfer = easy.transfer();
            transfer
                .progress_function(|_, _, _, _| !cancel.is_cancelled())
                .map_err(setopt)?;
            transfer.perform()
        };
        if let Err(e) = result {
            if cancel.is_cancelled() {
                return Err(TransferError::Cancelled);
            }
            return Err(classify_curl_error(&e, false));
        }
        let len = easy.content_length_download().unwrap_or(-1.0);
        Ok((len >= 0.0).then_some(len as u64))
    }
}

impl BlockingTransfer for FtpTransfer {
    fn list_directory(
        &self,
        source: &DataSource,
        dir: &Url,
        cancel: &CancellationToken,
    ) -> Result<Vec<RemoteEntry>, TransferError> {
        let mut easy = self.easy_for(source, dir)?;
        let mut listing = Vec::new();
        let result = {
            let mut transfer = easy.transfer();
            transfer
                .write_function(|data| {
                    listing.extend_from_slice(data);
                    Ok(data.len())
                })
                .map_err(setopt)?;
            transfer
                .progress_function(|_, _, _, _| !cancel.is_cancelled())
                .map_err(setopt)?;
            transfer.perform()
        };
        if let Err(e) = result {
            if cancel.is_cancelled() {
                return Err(TransferError::Cancelled);
            }
            return Err(classify_curl_error(&e, false));
        }

        let text = String::from_utf8_lossy(&listing);
        let mut entries = Vec::new();
        for (name, size) in text.lines().filter_map(parse_list_line) {
            match join_entry(dir, &name) {
                Ok(url) => entries.push(RemoteEntry { name, url, size }),
                Err(e) => tracing::debug!(entry = %name, error = %e, "unusable LIST entry"),
            }
        }
        tracing::debug!(url = %dir, entries = entries.len(), "ftp listing parsed");
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
        let expected = self.probe_size(source, resource, cancel)?;
        if let Some(len) = expected {
            progress.set_file_total(len);
        }

        let mut file = File::create(dest)?;
        let mut easy = self.easy_for(source, resource)?;
        let mut written = 0u64;
        let mut write_err: Option<io::Error> = None;
        let result = {
            let mut transfer = easy.transfer();
            transfer
                .write_function(|data| {
                    if cancel.is_cancelled() {
                        return Ok(0); // abort transfer
                    }
                    match file.write_all(data) {
                        Ok(()) => {
                            written += data.len() as u64;
                            progress.advance(data.len() as u64);
                            Ok(data.len())
                        }
                        Err(e) => {
                            write_err = Some(e);
                            Ok(0)
                        }
                    }
                })
                .map_err(setopt)?;
            transfer
                .progress_function(|_, _, _, _| !cancel.is_cancelled())
                .map_err(setopt)?;
            transfer.perform()
        };
        file.flush()?;

        if let Err(e) = result {
            if cancel.is_cancelled() {
                return Err(TransferError::Cancelled);
            }
            if let Some(io) = write_err {
                return Err(TransferError::Io(io));
            }
            return Err(classify_curl_error(&e, written > 0));
        }
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

/// Take `n` whitespace-separated fields; the rest of the line (which may contain spaces) is the name.
fn split_fields(line: &str, n: usize) -> Option<(Vec<&str>, &str)> {
    let mut rest = line;
    let mut fields = Vec::with_capacity(n);
    for _ in 0..n {
        rest = rest.trim_start();
        let end = rest.find(char::is_whitespace)?;
        fields.push(&rest[..end]);
        rest = &rest[end..];
    }
    let name = rest.trim_start();
    (!name.is_empty()).then_some((fields, name))
}

/// One `LIST` line -> (file name, size). Directories and totals yield None.
pub(crate) fn parse_list_line(line: &str) -> Option<(String, Option<u64>)> {
    let line = line.trim_end_matches(['\r', '\n']);
    let first = line.chars().next()?;
    let (name, size) = match first {
        '-' | 'l' => {
            // perms links owner group size month day time|year name
            let full = split_fields(line, 8).and_then(|(fields, name)| {
                fields[4].parse::<u64>().ok().map(|size| (name, Some(size)))
            });
            match full {
                Some(parsed) => parsed,
                None => {
                    // Some servers omit the group column.
                    let (fields, name) = split_fields(line, 7)?;
                    (name, fields[3].parse::<u64>().ok())
                }
            }
        }
        c if c.is_ascii_digit() => {
            // DOS: 01-31-24  10:15AM  <DIR>|size  name
            let (fields, name) = split_fields(line, 3)?;
            if fields[2].eq_ignore_ascii_case("<DIR>") {
                return None;
            }
            (name, fields[2].parse::<u64>().ok())
        }
        _ => return None,
    };
    let name = match first {
        'l' => name.split(" -> ").next().unwrap_or(name),
        _ => name,
    };
    if name == "." || name == ".." {
        return None;
    }
    Some((name.to_string(), size))
}
