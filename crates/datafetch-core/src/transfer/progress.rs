//! Throttled progress accounting shared by the drivers and the running unit.
//!
//! Drivers call [`ProgressSink::advance`] from async or blocking code. The sink
//! folds bytes into per-task counters and hands throttled snapshots to the
//! unit's progress worker with `try_send`, so a slow store never stalls a
//! transfer.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::config::FetchConfig;

/// Snapshot sent to the progress worker.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub progress_percent: Option<f64>,
    pub downloaded_bytes: u64,
    pub total_bytes: Option<u64>,
    pub current_file: Option<String>,
    /// File entries in the listing (1 for a single resource).
    pub total_files: usize,
    /// Files transferred so far.
    pub completed_files: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Single,
    Directory { matched: usize },
}

#[derive(Debug)]
struct State {
    mode: Mode,
    processed_files: usize,
    listed_files: usize,
    completed_files: usize,
    file_total: Option<u64>,
    file_done: u64,
    downloaded: u64,
    total_bytes: Option<u64>,
    current_file: Option<String>,
    last_percent: f64,
    last_emit_bytes: u64,
    last_emit_at: Instant,
}

impl State {
    fn percent(&mut self) -> Option<f64> {
        let raw = match self.mode {
            Mode::Single => match self.total_bytes {
                Some(t) if t > 0 => Some(self.downloaded as f64 / t as f64 * 100.0),
                _ => None,
            },
            Mode::Directory { matched } if matched > 0 => {
                let fraction = match self.file_total {
                    Some(t) if t > 0 => (self.file_done as f64 / t as f64).min(1.0),
                    _ => 0.0,
                };
                Some((self.processed_files as f64 + fraction) / matched as f64 * 100.0)
            }
            Mode::Directory { .. } => None,
        }?;
        // Never move backwards while running.
        let pct = raw.clamp(0.0, 100.0).max(self.last_percent);
        self.last_percent = pct;
        Some(pct)
    }

    fn snapshot(&mut self) -> ProgressUpdate {
        ProgressUpdate {
            progress_percent: self.percent(),
            downloaded_bytes: self.downloaded,
            total_bytes: self.total_bytes,
            current_file: self.current_file.clone(),
            total_files: self.listed_files,
            completed_files: self.completed_files,
        }
    }
}

/// Cloneable handle; all clones share one set of counters.
#[derive(Clone)]
pub struct ProgressSink {
    state: Arc<Mutex<State>>,
    tx: Option<mpsc::Sender<ProgressUpdate>>,
    byte_interval: u64,
    time_interval: Duration,
}

impl ProgressSink {
    pub fn new(
        tx: mpsc::Sender<ProgressUpdate>,
        byte_interval: u64,
        time_interval: Duration,
    ) -> Self {
        Self::build(Some(tx), byte_interval, time_interval)
    }

    pub fn from_config(tx: mpsc::Sender<ProgressUpdate>, cfg: &FetchConfig) -> Self {
        Self::new(tx, cfg.progress_byte_interval, cfg.progress_interval())
    }

    /// Sink that only keeps counters (no worker attached).
    pub fn detached() -> Self {
        Self::build(None, u64::MAX, Duration::MAX)
    }

    fn build(
        tx: Option<mpsc::Sender<ProgressUpdate>>,
        byte_interval: u64,
        time_interval: Duration,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                mode: Mode::Single,
                processed_files: 0,
                listed_files: 0,
                completed_files: 0,
                file_total: None,
                file_done: 0,
                downloaded: 0,
                total_bytes: None,
                current_file: None,
                last_percent: 0.0,
                last_emit_bytes: 0,
                last_emit_at: Instant::now(),
            })),
            tx,
            byte_interval: byte_interval.max(1),
            time_interval,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, state: &mut State) {
        let update = state.snapshot();
        state.last_emit_bytes = state.downloaded;
        state.last_emit_at = Instant::now();
        if let Some(tx) = &self.tx {
            // Full channel: drop this update, a later one supersedes it.
            let _ = tx.try_send(update);
        }
    }

    /// Number of file entries the directory listing returned. Recorded
    /// before filtering so a listing without matches still reports it.
    pub fn record_listing(&self, listed: usize) {
        self.lock().listed_files = listed;
    }

    /// Switch to directory accounting over `matched` files.
    /// `known_total` is the sum of listed sizes when every size was known.
    pub fn begin_directory(&self, matched: usize, known_total: Option<u64>) {
        let mut state = self.lock();
        state.mode = Mode::Directory { matched };
        state.total_bytes = known_total;
        self.emit(&mut state);
    }

    /// A new file starts. `size` may be refined later with [`set_file_total`](Self::set_file_total).
    pub fn begin_file(&self, name: &str, size: Option<u64>) {
        let mut state = self.lock();
        state.current_file = Some(name.to_string());
        state.file_total = size;
        state.file_done = 0;
        if state.mode == Mode::Single {
            state.listed_files = 1;
            if size.is_some() {
                state.total_bytes = size;
            }
        }
        self.emit(&mut state);
    }

    /// Size learned from response headers or a remote stat.
    pub fn set_file_total(&self, total: u64) {
        let mut state = self.lock();
        state.file_total = Some(total);
        if state.mode == Mode::Single {
            state.total_bytes = Some(total);
        }
    }

    /// Bytes written to disk since the last call.
    pub fn advance(&self, n: u64) {
        let mut state = self.lock();
        state.file_done += n;
        state.downloaded += n;
        if let Some(total) = state.total_bytes {
            if state.downloaded > total {
                state.total_bytes = Some(state.downloaded);
            }
        }
        let due = state.downloaded - state.last_emit_bytes >= self.byte_interval
            || state.last_emit_at.elapsed() >= self.time_interval;
        if due {
            self.emit(&mut state);
        }
    }

    /// Current file is done; `transferred` is false when it was skipped.
    pub fn finish_file(&self, transferred: bool) {
        let mut state = self.lock();
        if let Mode::Directory { .. } = state.mode {
            state.processed_files += 1;
        }
        if transferred {
            state.completed_files += 1;
        }
        state.file_total = None;
        state.file_done = 0;
        self.emit(&mut state);
    }

    /// Current counters without throttling; used for the terminal write.
    pub fn snapshot(&self) -> ProgressUpdate {
        self.lock().snapshot()
    }
}
