//! Per-task cancellation registry.
//!
//! Each running unit registers a child of the scheduler's root token. A stop
//! request records why the unit is stopping so its terminal write can tell a
//! user cancel from a pause, a shutdown or a timeout.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use tokio_util::sync::CancellationToken;

use crate::task_db::TaskId;

/// Why a running unit was asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    UserCancelled,
    Paused,
    Shutdown,
    Timeout,
}

struct Entry {
    token: CancellationToken,
    reason: Option<StopReason>,
}

/// Shared registry of task id -> cancellation token and stop reason.
#[derive(Default)]
pub struct JobControl {
    jobs: Mutex<HashMap<TaskId, Entry>>,
}

impl JobControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a running task; returns the token to pass to the driver.
    pub fn register(&self, task_id: TaskId, parent: &CancellationToken) -> CancellationToken {
        let token = parent.child_token();
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner).insert(
            task_id,
            Entry {
                token: token.clone(),
                reason: None,
            },
        );
        token
    }

    /// Unregister a task (call when the unit finishes). Returns the recorded stop reason.
    pub fn unregister(&self, task_id: TaskId) -> Option<StopReason> {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&task_id)
            .and_then(|e| e.reason)
    }

    /// Signal a running task to stop. The first reason recorded wins.
    /// Returns false if the task is not registered.
    pub fn request_abort(&self, task_id: TaskId, reason: StopReason) -> bool {
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        match jobs.get_mut(&task_id) {
            Some(entry) => {
                entry.reason.get_or_insert(reason);
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Signal every registered task (scheduler shutdown).
    pub fn abort_all(&self, reason: StopReason) -> usize {
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        for entry in jobs.values_mut() {
            entry.reason.get_or_insert(reason);
            entry.token.cancel();
        }
        jobs.len()
    }

    pub fn reason(&self, task_id: TaskId) -> Option<StopReason> {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&task_id)
            .and_then(|e| e.reason)
    }

    pub fn is_registered(&self, task_id: TaskId) -> bool {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&task_id)
    }
}

/// Default path for the control socket (same XDG state dir as the DB).
pub fn default_control_socket_path() -> std::io::Result<PathBuf> {
    let dir = xdg::BaseDirectories::with_prefix("datafetch")?.get_state_home();
    Ok(dir.join("control.sock"))
}
