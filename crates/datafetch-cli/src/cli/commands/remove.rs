//! `datafetch remove <id>` – delete a task that is not running.

use std::path::Path;

use anyhow::{bail, Result};
use datafetch_core::control::default_control_socket_path;
use datafetch_core::task_db::{TaskDb, TaskId};

use crate::cli::control_socket::{self, ControlOp, Reply};

pub async fn run_remove(db: &TaskDb, id: TaskId) -> Result<()> {
    let Some(task) = db.get_task(id).await? else {
        bail!("task {id} not found");
    };
    if task.status.is_active() {
        bail!("task {id} is {}; cancel it first", task.status);
    }
    if let Ok(path) = default_control_socket_path() {
        dequeue_live(&path, id).await;
    }
    db.remove_task(id).await?;
    println!("Removed task {id}");
    Ok(())
}

/// Drop the task from a running scheduler's queue. Best effort: the row is
/// deleted either way and a stale queue entry fails its store re-check.
async fn dequeue_live(socket_path: &Path, id: TaskId) {
    match control_socket::send(socket_path, ControlOp::Remove, &[id]).await {
        Ok(Some(Reply::Err(e))) => tracing::warn!(task_id = id, "live queue kept task: {}", e),
        Ok(_) => {}
        Err(e) => tracing::debug!(task_id = id, "control socket: {:#}", e),
    }
}
