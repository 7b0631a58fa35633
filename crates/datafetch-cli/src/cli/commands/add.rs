//! `datafetch add <source-id> <save-path>` – add a download task.

use anyhow::Result;
use datafetch_core::config::FetchConfig;
use datafetch_core::control::default_control_socket_path;
use datafetch_core::task_db::{NewTask, TaskDb};

use super::offline_scheduler;
use crate::cli::control_socket::{self, ControlOp, Reply};

pub async fn run_add(db: &TaskDb, cfg: &FetchConfig, task: NewTask) -> Result<()> {
    let priority = task.priority;
    let id = offline_scheduler(db, cfg).enqueue(task).await?;
    println!("Added task {id} (priority {priority})");

    // Hand it to a running scheduler, if any; otherwise `run` loads it at start.
    if let Ok(path) = default_control_socket_path() {
        match control_socket::send(&path, ControlOp::Queue(priority), &[id]).await {
            Ok(Some(Reply::Err(e))) => tracing::warn!(task_id = id, "live queue rejected task: {}", e),
            Ok(_) => {}
            Err(e) => tracing::debug!(task_id = id, "control socket: {:#}", e),
        }
    }
    Ok(())
}
