//! `datafetch pause|resume|cancel|start <id>... | priority <id> <p>` – task
//! lifecycle requests.
//!
//! Sent to a running `datafetch run` over the control socket; applied to the
//! database directly when no scheduler is listening.

use anyhow::{bail, Result};
use datafetch_core::config::FetchConfig;
use datafetch_core::control::default_control_socket_path;
use datafetch_core::task_db::{TaskDb, TaskId};

use super::offline_scheduler;
use crate::cli::control_socket::{self, ControlOp, Reply};

pub async fn run_control(
    db: &TaskDb,
    cfg: &FetchConfig,
    op: ControlOp,
    ids: &[TaskId],
) -> Result<()> {
    let reply = match default_control_socket_path() {
        Ok(path) => control_socket::send(&path, op, ids).await?,
        Err(_) => None,
    };
    let reply = match reply {
        Some(reply) => reply,
        None => op.apply(&offline_scheduler(db, cfg), ids).await,
    };
    match reply {
        Reply::Ok(message) => {
            println!("{message}");
            Ok(())
        }
        Reply::Err(message) => bail!(message),
    }
}
