//! Control socket: server (during `datafetch run`) and client (for the other commands).
//!
//! Protocol: one request line per command, `<op> <id>[,<id>...] [arg]`,
//! answered by one line, `ok <message>` or `error <message>`. Ops: pause,
//! resume, cancel, start, priority <p>, queue <p>, remove.

use std::path::Path;

use anyhow::Result;
use datafetch_core::error::SchedulerError;
use datafetch_core::task_db::TaskId;
use datafetch_core::Scheduler;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

/// A lifecycle request, addressed to one or more tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOp {
    Pause,
    Resume,
    Cancel,
    Start,
    Priority(i64),
    /// Put an already-stored Pending task into the live queue.
    Queue(i64),
    /// Drop a task from the live queue before its row is deleted.
    Remove,
}

type Outcome = (TaskId, Result<String, SchedulerError>);

impl ControlOp {
    pub fn to_line(self, ids: &[TaskId]) -> String {
        let ids = ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        match self {
            ControlOp::Pause => format!("pause {}", ids),
            ControlOp::Resume => format!("resume {}", ids),
            ControlOp::Cancel => format!("cancel {}", ids),
            ControlOp::Start => format!("start {}", ids),
            ControlOp::Priority(p) => format!("priority {} {}", ids, p),
            ControlOp::Queue(p) => format!("queue {} {}", ids, p),
            ControlOp::Remove => format!("remove {}", ids),
        }
    }

    pub fn parse_line(line: &str) -> Option<(ControlOp, Vec<TaskId>)> {
        let mut parts = line.split_whitespace();
        let op = parts.next()?;
        let ids = parts
            .next()?
            .split(',')
            .map(|s| s.parse::<TaskId>().ok())
            .collect::<Option<Vec<_>>>()?;
        let mut arg = || parts.next().and_then(|s| s.parse::<i64>().ok());
        let op = match op {
            "pause" => ControlOp::Pause,
            "resume" => ControlOp::Resume,
            "cancel" => ControlOp::Cancel,
            "start" => ControlOp::Start,
            "priority" => ControlOp::Priority(arg()?),
            "queue" => ControlOp::Queue(arg()?),
            "remove" => ControlOp::Remove,
            _ => return None,
        };
        Some((op, ids))
    }

    fn verb(self) -> &'static str {
        match self {
            ControlOp::Pause => "Paused",
            ControlOp::Resume => "Resumed",
            ControlOp::Cancel => "Cancelled",
            ControlOp::Start => "Started",
            ControlOp::Priority(_) => "Reprioritized",
            ControlOp::Queue(_) => "Queued",
            ControlOp::Remove => "Dequeued",
        }
    }

    /// Apply the request to `scheduler`; the reply is shown to the user.
    ///
    /// Each id is handled on its own. A single id answers with that task's
    /// message or error; several ids answer with a summary that names every
    /// failure, and count as an error only when none succeeded.
    pub async fn apply(self, scheduler: &Scheduler, ids: &[TaskId]) -> Reply {
        let outcomes: Vec<Outcome> = match self {
            ControlOp::Pause => with_message(scheduler.pause_many(ids).await, self),
            ControlOp::Resume => with_message(scheduler.resume_many(ids).await, self),
            ControlOp::Start => with_message(scheduler.start_many(ids).await, self),
            ControlOp::Cancel => scheduler
                .cancel_many(ids)
                .await
                .into_iter()
                .map(|(id, r)| {
                    let message = r.map(|signalled| {
                        if signalled {
                            format!("Cancelled task {id}")
                        } else {
                            format!("Task {id} already finished")
                        }
                    });
                    (id, message)
                })
                .collect(),
            ControlOp::Priority(p) => {
                let mut out = Vec::new();
                for &id in ids {
                    let r = scheduler.set_priority(id, p).await;
                    out.push((id, r.map(|()| format!("Task {id} priority set to {p}"))));
                }
                out
            }
            ControlOp::Queue(p) => {
                let mut out = Vec::new();
                for &id in ids {
                    let r = scheduler.queue_task(id, p).await;
                    out.push((id, r.map(|()| format!("Queued task {id}"))));
                }
                out
            }
            ControlOp::Remove => ids
                .iter()
                .map(|&id| {
                    scheduler.remove(id);
                    (id, Ok(format!("Dequeued task {id}")))
                })
                .collect(),
        };
        summarize(self, outcomes)
    }
}

fn with_message(outcomes: Vec<(TaskId, Result<(), SchedulerError>)>, op: ControlOp) -> Vec<Outcome> {
    outcomes
        .into_iter()
        .map(|(id, r)| (id, r.map(|()| format!("{} task {id}", op.verb()))))
        .collect()
}

fn summarize(op: ControlOp, mut outcomes: Vec<Outcome>) -> Reply {
    if outcomes.len() <= 1 {
        return match outcomes.pop() {
            Some((_, Ok(message))) => Reply::Ok(message),
            Some((_, Err(e))) => Reply::Err(e.to_string()),
            None => Reply::Err("no task ids given".to_string()),
        };
    }
    let total = outcomes.len();
    let failures: Vec<String> = outcomes
        .iter()
        .filter_map(|(id, r)| r.as_ref().err().map(|e| format!("task {id}: {e}")))
        .collect();
    let done = total - failures.len();
    let mut message = format!("{} {done} of {total} tasks", op.verb());
    if !failures.is_empty() {
        message.push_str("; failed: ");
        message.push_str(&failures.join("; "));
    }
    if done == 0 {
        Reply::Err(message)
    } else {
        Reply::Ok(message)
    }
}

/// Reply from a scheduler, running or offline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ok(String),
    Err(String),
}

async fn handle_line(scheduler: &Scheduler, line: &str) -> String {
    match ControlOp::parse_line(line) {
        Some((op, ids)) => match op.apply(scheduler, &ids).await {
            Reply::Ok(message) => format!("ok {}\n", message),
            Reply::Err(message) => format!("error {}\n", message),
        },
        None => format!("error malformed request: {}\n", line.trim()),
    }
}

/// Spawns a task that listens on `path` and applies each request line to `scheduler`.
pub fn spawn_control_listener(
    scheduler: Scheduler,
    path: impl AsRef<Path>,
) -> Result<tokio::task::JoinHandle<()>> {
    let path = path.as_ref().to_path_buf();
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let _ = std::fs::remove_file(&path);
    let listener = UnixListener::bind(&path)?;
    let handle = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let scheduler = scheduler.clone();
                    tokio::spawn(async move {
                        let (read, mut write) = stream.into_split();
                        let mut lines = BufReader::new(read).lines();
                        while let Ok(Some(line)) = lines.next_line().await {
                            let reply = handle_line(&scheduler, &line).await;
                            tracing::debug!(request = %line.trim(), reply = %reply.trim(), "control request");
                            if write.write_all(reply.as_bytes()).await.is_err() {
                                break;
                            }
                        }
                    });
                }
                Err(e) => tracing::debug!("control socket accept: {}", e),
            }
        }
    });
    Ok(handle)
}

/// Sends one request to a running scheduler. Returns None when no scheduler
/// is listening (missing or stale socket).
pub async fn send(socket_path: &Path, op: ControlOp, ids: &[TaskId]) -> Result<Option<Reply>> {
    if !socket_path.exists() {
        return Ok(None);
    }
    let stream = match UnixStream::connect(socket_path).await {
        Ok(s) => s,
        Err(e) => {
            tracing::debug!(path = %socket_path.display(), "control socket connect: {}", e);
            return Ok(None);
        }
    };
    let (read, mut write) = stream.into_split();
    write
        .write_all(format!("{}\n", op.to_line(ids)).as_bytes())
        .await?;
    let mut lines = BufReader::new(read).lines();
    let reply = lines.next_line().await?.unwrap_or_default();
    Ok(Some(match reply.split_once(' ') {
        Some(("ok", message)) => Reply::Ok(message.to_string()),
        Some(("error", message)) => Reply::Err(message.to_string()),
        _ => Reply::Err(format!("unexpected reply: {}", reply)),
    }))
}
