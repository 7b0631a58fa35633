//! `datafetch run` – run the scheduler until Ctrl-C (or until idle).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use datafetch_core::config::FetchConfig;
use datafetch_core::control::default_control_socket_path;
use datafetch_core::notify::{BroadcastNotifier, ProgressEvent};
use datafetch_core::task_db::{TaskDb, TaskFilter, TaskId, TaskStatus};
use datafetch_core::transfer::Drivers;
use datafetch_core::Scheduler;
use tokio::sync::broadcast;

use crate::cli::control_socket;

const IDLE_POLL: Duration = Duration::from_millis(500);
/// Print a running task again once its percentage moved this much.
const PRINT_STEP_PERCENT: f64 = 10.0;

pub async fn run_scheduler(db: &TaskDb, cfg: FetchConfig, until_idle: bool) -> Result<()> {
    let recovered = db.recover_interrupted_tasks().await?;
    if recovered > 0 {
        tracing::info!("recovered {} task(s) from previous run", recovered);
    }

    let drivers = Drivers::standard(&cfg)?;
    let notifier = Arc::new(BroadcastNotifier::new(cfg.notifier_capacity));
    let events = notifier.subscribe();
    let scheduler = Scheduler::new(Arc::new(db.clone()), drivers, notifier, cfg);

    let socket_path = default_control_socket_path().ok();
    let listener = match &socket_path {
        Some(path) => match control_socket::spawn_control_listener(scheduler.clone(), path) {
            Ok(handle) => {
                tracing::debug!(path = %path.display(), "control socket listening");
                Some(handle)
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), "control socket unavailable: {:#}", e);
                None
            }
        },
        None => None,
    };
    let printer = tokio::spawn(print_events(events));

    scheduler.start_scheduler().await?;
    let status = scheduler.queue_status();
    println!(
        "Scheduler running: {} pending, up to {} at once. Ctrl-C to stop.",
        status.pending_tasks, status.max_concurrent
    );

    tokio::select! {
        r = tokio::signal::ctrl_c() => {
            if let Err(e) = r {
                tracing::warn!("waiting for Ctrl-C: {}", e);
            }
            println!("Stopping; waiting for running tasks to finish cancelling...");
        }
        _ = wait_idle(db, &scheduler), if until_idle => {
            println!("No tasks left.");
        }
    }

    scheduler.stop_scheduler().await;
    if let Some(handle) = listener {
        handle.abort();
    }
    if let Some(path) = &socket_path {
        let _ = std::fs::remove_file(path);
    }
    printer.abort();
    Ok(())
}

/// Idle means an empty queue, no running unit and no task held as Queued or
/// Running in the store, observed twice in a row (a task being dispatched is
/// briefly in none of these).
async fn wait_idle(db: &TaskDb, scheduler: &Scheduler) {
    let mut idle_rounds = 0;
    loop {
        tokio::time::sleep(IDLE_POLL).await;
        let status = scheduler.queue_status();
        let store_busy = match db.list_tasks(&TaskFilter::default()).await {
            Ok(tasks) => tasks.iter().any(|t| t.status.is_active()),
            Err(e) => {
                tracing::warn!("idle check: {:#}", e);
                true
            }
        };
        if status.running_tasks == 0 && status.pending_tasks == 0 && !store_busy {
            idle_rounds += 1;
            if idle_rounds >= 2 {
                return;
            }
        } else {
            idle_rounds = 0;
        }
    }
}

async fn print_events(mut events: broadcast::Receiver<ProgressEvent>) {
    let mut last_printed: HashMap<TaskId, f64> = HashMap::new();
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::debug!(skipped = n, "progress printer lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        if let Some(line) = format_event(&event, &mut last_printed) {
            println!("{line}");
        }
    }
}

fn format_event(event: &ProgressEvent, last_printed: &mut HashMap<TaskId, f64>) -> Option<String> {
    let id = event.task_id;
    let mib = event.downloaded_bytes as f64 / 1_048_576.0;
    match event.status {
        TaskStatus::Running => {
            let pct = event.progress_percent.unwrap_or(0.0);
            let last = last_printed.get(&id).copied();
            if last.is_some_and(|l| pct - l < PRINT_STEP_PERCENT) {
                return None;
            }
            last_printed.insert(id, pct);
            let file = event
                .current_file
                .as_deref()
                .map(|f| format!("  {f}"))
                .unwrap_or_default();
            Some(format!("  task {id}: {pct:5.1}%  {mib:.2} MiB{file}"))
        }
        status => {
            last_printed.remove(&id);
            match &event.error_message {
                Some(e) => Some(format!("  task {id}: {status} ({e})")),
                None => Some(format!("  task {id}: {status}  {mib:.2} MiB")),
            }
        }
    }
}
