//! `datafetch status` – show tasks, newest first.

use anyhow::Result;
use datafetch_core::task_db::{TaskDb, TaskFilter, TaskRecord};
use serde_json::json;

fn task_json(t: &TaskRecord) -> serde_json::Value {
    json!({
        "id": t.id,
        "source_id": t.source_id,
        "status": t.status,
        "priority": t.priority,
        "progress_percent": t.progress_percent,
        "downloaded_bytes": t.downloaded_bytes,
        "total_bytes": t.total_bytes,
        "total_files": t.total_files,
        "completed_files": t.completed_files,
        "retries_used": t.retries_used,
        "max_retries": t.max_retries,
        "save_path": t.save_path,
        "error_message": t.error_message,
        "note": t.note,
    })
}

pub async fn run_status(db: &TaskDb, filter: &TaskFilter, as_json: bool) -> Result<()> {
    let tasks = db.list_tasks(filter).await?;
    if as_json {
        for t in &tasks {
            println!("{}", task_json(t));
        }
        return Ok(());
    }
    if tasks.is_empty() {
        println!("No matching tasks.");
        return Ok(());
    }
    println!(
        "{:<6} {:<10} {:<4} {:>7} {:<7} {:<10} {}",
        "ID", "STATUS", "PRI", "PCT", "FILES", "BYTES", "SAVE PATH"
    );
    for t in tasks {
        let files = if t.total_files > 0 {
            format!("{}/{}", t.completed_files, t.total_files)
        } else {
            "-".to_string()
        };
        println!(
            "{:<6} {:<10} {:<4} {:>6.1}% {:<7} {:<10} {}",
            t.id,
            t.status.as_str(),
            t.priority,
            t.progress_percent,
            files,
            t.downloaded_bytes,
            t.save_path
        );
        if let Some(e) = &t.error_message {
            println!("       {e}");
        }
    }
    Ok(())
}
