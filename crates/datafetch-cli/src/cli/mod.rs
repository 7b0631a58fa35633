//! CLI for the datafetch transfer engine.

mod commands;
mod control_socket;

use anyhow::Result;
use clap::{Parser, Subcommand};
use datafetch_core::config;
use datafetch_core::task_db::{NewTask, TaskDb, TaskFilter, TaskStatus};

use commands::{
    run_add, run_control, run_remove, run_scheduler, run_source, run_status, SourceCommand,
};
use control_socket::ControlOp;

/// Top-level CLI for the datafetch transfer engine.
#[derive(Debug, Parser)]
#[command(name = "datafetch")]
#[command(about = "datafetch: scheduled HTTP/FTP/SFTP data downloads", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Manage data sources.
    #[command(subcommand)]
    Source(SourceCommand),

    /// Add a download task for a data source.
    Add {
        /// Data source identifier.
        source_id: i64,
        /// Local directory the files are saved into.
        save_path: String,
        /// Filename glob applied to directory listings (default from config).
        #[arg(long)]
        pattern: Option<String>,
        /// Priority, 1 (most urgent) to 10.
        #[arg(long, default_value = "5")]
        priority: i64,
        /// Manual restarts allowed after a failure.
        #[arg(long, default_value = "3")]
        max_retries: i64,
        /// Aggregate timeout for one run of the task, in seconds.
        #[arg(long, default_value = "300", value_name = "SECS")]
        timeout: i64,
    },

    /// Run the scheduler until interrupted (Ctrl-C).
    Run {
        /// Maximum tasks transferring at once (default from config).
        #[arg(long, value_name = "N")]
        max_concurrent: Option<usize>,
        /// Exit once no task is running or queued.
        #[arg(long)]
        until_idle: bool,
    },

    /// Show tasks, newest first.
    Status {
        /// Only tasks in this state (pending, queued, running, completed,
        /// failed, cancelled, paused).
        #[arg(long)]
        status: Option<String>,
        /// Only tasks of this data source.
        #[arg(long = "source", value_name = "SOURCE_ID")]
        source_id: Option<i64>,
        /// Skip this many of the newest matching tasks.
        #[arg(long, default_value = "0")]
        skip: i64,
        /// Show at most this many tasks.
        #[arg(long)]
        limit: Option<i64>,
        /// Print one JSON object per task.
        #[arg(long)]
        json: bool,
    },

    /// Pause running or queued tasks.
    Pause {
        /// Task identifiers.
        #[arg(required = true)]
        ids: Vec<i64>,
    },

    /// Re-enqueue paused tasks from scratch.
    Resume {
        /// Task identifiers.
        #[arg(required = true)]
        ids: Vec<i64>,
    },

    /// Cancel running or queued tasks.
    Cancel {
        /// Task identifiers.
        #[arg(required = true)]
        ids: Vec<i64>,
    },

    /// Start pending, paused, cancelled or failed tasks.
    Start {
        /// Task identifiers.
        #[arg(required = true)]
        ids: Vec<i64>,
    },

    /// Change the priority of a task.
    Priority {
        /// Task identifier.
        id: i64,
        /// New priority, 1 (most urgent) to 10.
        priority: i64,
    },

    /// Delete a task that is not running.
    Remove {
        /// Task identifier.
        id: i64,
    },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);
        let db = TaskDb::open_default().await?;

        match cli.command {
            CliCommand::Source(cmd) => run_source(&db, cmd).await?,
            CliCommand::Add {
                source_id,
                save_path,
                pattern,
                priority,
                max_retries,
                timeout,
            } => {
                let task = NewTask {
                    source_id,
                    save_path,
                    filename_pattern: pattern,
                    max_retries,
                    timeout_seconds: timeout,
                    priority,
                };
                run_add(&db, &cfg, task).await?
            }
            CliCommand::Run {
                max_concurrent,
                until_idle,
            } => {
                let mut cfg = cfg;
                if let Some(n) = max_concurrent {
                    cfg.max_concurrent_tasks = n;
                }
                run_scheduler(&db, cfg, until_idle).await?
            }
            CliCommand::Status {
                status,
                source_id,
                skip,
                limit,
                json,
            } => {
                let filter = TaskFilter {
                    status: status.as_deref().map(str::parse::<TaskStatus>).transpose()?,
                    source_id,
                    offset: skip,
                    limit,
                };
                run_status(&db, &filter, json).await?
            }
            CliCommand::Pause { ids } => run_control(&db, &cfg, ControlOp::Pause, &ids).await?,
            CliCommand::Resume { ids } => run_control(&db, &cfg, ControlOp::Resume, &ids).await?,
            CliCommand::Cancel { ids } => run_control(&db, &cfg, ControlOp::Cancel, &ids).await?,
            CliCommand::Start { ids } => run_control(&db, &cfg, ControlOp::Start, &ids).await?,
            CliCommand::Priority { id, priority } => {
                run_control(&db, &cfg, ControlOp::Priority(priority), &[id]).await?
            }
            CliCommand::Remove { id } => run_remove(&db, id).await?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
