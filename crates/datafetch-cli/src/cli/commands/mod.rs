//! CLI command handlers. Each command is in its own file.

mod add;
mod control;
mod remove;
mod run;
mod source;
mod status;

use std::sync::Arc;

use datafetch_core::config::FetchConfig;
use datafetch_core::notify::NoopNotifier;
use datafetch_core::task_db::TaskDb;
use datafetch_core::transfer::Drivers;
use datafetch_core::Scheduler;

pub use add::run_add;
pub use control::run_control;
pub use remove::run_remove;
pub use run::run_scheduler;
pub use source::{run_source, SourceCommand, SourceUpdate};
pub use status::run_status;

/// Scheduler without drivers or admission loop. Lifecycle calls on it only
/// touch the store; `datafetch run` picks the result up on its next start.
fn offline_scheduler(db: &TaskDb, cfg: &FetchConfig) -> Scheduler {
    Scheduler::new(
        Arc::new(db.clone()),
        Drivers::empty(),
        Arc::new(NoopNotifier),
        cfg.clone(),
    )
}
