pub mod config;
pub mod logging;

pub mod control;
pub mod error;
pub mod notify;
pub mod pattern;
pub mod retry;
pub mod scheduler;
pub mod store;
pub mod task_db;
pub mod transfer;
pub mod url_model;

pub use error::{SchedulerError, TransferError};
pub use scheduler::{QueueStatus, Scheduler};
