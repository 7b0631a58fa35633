//! Persistent task store (SQLite via sqlx).
//!
//! Holds data sources and download tasks: status, progress counters,
//! retry bookkeeping and timestamps.

pub mod db;
pub mod types;

mod sources;
mod tasks;


pub use db::*;
pub use types::*;
