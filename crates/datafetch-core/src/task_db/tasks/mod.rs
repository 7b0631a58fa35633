//! Task CRUD on `download_tasks`.

mod read;
mod write;
