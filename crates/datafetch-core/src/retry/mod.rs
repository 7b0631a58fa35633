//! Retry bookkeeping and error classification.
//!
//! Drivers never retry internally; these helpers map protocol failures onto
//! [`TransferError`](crate::error::TransferError) kinds and decide whether a
//! failed task is eligible for automatic re-admission.

mod classify;
mod policy;

pub use classify::{classify_curl_error, classify_http_status, classify_ssh_error, is_retryable};
pub use policy::{AutoRetryPolicy, RetryDecision};
