//! Classify protocol errors into transfer error kinds.

use crate::error::{TransferError, TransferErrorKind};

/// Whether a failure of this kind may be re-admitted automatically.
pub fn is_retryable(kind: TransferErrorKind) -> bool {
    matches!(
        kind,
        TransferErrorKind::Interrupted | TransferErrorKind::Timeout
    )
}

/// Non-2xx HTTP status before any body bytes.
pub fn classify_http_status(code: u16) -> TransferError {
    TransferError::SourceUnreachable(format!("HTTP {}", code))
}

// libcurl codes without a dedicated predicate on `curl::Error`.
const CURLE_FTP_WEIRD_SERVER_REPLY: i64 = 8;
const CURLE_REMOTE_FILE_NOT_FOUND: i64 = 78;

/// Map a curl error. `started` is true once bytes have been received.
pub fn classify_curl_error(e: &curl::Error, started: bool) -> TransferError {
    if e.is_write_error() {
        // Our write callback refused the chunk: either cancellation or disk.
        return TransferError::Interrupted(format!("local write aborted: {}", e));
    }
    let before_bytes = e.is_couldnt_connect()
        || e.is_couldnt_resolve_host()
        || e.is_couldnt_resolve_proxy()
        || e.is_login_denied()
        || e.is_remote_access_denied()
        || i64::from(e.code()) == CURLE_REMOTE_FILE_NOT_FOUND
        || i64::from(e.code()) == CURLE_FTP_WEIRD_SERVER_REPLY
        || e.is_ssl_connect_error();
    if !started && (before_bytes || e.is_operation_timedout() || e.is_got_nothing()) {
        return TransferError::SourceUnreachable(e.to_string());
    }
    TransferError::Interrupted(e.to_string())
}

/// Map an ssh2 error. `started` is true once bytes have been received.
pub fn classify_ssh_error(e: &ssh2::Error, started: bool) -> TransferError {
    if started {
        TransferError::Interrupted(e.to_string())
    } else {
        TransferError::SourceUnreachable(e.to_string())
    }
}
