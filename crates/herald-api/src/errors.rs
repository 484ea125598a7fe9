//! Mapping of `reqwest` failures onto [`NetworkError`].

use herald_core::{NetworkError, RequestOperation};

/// Result type for API calls.
pub type Result<T> = std::result::Result<T, NetworkError>;

/// Request never produced a response (connect, timeout, body read).
pub(crate) fn request_failed(operation: RequestOperation, err: &reqwest::Error) -> NetworkError {
    let message = if err.is_timeout() {
        format!("timed out: {err}")
    } else if err.is_connect() {
        format!("connection failed: {err}")
    } else {
        err.to_string()
    };
    NetworkError::transport(operation, message)
}

/// Non-2xx response. The body is kept short for the log line.
pub(crate) fn unexpected_status(operation: RequestOperation, status: u16, body: &str) -> NetworkError {
    let body = body.trim();
    let message = if body.is_empty() {
        "empty response body".to_string()
    } else {
        body.chars().take(200).collect()
    };
    NetworkError::status(operation, status, message)
}

/// A 2xx response whose body could not be decoded.
pub(crate) fn invalid_body(operation: RequestOperation, detail: impl std::fmt::Display) -> NetworkError {
    NetworkError::transport(operation, format!("invalid response body: {detail}"))
}
