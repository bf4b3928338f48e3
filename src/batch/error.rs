//! Errors returned by the batch execution service client.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while talking to the batch service.
///
/// - [`RateLimited`](BatchError::RateLimited): HTTP 429
/// - [`ApiError`](BatchError::ApiError): any other non-success status
/// - [`NetworkError`](BatchError::NetworkError): transport or decoding failure
#[derive(Debug, Error)]
pub enum BatchError {
    /// `retry_after_ms` is taken from the `Retry-After` header when present.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("batch API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("network error")]
    NetworkError(#[from] reqwest::Error),
}

impl BatchError {
    /// Throttling, server errors and transport failures are worth another try;
    /// a rejected request is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            BatchError::RateLimited { .. } => true,
            BatchError::ApiError { status, .. } => *status >= 500,
            BatchError::NetworkError(e) => !e.is_decode() && !e.is_builder(),
        }
    }

    /// Server-requested wait, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            BatchError::RateLimited { retry_after_ms } => {
                Some(Duration::from_millis(*retry_after_ms))
            }
            _ => None,
        }
    }
}
