//! Outbound call errors
//!
//! Categorized by whether they're retryable.

use std::time::Duration;

/// Errors from outbound HTTP calls (backends, facilitator, marketplace,
/// planner).
#[derive(Debug, Clone, thiserror::Error)]
pub enum CallError {
    // === Retryable ===
    #[error("Request timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    #[error("Connection failed: {message}")]
    Connect { message: String },

    #[error("Upstream returned {status}: {message}")]
    Status { status: u16, message: String },

    // === Non-retryable ===
    /// The upstream demanded payment. For native/partner backends this means
    /// the gateway's bypass credential was not honored.
    #[error("Upstream demanded payment (402)")]
    UpstreamPaymentRequired,

    #[error("Upstream response could not be decoded: {message}")]
    InvalidResponse { message: String },

    #[error("Client build failed: {message}")]
    Build { message: String },
}

impl CallError {
    /// Whether another attempt might succeed: transport failures and 5xx.
    /// Every 4xx answer is final.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Connect { .. } => true,
            Self::Status { status, .. } => pylon_core::status_is_retryable(*status),
            _ => false,
        }
    }

    pub(crate) fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                duration_ms: timeout.as_millis() as u64,
            }
        } else {
            Self::Connect {
                message: err.to_string(),
            }
        }
    }
}
