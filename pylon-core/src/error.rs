//! Gateway errors
//!
//! One enum for everything a dispatch can fail with, carrying enough
//! context to render the machine-readable error body. Status mapping lives
//! here so the transport layer stays a thin translation.

use crate::money::MicroUsd;
use serde_json::Value;

/// Errors surfaced to callers as machine-readable codes.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("Request must include a task or a capability id")]
    MissingTask,

    #[error("Missing required params for '{capability}': {missing:?}")]
    MissingParams {
        capability: String,
        missing: Vec<String>,
        schema: Value,
        extracted: Value,
    },

    #[error("Unknown capability: {id}")]
    UnknownCapability { id: String },

    #[error("No capability matches task: {task}")]
    NoMatchingCapability { task: String },

    #[error("Capability '{capability}' costs {cost} which exceeds budget {budget}")]
    OverBudget {
        capability: String,
        cost: MicroUsd,
        budget: MicroUsd,
    },

    /// Rendered as the x402 payment-required body, not a plain error object.
    #[error("Payment required: {amount} for {resource}")]
    PaymentRequired {
        amount: MicroUsd,
        resource: String,
        description: String,
    },

    #[error("Payment rejected: {reason}")]
    InvalidPayment { reason: String },

    #[error("Payment already used")]
    PaymentReplay,

    #[error("Payment verification service unavailable")]
    VerificationUnavailable,

    #[error("Backend returned {status}: {message}")]
    BackendError { status: u16, message: String },

    #[error("Backend demanded payment; gateway bypass was not honored")]
    BackendPaymentRequired,

    #[error("Backend unavailable: {message}")]
    BackendUnavailable { message: String, timeout: bool },

    #[error("Circuit open for '{capability}'; temporarily unavailable")]
    CircuitOpen { capability: String },

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Chain planning failed: {reason}")]
    OrchestrationFailed { reason: String },

    #[error("Step {index} ({capability}) failed: {reason}")]
    StepFailed {
        index: usize,
        capability: String,
        reason: String,
    },

    #[error("Step {index} ({capability}) timed out after {timeout_ms}ms")]
    StepTimeout {
        index: usize,
        capability: String,
        timeout_ms: u64,
    },

    #[error("Chain exceeded total timeout of {timeout_ms}ms")]
    TotalTimeout { timeout_ms: u64 },

    #[error("Endpoint blocked: {reason}")]
    BlockedEndpoint { reason: String },

    #[error("Invalid catalog: {reason}")]
    InvalidCatalog { reason: String },
}

impl GatewayError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MissingTask => "missing_task",
            Self::MissingParams { .. } => "missing_params",
            Self::UnknownCapability { .. } => "unknown_capability",
            Self::NoMatchingCapability { .. } => "no_matching_capability",
            Self::OverBudget { .. } => "over_budget",
            Self::PaymentRequired { .. } => "payment_required",
            Self::InvalidPayment { .. } => "invalid_payment",
            Self::PaymentReplay => "payment_replay",
            Self::VerificationUnavailable => "verification_unavailable",
            Self::BackendError { .. } => "backend_error",
            Self::BackendPaymentRequired => "backend_payment_required",
            Self::BackendUnavailable { .. } => "backend_unavailable",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::RateLimited => "rate_limited",
            Self::OrchestrationFailed { .. } => "orchestration_failed",
            Self::StepFailed { .. } => "step_failed",
            Self::StepTimeout { .. } => "step_timeout",
            Self::TotalTimeout { .. } => "total_timeout",
            Self::BlockedEndpoint { .. } => "blocked_endpoint",
            Self::InvalidCatalog { .. } => "internal_error",
        }
    }

    /// HTTP status this error maps to.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::MissingTask
            | Self::MissingParams { .. }
            | Self::OverBudget { .. }
            | Self::OrchestrationFailed { .. }
            | Self::BlockedEndpoint { .. } => 400,
            Self::UnknownCapability { .. } | Self::NoMatchingCapability { .. } => 404,
            Self::PaymentRequired { .. }
            | Self::InvalidPayment { .. }
            | Self::PaymentReplay => 402,
            Self::VerificationUnavailable | Self::InvalidCatalog { .. } => 500,
            // Upstream 4xx statuses are informative to the caller and pass
            // through; upstream 5xx collapses to bad-gateway.
            Self::BackendError { status, .. } if (400..500).contains(status) => *status,
            Self::BackendError { .. } => 502,
            Self::BackendPaymentRequired => 502,
            // Unreachable is a bad gateway; a timed-out attempt is 504.
            Self::BackendUnavailable { timeout, .. } => {
                if *timeout {
                    504
                } else {
                    502
                }
            }
            Self::CircuitOpen { .. } => 503,
            Self::RateLimited => 429,
            Self::StepFailed { .. } => 400,
            Self::StepTimeout { .. } | Self::TotalTimeout { .. } => 504,
        }
    }

    /// Whether the payment settles when this error ends an already-verified
    /// dispatch. Circuit-open short-circuits before the backend is
    /// contacted and is the one post-verification failure that does not
    /// bill.
    pub fn bills_caller(&self) -> bool {
        !matches!(self, Self::CircuitOpen { .. })
    }
}
