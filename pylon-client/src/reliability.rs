//! Reliability wrapper around backend calls
//!
//! One entry point: check the capability's breaker, walk the retry
//! schedule, and record the dispatch outcome. The breaker sees one outcome
//! per dispatch (the final one), not one per attempt, so its failure rate
//! tracks what callers actually experienced.

use crate::backend::{BackendCaller, BackendResponse};
use crate::error::CallError;
use pylon_core::{Capability, CircuitBreaker, GatewayError, RetrySchedule, ATTEMPT_TIMEOUT};
use serde_json::{Map, Value};
use std::time::Instant;

/// Result of a dispatched backend call.
#[derive(Debug)]
pub struct CallOutcome {
    pub response: BackendResponse,
    /// Retries spent before the successful attempt (0 = first try).
    pub retries: u32,
    /// Wall time spent inside backend attempts, in milliseconds.
    pub backend_ms: u64,
}

/// Call a backend through its circuit breaker with retries.
pub async fn call_with_reliability(
    breaker: &CircuitBreaker,
    schedule: &RetrySchedule,
    caller: &BackendCaller,
    capability: &Capability,
    params: &Map<String, Value>,
) -> Result<CallOutcome, GatewayError> {
    if breaker.try_acquire().is_err() {
        return Err(GatewayError::CircuitOpen {
            capability: capability.id.clone(),
        });
    }

    let started = Instant::now();
    let mut attempt = 0usize;
    loop {
        if let Some(delay) = schedule.delay_before(attempt) {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        match caller.call(capability, params, ATTEMPT_TIMEOUT).await {
            Ok(response) => {
                let backend_ms = started.elapsed().as_millis() as u64;
                breaker.record_success(backend_ms);
                return Ok(CallOutcome {
                    response,
                    retries: attempt as u32,
                    backend_ms,
                });
            }
            Err(error) => {
                let next = attempt + 1;
                if error.is_retryable() && next < schedule.max_attempts() {
                    tracing::debug!(
                        capability = %capability.id,
                        attempt = next,
                        error = %error,
                        "backend attempt failed, retrying"
                    );
                    attempt = next;
                    continue;
                }
                let backend_ms = started.elapsed().as_millis() as u64;
                breaker.record_failure(backend_ms);
                return Err(into_gateway_error(error));
            }
        }
    }
}

fn into_gateway_error(error: CallError) -> GatewayError {
    match error {
        CallError::UpstreamPaymentRequired => GatewayError::BackendPaymentRequired,
        CallError::Timeout { duration_ms } => GatewayError::BackendUnavailable {
            message: format!("backend attempt timed out after {duration_ms}ms"),
            timeout: true,
        },
        CallError::Connect { message } => GatewayError::BackendUnavailable {
            message,
            timeout: false,
        },
        CallError::Status { status, message } => GatewayError::BackendError { status, message },
        CallError::InvalidResponse { message } | CallError::Build { message } => {
            GatewayError::BackendError {
                status: 502,
                message,
            }
        }
    }
}
