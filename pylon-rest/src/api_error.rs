//! Error-to-response translation
//!
//! Every handler returns `Result<_, ApiError>`. The body always carries a
//! machine-readable `error` code; payment-required errors render the full
//! x402 accepts envelope instead of the plain error object.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use pylon_core::GatewayError;
use serde_json::{json, Value};

/// A rendered API error: status plus JSON body.
#[derive(Debug, Clone)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: Value,
}

impl ApiError {
    pub fn new(status: StatusCode, body: Value) -> Self {
        Self { status, body }
    }

    /// Error code from the body, for logging and tests.
    pub fn code(&self) -> &str {
        self.body["error"].as_str().unwrap_or("unknown")
    }

    pub fn internal(message: &str) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: json!({ "error": "internal_error", "message": message }),
        }
    }
}

impl From<GatewayError> for ApiError {
    fn from(error: GatewayError) -> Self {
        let status = StatusCode::from_u16(error.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut body = json!({
            "error": error.error_code(),
            "message": error.to_string(),
        });

        // Some errors carry structure the caller needs to act on.
        match &error {
            GatewayError::MissingParams {
                capability,
                missing,
                schema,
                extracted,
            } => {
                body["capability"] = json!(capability);
                body["missing"] = json!(missing);
                body["schema"] = schema.clone();
                body["extracted"] = extracted.clone();
            }
            GatewayError::OverBudget {
                capability,
                cost,
                budget,
            } => {
                body["capability"] = json!(capability);
                body["cost"] = json!(cost.to_string());
                body["budget"] = json!(budget.to_string());
            }
            GatewayError::StepFailed { index, capability, .. }
            | GatewayError::StepTimeout { index, capability, .. } => {
                body["failedStep"] = json!(index);
                body["capability"] = json!(capability);
            }
            GatewayError::BackendError { status, .. } => {
                body["backendStatus"] = json!(status);
            }
            _ => {}
        }

        Self { status, body }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_error_carries_code_and_status() {
        let api: ApiError = GatewayError::PaymentReplay.into();
        assert_eq!(api.status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(api.code(), "payment_replay");
    }

    #[test]
    fn test_over_budget_includes_amounts() {
        let api: ApiError = GatewayError::OverBudget {
            capability: "ocr".to_string(),
            cost: pylon_core::MicroUsd(30_000),
            budget: pylon_core::MicroUsd(1_000),
        }
        .into();
        assert_eq!(api.status, StatusCode::BAD_REQUEST);
        assert_eq!(api.body["cost"], "$0.03");
        assert_eq!(api.body["budget"], "$0.001");
    }
}
