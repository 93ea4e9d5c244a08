//! x402 facilitator client
//!
//! The facilitator verifies payment proofs before a call is forwarded and
//! settles them afterwards. Verification is on the hot path with a 10 s
//! bound; settlement is fire-and-forget from the gateway's point of view.

use crate::error::CallError;
use pylon_core::MicroUsd;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

const FACILITATOR_TIMEOUT: Duration = Duration::from_secs(10);

/// x402 protocol version the gateway speaks.
pub const X402_VERSION: u32 = 2;

/// What the caller is being charged for, quoted identically in the 402
/// body, the verify call, and the settle call.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentQuote {
    pub amount: MicroUsd,
    pub pay_to: String,
    pub network: String,
    /// Resource identifier, e.g. `pylon://screenshot`.
    pub resource: String,
    pub description: String,
}

/// Verification verdict from the facilitator.
#[derive(Debug, Clone)]
pub enum VerifyOutcome {
    Valid,
    Invalid { reason: String },
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    #[serde(rename = "isValid")]
    is_valid: bool,
    #[serde(rename = "invalidReason")]
    invalid_reason: Option<String>,
}

/// Client for the external payment facilitator.
#[derive(Debug, Clone)]
pub struct FacilitatorClient {
    http: reqwest::Client,
    base_url: String,
}

impl FacilitatorClient {
    pub fn new(base_url: String) -> Result<Self, CallError> {
        let http = reqwest::Client::builder()
            .timeout(FACILITATOR_TIMEOUT)
            .build()
            .map_err(|e| CallError::Build {
                message: format!("Failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Ask the facilitator whether `proof` pays for `quote`.
    ///
    /// A non-2xx answer is an explicit rejection, not an outage; only
    /// transport failures surface as `Err`.
    pub async fn verify(
        &self,
        proof: &str,
        quote: &PaymentQuote,
    ) -> Result<VerifyOutcome, CallError> {
        let response = self
            .http
            .post(format!("{}/verify", self.base_url))
            .json(&self.request_body(proof, quote))
            .send()
            .await
            .map_err(|e| CallError::from_reqwest(e, FACILITATOR_TIMEOUT))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            return Ok(VerifyOutcome::Invalid {
                reason: format!("facilitator rejected verification (HTTP {status})"),
            });
        }

        let verdict: VerifyResponse = response.json().await.map_err(|e| CallError::InvalidResponse {
            message: e.to_string(),
        })?;

        if verdict.is_valid {
            Ok(VerifyOutcome::Valid)
        } else {
            Ok(VerifyOutcome::Invalid {
                reason: verdict
                    .invalid_reason
                    .unwrap_or_else(|| "payment proof rejected".to_string()),
            })
        }
    }

    /// Settle a verified proof. Called after the backend responded; failures
    /// are the caller's to log, never to surface.
    pub async fn settle(&self, proof: &str, quote: &PaymentQuote) -> Result<(), CallError> {
        let response = self
            .http
            .post(format!("{}/settle", self.base_url))
            .json(&self.request_body(proof, quote))
            .send()
            .await
            .map_err(|e| CallError::from_reqwest(e, FACILITATOR_TIMEOUT))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(CallError::Status {
                status: response.status().as_u16(),
                message: "settlement rejected".to_string(),
            })
        }
    }

    fn request_body(&self, proof: &str, quote: &PaymentQuote) -> serde_json::Value {
        json!({
            "x402Version": X402_VERSION,
            "paymentPayload": proof,
            "paymentRequirements": {
                "scheme": "exact",
                "network": quote.network,
                "amount": quote.amount.as_micros().to_string(),
                "asset": "USDC",
                "payTo": quote.pay_to,
                "resource": quote.resource,
                "description": quote.description,
            },
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_quotes_micro_units() {
        let client = FacilitatorClient::new("https://fac.example/".to_string()).unwrap();
        let quote = PaymentQuote {
            amount: MicroUsd(10_000),
            pay_to: "0xabc".to_string(),
            network: "base".to_string(),
            resource: "pylon://screenshot".to_string(),
            description: "Screenshot".to_string(),
        };
        let body = client.request_body("proof", &quote);
        assert_eq!(body["x402Version"], 2);
        assert_eq!(body["paymentRequirements"]["amount"], "10000");
        assert_eq!(body["paymentRequirements"]["network"], "base");
        assert_eq!(client.base_url(), "https://fac.example");
    }
}
