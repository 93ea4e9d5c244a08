//! Uniform backend invocation
//!
//! Forwards resolved parameters to a capability's upstream endpoint and
//! normalizes the response into one of three shapes: JSON passthrough,
//! base64 binary (images, PDFs), or plain text.

use crate::error::CallError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use pylon_core::{Capability, HttpMethod, SourceTier};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::time::Duration;

/// Header carrying the gateway's bypass credential to its own backends.
pub const BYPASS_HEADER: &str = "x-test-key";

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Normalized upstream response body.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum BackendBody {
    Json(Value),
    Binary {
        #[serde(rename = "contentType")]
        content_type: String,
        #[serde(rename = "dataBase64")]
        data_base64: String,
        #[serde(rename = "sizeBytes")]
        size_bytes: usize,
    },
    Text {
        text: String,
    },
}

impl BackendBody {
    /// The body as a JSON value for piping into later chain steps.
    pub fn as_value(&self) -> Value {
        match self {
            Self::Json(value) => value.clone(),
            Self::Binary {
                content_type,
                data_base64,
                size_bytes,
            } => json!({
                "contentType": content_type,
                "dataBase64": data_base64,
                "sizeBytes": size_bytes,
            }),
            Self::Text { text } => json!({ "text": text }),
        }
    }
}

/// A successful upstream response.
#[derive(Debug, Clone)]
pub struct BackendResponse {
    pub status: u16,
    pub content_type: String,
    pub body: BackendBody,
}

/// Calls leaf capability servers on behalf of the gateway.
#[derive(Debug, Clone)]
pub struct BackendCaller {
    http: reqwest::Client,
    /// Sent to native/partner backends so their payment gates let the
    /// already-paid call through. Never sent to discovered backends.
    bypass_key: Option<String>,
}

impl BackendCaller {
    pub fn new(bypass_key: Option<String>) -> Result<Self, CallError> {
        let http = reqwest::Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .pool_max_idle_per_host(4)
            .tcp_keepalive(Duration::from_secs(30))
            .build()
            .map_err(|e| CallError::Build {
                message: format!("Failed to build HTTP client: {e}"),
            })?;
        Ok(Self { http, bypass_key })
    }

    /// Forward `params` to the capability's endpoint, bounded by `timeout`.
    pub async fn call(
        &self,
        capability: &Capability,
        params: &Map<String, Value>,
        timeout: Duration,
    ) -> Result<BackendResponse, CallError> {
        let mut request = match capability.method {
            HttpMethod::Get => {
                let pairs = query_pairs(params);
                self.http.get(&capability.endpoint).query(&pairs)
            }
            HttpMethod::Post => self.http.post(&capability.endpoint).json(params),
        };

        if capability.tier != SourceTier::Discovered {
            if let Some(key) = &self.bypass_key {
                request = request.header(BYPASS_HEADER, key);
            }
        }

        let response = request
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| CallError::from_reqwest(e, timeout))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();

        if status == 402 {
            return Err(CallError::UpstreamPaymentRequired);
        }
        if !(200..300).contains(&status) {
            let message = response.text().await.unwrap_or_default();
            let message = truncate(&message, 512);
            return Err(CallError::Status { status, message });
        }

        let body = if content_type.contains("application/json") {
            let bytes = response
                .bytes()
                .await
                .map_err(|e| CallError::from_reqwest(e, timeout))?;
            match serde_json::from_slice(&bytes) {
                Ok(value) => BackendBody::Json(value),
                Err(_) => BackendBody::Text {
                    text: String::from_utf8_lossy(&bytes).into_owned(),
                },
            }
        } else if content_type.starts_with("image/") || content_type.contains("application/pdf") {
            let bytes = response
                .bytes()
                .await
                .map_err(|e| CallError::from_reqwest(e, timeout))?;
            BackendBody::Binary {
                content_type: content_type.clone(),
                data_base64: BASE64.encode(&bytes),
                size_bytes: bytes.len(),
            }
        } else {
            let text = response
                .text()
                .await
                .map_err(|e| CallError::from_reqwest(e, timeout))?;
            BackendBody::Text { text }
        };

        Ok(BackendResponse {
            status,
            content_type,
            body,
        })
    }
}

/// Flatten params into query-string pairs. Nulls are skipped; nested values
/// are JSON-encoded.
fn query_pairs(params: &Map<String, Value>) -> Vec<(String, String)> {
    params
        .iter()
        .filter_map(|(key, value)| {
            let rendered = match value {
                Value::Null => return None,
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                other => other.to_string(),
            };
            Some((key.clone(), rendered))
        })
        .collect()
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s[..end].to_string()
    }
}
