//! Marketplace (bazaar) search client
//!
//! Queries the external x402 marketplace for pay-per-call services. Results
//! are raw listings; admission filtering and normalization into capability
//! records stay in `pylon_core::discovery`.

use crate::error::CallError;
use pylon_core::BazaarListing;
use serde_json::Value;
use std::time::Duration;

const BAZAAR_TIMEOUT: Duration = Duration::from_secs(10);

/// Most listings requested per search.
const SEARCH_LIMIT: usize = 10;

/// Client for the external service marketplace.
#[derive(Debug, Clone)]
pub struct BazaarClient {
    http: reqwest::Client,
    base_url: String,
}

impl BazaarClient {
    pub fn new(base_url: String) -> Result<Self, CallError> {
        let http = reqwest::Client::builder()
            .timeout(BAZAAR_TIMEOUT)
            .build()
            .map_err(|e| CallError::Build {
                message: format!("Failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Search the marketplace for services matching `term`.
    pub async fn search(&self, term: &str) -> Result<Vec<BazaarListing>, CallError> {
        let response = self
            .http
            .get(format!("{}/discovery/resources", self.base_url))
            .query(&[("q", term), ("limit", &SEARCH_LIMIT.to_string())])
            .send()
            .await
            .map_err(|e| CallError::from_reqwest(e, BAZAAR_TIMEOUT))?;

        if !response.status().is_success() {
            return Err(CallError::Status {
                status: response.status().as_u16(),
                message: "marketplace search failed".to_string(),
            });
        }

        let payload: Value = response.json().await.map_err(|e| CallError::InvalidResponse {
            message: e.to_string(),
        })?;

        Ok(parse_listings(payload))
    }
}

/// The marketplace answers either a bare array or `{"items": [...]}`.
/// Listings that do not deserialize are dropped rather than failing the
/// whole search.
fn parse_listings(payload: Value) -> Vec<BazaarListing> {
    let items = match payload {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("items") {
            Some(Value::Array(items)) => items,
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };

    items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect()
}
