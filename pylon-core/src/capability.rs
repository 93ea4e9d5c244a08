//! Capability model
//!
//! A capability is one payable backend operation: a cost, an input schema,
//! and an upstream endpoint. Native, partner, and discovered capabilities
//! are all values of this one type, variant-tagged by [`SourceTier`]; only
//! the backend-bypass rule and the SSRF guard care about the tier.

use crate::money::MicroUsd;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reserved ID prefix for capabilities activated from the marketplace.
pub const DISCOVERED_PREFIX: &str = "discovered:";

/// Where a capability came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceTier {
    Native,
    Partner,
    Discovered,
}

/// Upstream HTTP method. Only GET and POST backends are admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
}

/// Semantic type of one input parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Boolean,
}

/// Schema entry for one input parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSpec {
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default)]
    pub description: String,
}

impl InputSpec {
    pub fn required(param_type: ParamType, description: &str) -> Self {
        Self {
            param_type,
            required: true,
            default: None,
            description: description.to_string(),
        }
    }

    pub fn optional(param_type: ParamType, default: Value, description: &str) -> Self {
        Self {
            param_type,
            required: false,
            default: Some(default),
            description: description.to_string(),
        }
    }
}

/// Output content class, used to pick the response shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Json,
    Image,
    Pdf,
    Text,
}

/// Partner or marketplace provider behind a capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub name: String,
    pub payout_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_url: Option<String>,
}

/// Revenue fractions for partner/discovered capabilities. Must sum to 1.0.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RevenueSplit {
    pub provider: f64,
    pub gateway: f64,
}

impl RevenueSplit {
    /// Tolerance for the sum check; split fractions come from config files.
    const EPSILON: f64 = 1e-6;

    pub fn is_valid(&self) -> bool {
        self.provider >= 0.0
            && self.gateway >= 0.0
            && (self.provider + self.gateway - 1.0).abs() < Self::EPSILON
    }
}

/// One payable backend operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capability {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Price charged to the caller.
    pub cost: MicroUsd,
    /// Lowercase tokens the dispatcher matches against free-form tasks.
    pub keywords: Vec<String>,
    pub endpoint: String,
    pub method: HttpMethod,
    /// Input schema, in declaration order.
    pub inputs: IndexMap<String, InputSpec>,
    pub output: OutputKind,
    pub tier: SourceTier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<Provider>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split: Option<RevenueSplit>,
    /// What the marketplace provider charges; set for discovered only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_cost: Option<MicroUsd>,
    /// Payment target for discovered capabilities (marketplace record).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pay_to: Option<String>,
    /// Payment network for discovered capabilities (marketplace record).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
}

impl Capability {
    pub fn is_discovered(&self) -> bool {
        self.tier == SourceTier::Discovered
    }

    /// Gateway margin on a discovered capability.
    pub fn gateway_fee(&self) -> MicroUsd {
        match self.provider_cost {
            Some(provider) => self.cost.saturating_sub(provider),
            None => MicroUsd::ZERO,
        }
    }

    /// Apply schema defaults for parameters absent from `params`.
    pub fn apply_defaults(&self, params: &mut serde_json::Map<String, Value>) {
        for (key, spec) in &self.inputs {
            if params.contains_key(key) {
                continue;
            }
            if let Some(default) = &spec.default {
                params.insert(key.clone(), default.clone());
            }
        }
    }

    /// Names of required parameters missing from `params`.
    pub fn missing_required(&self, params: &serde_json::Map<String, Value>) -> Vec<String> {
        self.inputs
            .iter()
            .filter(|(key, spec)| spec.required && !params.contains_key(key.as_str()))
            .map(|(key, _)| key.clone())
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn capability_with_inputs() -> Capability {
        let mut inputs = IndexMap::new();
        inputs.insert(
            "url".to_string(),
            InputSpec::required(ParamType::String, "URL of the page"),
        );
        inputs.insert(
            "width".to_string(),
            InputSpec::optional(ParamType::Number, json!(1280), "Viewport width"),
        );
        Capability {
            id: "screenshot".to_string(),
            name: "Screenshot".to_string(),
            description: "Capture a webpage".to_string(),
            cost: MicroUsd(10_000),
            keywords: vec!["screenshot".to_string()],
            endpoint: "http://127.0.0.1:9001/screenshot".to_string(),
            method: HttpMethod::Get,
            inputs,
            output: OutputKind::Image,
            tier: SourceTier::Native,
            provider: None,
            split: None,
            provider_cost: None,
            pay_to: None,
            network: None,
        }
    }

    #[test]
    fn test_apply_defaults_fills_absent_only() {
        let cap = capability_with_inputs();
        let mut params = serde_json::Map::new();
        params.insert("url".to_string(), json!("https://example.com"));
        cap.apply_defaults(&mut params);
        assert_eq!(params.get("width"), Some(&json!(1280)));

        params.insert("width".to_string(), json!(640));
        cap.apply_defaults(&mut params);
        assert_eq!(params.get("width"), Some(&json!(640)));
    }

    #[test]
    fn test_missing_required() {
        let cap = capability_with_inputs();
        let params = serde_json::Map::new();
        assert_eq!(cap.missing_required(&params), vec!["url".to_string()]);
    }

    #[test]
    fn test_revenue_split_validation() {
        assert!(RevenueSplit {
            provider: 0.7,
            gateway: 0.3
        }
        .is_valid());
        assert!(!RevenueSplit {
            provider: 0.7,
            gateway: 0.2
        }
        .is_valid());
        assert!(!RevenueSplit {
            provider: -0.1,
            gateway: 1.1
        }
        .is_valid());
    }

    #[test]
    fn test_gateway_fee_for_discovered() {
        let mut cap = capability_with_inputs();
        cap.tier = SourceTier::Discovered;
        cap.cost = MicroUsd(20_000);
        cap.provider_cost = Some(MicroUsd(8_000));
        assert_eq!(cap.gateway_fee(), MicroUsd(12_000));
    }
}
