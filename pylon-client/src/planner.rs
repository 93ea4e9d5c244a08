//! LLM chain planner client
//!
//! Sends the task plus the capability catalog to an external model and gets
//! back a strict-JSON plan. The planner proposes; `pylon_core::plan`
//! validates. Nothing here is trusted.

use crate::error::CallError;
use pylon_core::{Capability, ChainStep};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

const PLANNER_TIMEOUT: Duration = Duration::from_secs(60);
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_PLAN_TOKENS: u32 = 1024;

const PLANNER_SYSTEM: &str = "You are a planning engine for an API gateway. \
Given a task and a catalog of capabilities, respond with ONLY a JSON object \
of the form {\"steps\":[{\"capabilityId\":\"...\",\"params\":{...},\
\"inputMapping\":{...}}],\"estimatedCost\":\"$0.00\"}. inputMapping values \
are paths like steps[0].content referencing earlier step outputs. Use at \
most 5 steps. No prose, no code fences.";

/// A plan as proposed by the model, before validation.
#[derive(Debug, Clone, Deserialize)]
pub struct ProposedPlan {
    pub steps: Vec<ChainStep>,
    #[serde(default, rename = "estimatedCost")]
    pub estimated_cost: Option<String>,
}

/// Client for the external planning model.
#[derive(Debug, Clone)]
pub struct ChainPlanner {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl ChainPlanner {
    pub fn new(base_url: String, api_key: String, model: String) -> Result<Self, CallError> {
        let http = reqwest::Client::builder()
            .timeout(PLANNER_TIMEOUT)
            .build()
            .map_err(|e| CallError::Build {
                message: format!("Failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
        })
    }

    /// Plan a chain for `task` against the given catalog.
    pub async fn plan<'a, I>(&self, task: &str, catalog: I) -> Result<ProposedPlan, CallError>
    where
        I: IntoIterator<Item = &'a Capability>,
    {
        let prompt = format!(
            "Task: {task}\n\nCapability catalog:\n{}",
            serde_json::to_string_pretty(&catalog_summary(catalog)).unwrap_or_default()
        );

        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&json!({
                "model": self.model,
                "max_tokens": MAX_PLAN_TOKENS,
                "system": PLANNER_SYSTEM,
                "messages": [{"role": "user", "content": prompt}],
            }))
            .send()
            .await
            .map_err(|e| CallError::from_reqwest(e, PLANNER_TIMEOUT))?;

        if !response.status().is_success() {
            return Err(CallError::Status {
                status: response.status().as_u16(),
                message: "planner request rejected".to_string(),
            });
        }

        let body: Value = response.json().await.map_err(|e| CallError::InvalidResponse {
            message: e.to_string(),
        })?;

        let text = body["content"]
            .as_array()
            .and_then(|blocks| {
                blocks
                    .iter()
                    .find(|b| b["type"] == "text")
                    .and_then(|b| b["text"].as_str())
            })
            .ok_or_else(|| CallError::InvalidResponse {
                message: "planner response had no text block".to_string(),
            })?;

        parse_plan(text)
    }
}

/// Catalog view the planner sees: enough to pick and parameterize steps.
fn catalog_summary<'a, I>(catalog: I) -> Vec<Value>
where
    I: IntoIterator<Item = &'a Capability>,
{
    catalog
        .into_iter()
        .map(|cap| {
            json!({
                "id": cap.id,
                "name": cap.name,
                "description": cap.description,
                "cost": cap.cost.to_string(),
                "inputs": cap.inputs,
                "output": cap.output,
            })
        })
        .collect()
}

/// Parse the model's reply, tolerating stray code fences.
fn parse_plan(text: &str) -> Result<ProposedPlan, CallError> {
    let trimmed = text.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix("```").unwrap_or(trimmed).trim();

    serde_json::from_str(trimmed).map_err(|e| CallError::InvalidResponse {
        message: format!("planner returned unparseable plan: {e}"),
    })
}
