//! Chain plans
//!
//! A plan is an ordered list of capability invocations with output piping.
//! The planner (an external LLM) proposes it; validation and input-mapping
//! resolution here are pure so the orchestrator stays a thin executor.

use crate::error::GatewayError;
use crate::money::MicroUsd;
use crate::registry::CapabilityRegistry;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::OnceLock;

/// Hard ceiling on what a single chain may cost, regardless of budget.
pub const CHAIN_COST_CEILING: MicroUsd = MicroUsd(500_000);

/// Most steps a plan may contain.
pub const MAX_STEPS: usize = 5;

/// Per-step execution timeout.
pub const STEP_TIMEOUT_MS: u64 = 30_000;

/// Whole-chain execution timeout.
pub const CHAIN_TIMEOUT_MS: u64 = 120_000;

/// One planned capability invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainStep {
    #[serde(rename = "capabilityId")]
    pub capability_id: String,
    /// Literal parameters fixed at plan time.
    #[serde(default)]
    pub params: Map<String, Value>,
    /// Parameter name → dotted path into earlier step outputs,
    /// e.g. `steps[0].content`.
    #[serde(default, rename = "inputMapping")]
    pub input_mapping: Map<String, Value>,
}

/// A validated, costed plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainPlan {
    pub steps: Vec<ChainStep>,
    /// Per-step costs resolved from the registry, same order as `steps`.
    #[serde(default)]
    pub step_costs: Vec<MicroUsd>,
    #[serde(default)]
    pub total_cost: MicroUsd,
}

fn mapping_path_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| match Regex::new(r"^steps\[(\d+)\]\.(.+)$") {
        Ok(re) => re,
        Err(_) => unreachable!("static regex pattern is valid"),
    })
}

/// Resolve a mapping path like `steps[0].content.title` against earlier
/// step results. A pure lookup: no interpolation, no expressions. `None`
/// when the path does not resolve, in which case the literal param wins.
pub fn resolve_mapping(path: &str, prior_results: &[Value]) -> Option<Value> {
    let caps = mapping_path_regex().captures(path.trim())?;
    let index: usize = caps.get(1)?.as_str().parse().ok()?;
    let mut current = prior_results.get(index)?;
    for field in caps.get(2)?.as_str().split('.') {
        current = current.get(field)?;
    }
    Some(current.clone())
}

/// Validate a proposed plan against the registry and a spending cap.
///
/// Checks, in order: step count in 1..=5, every capability id known, and
/// the summed step costs within `min(budget, CHAIN_COST_CEILING)`. Returns
/// the plan with costs filled in.
pub fn validate_plan(
    steps: Vec<ChainStep>,
    registry: &CapabilityRegistry,
    budget: Option<MicroUsd>,
) -> Result<ChainPlan, GatewayError> {
    if steps.is_empty() || steps.len() > MAX_STEPS {
        return Err(GatewayError::OrchestrationFailed {
            reason: format!("plan must have 1 to {MAX_STEPS} steps, got {}", steps.len()),
        });
    }

    let mut step_costs = Vec::with_capacity(steps.len());
    let mut total = MicroUsd::ZERO;
    for step in &steps {
        let capability = registry.by_id(&step.capability_id).ok_or_else(|| {
            GatewayError::OrchestrationFailed {
                reason: format!("plan references unknown capability '{}'", step.capability_id),
            }
        })?;
        step_costs.push(capability.cost);
        total = total.saturating_add(capability.cost);
    }

    let cap = budget.map_or(CHAIN_COST_CEILING, |b| b.min(CHAIN_COST_CEILING));
    if total > cap {
        return Err(GatewayError::OrchestrationFailed {
            reason: format!("plan cost {total} exceeds limit {cap}"),
        });
    }

    Ok(ChainPlan {
        steps,
        step_costs,
        total_cost: total,
    })
}

/// Build the effective parameters for one step:
/// schema defaults ← literal params ← resolved input mappings.
pub fn step_params(
    step: &ChainStep,
    capability: &crate::capability::Capability,
    prior_results: &[Value],
) -> Map<String, Value> {
    let mut params = step.params.clone();
    for (name, path) in &step.input_mapping {
        let Some(path) = path.as_str() else { continue };
        if let Some(resolved) = resolve_mapping(path, prior_results) {
            params.insert(name.clone(), resolved);
        }
    }
    capability.apply_defaults(&mut params);
    params
}
