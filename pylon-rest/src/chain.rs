//! Multi-step orchestration (`POST /do/chain`)
//!
//! Plan with the external model, validate against the registry and the
//! spending cap, collect one payment for the whole chain, then execute the
//! steps strictly in order with per-step and total timeouts. Planner-level
//! failures never bill; step failures after payment do.

use crate::api_error::ApiError;
use crate::ingress::ClientMeta;
use crate::payment::{caller_identity, ensure_paid, spawn_settlement, PaymentContext};
use crate::state::SharedState;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Json;
use axum::Extension;
use pylon_client::{call_with_reliability, PaymentQuote};
use pylon_core::plan::{step_params, validate_plan, CHAIN_TIMEOUT_MS, STEP_TIMEOUT_MS};
use pylon_core::{
    ChainPlan, GatewayError, MicroUsd, Rounding, GATEWAY_NAME, GATEWAY_VERSION,
};
use pylon_store::UsageRecord;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::{Duration, Instant};

#[derive(Debug, Deserialize)]
pub struct ChainRequest {
    pub task: String,
    #[serde(default)]
    pub budget: Option<String>,
    #[serde(default, rename = "dryRun")]
    pub dry_run: bool,
}

pub async fn chain_handler(
    State(state): State<SharedState>,
    Extension(meta): Extension<ClientMeta>,
    headers: HeaderMap,
    Json(request): Json<ChainRequest>,
) -> Result<Json<Value>, ApiError> {
    let started = Instant::now();

    if request.task.trim().is_empty() {
        return Err(GatewayError::MissingTask.into());
    }

    let budget = match &request.budget {
        Some(raw) => Some(MicroUsd::parse(raw, Rounding::TowardZero).map_err(|_| {
            ApiError::from(GatewayError::OrchestrationFailed {
                reason: "budget is not a valid amount".to_string(),
            })
        })?),
        None => None,
    };

    let plan = propose_plan(&state, &request.task, budget).await?;

    if request.dry_run {
        return Ok(Json(json!({
            "success": true,
            "dryRun": true,
            "plan": plan_view(&plan),
            "totalCost": plan.total_cost.to_string(),
        })));
    }

    // One payment up front covers the whole chain.
    let quote = PaymentQuote {
        amount: plan.total_cost,
        pay_to: state.config.pay_to.clone(),
        network: state.config.network.clone(),
        resource: "pylon://chain".to_string(),
        description: format!("{}-step capability chain", plan.steps.len()),
    };
    let payment = ensure_paid(&state, &headers, meta, &quote).await?;
    let caller = caller_identity(&headers, &payment);

    let request_id = uuid::Uuid::new_v4().to_string();

    // Paid execution runs detached from the connection so a disconnect
    // cannot orphan half-billed steps.
    let handle = tokio::spawn(run_paid_chain(
        state.clone(),
        plan,
        payment,
        quote,
        caller,
        started,
    ));
    match handle.await {
        Ok(Ok(mut envelope)) => {
            envelope["meta"]["requestId"] = json!(request_id);
            Ok(Json(envelope))
        }
        Ok(Err(mut error)) => {
            tracing::warn!(%request_id, code = %error.code(), "chain execution failed");
            error.body["requestId"] = json!(request_id);
            Err(error)
        }
        Err(error) => {
            tracing::error!(%request_id, %error, "paid chain task panicked");
            Err(ApiError::internal("chain execution failed"))
        }
    }
}

async fn run_paid_chain(
    state: SharedState,
    plan: ChainPlan,
    payment: PaymentContext,
    quote: PaymentQuote,
    caller: String,
    started: Instant,
) -> Result<Value, ApiError> {
    let execution = tokio::time::timeout(
        Duration::from_millis(CHAIN_TIMEOUT_MS),
        execute_steps(&state, &plan, &caller),
    )
    .await;

    let total_duration_ms = started.elapsed().as_millis() as u64;

    let steps_run = match execution {
        Ok(Ok(steps_run)) => steps_run,
        Ok(Err(failure)) => {
            // Step failures bill: the payment settles and the trace shows
            // where the chain died.
            spawn_settlement(&state, &payment, &quote);
            let mut api: ApiError = failure.error.into();
            api.body["partialResults"] = json!(failure.completed);
            api.body["totalDurationMs"] = json!(total_duration_ms);
            return Err(api);
        }
        Err(_) => {
            spawn_settlement(&state, &payment, &quote);
            return Err(GatewayError::TotalTimeout {
                timeout_ms: CHAIN_TIMEOUT_MS,
            }
            .into());
        }
    };

    spawn_settlement(&state, &payment, &quote);

    let final_result = steps_run
        .last()
        .map(|step| step["result"].clone())
        .unwrap_or(Value::Null);
    let final_content_type = steps_run
        .last()
        .and_then(|step| step["contentType"].as_str())
        .unwrap_or("application/json")
        .to_string();

    Ok(json!({
        "success": true,
        "finalResult": final_result,
        "allSteps": steps_run,
        "costBreakdown": plan
            .steps
            .iter()
            .zip(&plan.step_costs)
            .map(|(step, cost)| json!({
                "capability": step.capability_id,
                "cost": cost.to_string(),
            }))
            .collect::<Vec<_>>(),
        "totalCost": plan.total_cost.to_string(),
        "meta": {
            "contentType": final_content_type,
            "totalDurationMs": total_duration_ms,
            "gateway": GATEWAY_NAME,
            "version": GATEWAY_VERSION,
        },
    }))
}

/// Ask the planner for steps and validate them. Nothing here has billed
/// the caller yet.
async fn propose_plan(
    state: &SharedState,
    task: &str,
    budget: Option<MicroUsd>,
) -> Result<ChainPlan, ApiError> {
    let Some(planner) = &state.planner else {
        return Err(GatewayError::OrchestrationFailed {
            reason: "chain planner is not configured".to_string(),
        }
        .into());
    };

    let catalog: Vec<_> = state.registry.list().cloned().collect();
    let proposed = planner.plan(task, &catalog).await.map_err(|error| {
        tracing::warn!(%error, "chain planning failed");
        ApiError::from(GatewayError::OrchestrationFailed {
            reason: format!("planner error: {error}"),
        })
    })?;

    validate_plan(proposed.steps, &state.registry, budget).map_err(ApiError::from)
}

struct StepFailure {
    error: GatewayError,
    completed: Vec<Value>,
}

/// Run the steps strictly sequentially, appending a usage record per step.
async fn execute_steps(
    state: &SharedState,
    plan: &ChainPlan,
    caller: &str,
) -> Result<Vec<Value>, StepFailure> {
    let mut results: Vec<Value> = Vec::with_capacity(plan.steps.len());
    let mut views: Vec<Value> = Vec::with_capacity(plan.steps.len());

    for (index, (step, cost)) in plan.steps.iter().zip(&plan.step_costs).enumerate() {
        // Validation guaranteed the id exists at plan time; the registry is
        // immutable, so this lookup cannot miss.
        let Some(capability) = state.find_capability(&step.capability_id) else {
            return Err(StepFailure {
                error: GatewayError::StepFailed {
                    index,
                    capability: step.capability_id.clone(),
                    reason: "capability vanished between planning and execution".to_string(),
                },
                completed: views,
            });
        };

        let params = step_params(step, &capability, &results);
        let step_started = Instant::now();
        let breaker = state.breaker_for(&capability.id);

        let outcome = tokio::time::timeout(
            Duration::from_millis(STEP_TIMEOUT_MS),
            call_with_reliability(
                &breaker,
                &state.retry_schedule,
                &state.backend,
                &capability,
                &params,
            ),
        )
        .await;

        let step_ms = step_started.elapsed().as_millis() as u64;
        match outcome {
            Ok(Ok(call)) => {
                state.record_usage(&UsageRecord::now(
                    caller,
                    &capability.id,
                    *cost,
                    true,
                    step_ms,
                ));
                let result_value = call.response.body.as_value();
                views.push(json!({
                    "step": index,
                    "capability": capability.id,
                    "params": params,
                    "result": result_value.clone(),
                    "contentType": call.response.content_type,
                    "durationMs": step_ms,
                    "retries": call.retries,
                }));
                results.push(result_value);
            }
            Ok(Err(error)) => {
                state.record_usage(&UsageRecord::now(
                    caller,
                    &capability.id,
                    *cost,
                    false,
                    step_ms,
                ));
                return Err(StepFailure {
                    error: GatewayError::StepFailed {
                        index,
                        capability: capability.id.clone(),
                        reason: error.to_string(),
                    },
                    completed: views,
                });
            }
            Err(_) => {
                state.record_usage(&UsageRecord::now(
                    caller,
                    &capability.id,
                    *cost,
                    false,
                    step_ms,
                ));
                return Err(StepFailure {
                    error: GatewayError::StepTimeout {
                        index,
                        capability: capability.id.clone(),
                        timeout_ms: STEP_TIMEOUT_MS,
                    },
                    completed: views,
                });
            }
        }
    }

    Ok(views)
}

fn plan_view(plan: &ChainPlan) -> Value {
    json!({
        "steps": plan
            .steps
            .iter()
            .zip(&plan.step_costs)
            .map(|(step, cost)| json!({
                "capabilityId": step.capability_id,
                "params": step.params,
                "inputMapping": step.input_mapping,
                "cost": cost.to_string(),
            }))
            .collect::<Vec<_>>(),
        "totalCost": plan.total_cost.to_string(),
    })
}
