//! Single-capability dispatch (`POST /do`)
//!
//! Resolution order mirrors the payment contract: pick the capability,
//! check the caller's budget, collect payment against the quoted cost, and
//! only then finish parameter extraction and call the backend. A dispatch
//! that fails after verification still bills (the payment settles) and is
//! recorded with `success=false`; the one exception is an open circuit,
//! which never reaches the backend.

use crate::api_error::ApiError;
use crate::ingress::{bad_request, ClientMeta};
use crate::payment::{caller_identity, ensure_paid, quote_for, spawn_settlement, PaymentContext};
use crate::state::SharedState;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Json;
use axum::Extension;
use pylon_client::call_with_reliability;
use pylon_core::discovery::{admissible, normalize, search_term};
use pylon_core::{
    extract::extract_params, matcher, Capability, GatewayError, MicroUsd, Rounding, GATEWAY_NAME,
    GATEWAY_VERSION,
};
use pylon_store::UsageRecord;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Instant;

#[derive(Debug, Deserialize)]
pub struct DoRequest {
    #[serde(default)]
    pub task: Option<String>,
    #[serde(default)]
    pub capability: Option<String>,
    #[serde(default)]
    pub params: Option<Map<String, Value>>,
    #[serde(default)]
    pub budget: Option<String>,
}

pub async fn do_handler(
    State(state): State<SharedState>,
    Extension(meta): Extension<ClientMeta>,
    headers: HeaderMap,
    Json(request): Json<DoRequest>,
) -> Result<Json<Value>, ApiError> {
    let started = Instant::now();

    let capability = resolve_capability(&state, &request).await?;
    enforce_budget(&capability, request.budget.as_deref())?;

    // Payment is quoted on the chosen capability before params are
    // finalized; a later dispatch failure is the caller's loss by contract.
    let quote = quote_for(&state, &capability);
    let payment = ensure_paid(&state, &headers, meta, &quote).await?;
    let caller = caller_identity(&headers, &payment);

    // Every paid dispatch gets a correlation id that rides the response
    // metadata and the failure logs.
    let request_id = uuid::Uuid::new_v4().to_string();

    // Once payment is verified the dispatch runs in its own task: a caller
    // disconnect must not abandon a paid backend call before the ledger
    // and settlement catch up.
    let handle = tokio::spawn(run_paid_dispatch(
        state.clone(),
        capability,
        request,
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
            tracing::warn!(%request_id, code = %error.code(), "paid dispatch failed");
            error.body["requestId"] = json!(request_id);
            Err(error)
        }
        Err(error) => {
            tracing::error!(%request_id, %error, "paid dispatch task panicked");
            Err(ApiError::internal("dispatch failed"))
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_paid_dispatch(
    state: SharedState,
    capability: Capability,
    request: DoRequest,
    payment: PaymentContext,
    quote: pylon_client::PaymentQuote,
    caller: String,
    started: Instant,
) -> Result<Value, ApiError> {
    let params = match resolve_params(&capability, &request) {
        Ok(params) => params,
        Err(error) => {
            return Err(billed_failure(
                &state, &capability, &payment, &quote, &caller, started, error,
            ));
        }
    };

    if capability.is_discovered() {
        if let Err(blocked) = pylon_core::check_endpoint(&capability.endpoint) {
            return Err(billed_failure(
                &state,
                &capability,
                &payment,
                &quote,
                &caller,
                started,
                GatewayError::BlockedEndpoint {
                    reason: blocked.to_string(),
                },
            ));
        }
    }

    let breaker = state.breaker_for(&capability.id);
    let outcome = match call_with_reliability(
        &breaker,
        &state.retry_schedule,
        &state.backend,
        &capability,
        &params,
    )
    .await
    {
        Ok(outcome) => outcome,
        Err(error) => {
            return Err(billed_failure(
                &state, &capability, &payment, &quote, &caller, started, error,
            ));
        }
    };

    let duration_ms = started.elapsed().as_millis() as u64;
    state.record_usage(&UsageRecord::now(
        &caller,
        &capability.id,
        capability.cost,
        true,
        duration_ms,
    ));
    spawn_settlement(&state, &payment, &quote);

    let mut envelope = json!({
        "success": true,
        "capability": {
            "id": capability.id,
            "name": capability.name,
            "cost": capability.cost.to_string(),
            "source": capability.tier,
        },
        "params": params,
        "result": outcome.response.body,
        "meta": {
            "contentType": outcome.response.content_type,
            "durationMs": duration_ms,
            "gateway": GATEWAY_NAME,
            "version": GATEWAY_VERSION,
            "retries": outcome.retries,
            "quality": {
                "backendStatus": outcome.response.status,
                "backendResponseMs": outcome.backend_ms,
                "gatewayOverheadMs": duration_ms.saturating_sub(outcome.backend_ms),
            },
        },
    });

    if let Some(provider_cost) = capability.provider_cost {
        envelope["pricing"] = json!({
            "providerCost": provider_cost.to_string(),
            "gatewayCost": capability.cost.to_string(),
            "gatewayFee": capability.gateway_fee().to_string(),
        });
    }

    if let Some(task) = &request.task {
        if matcher::looks_multi_step(task) {
            envelope["multiStepHint"] = json!({
                "message": "This task looks like a multi-step chain.",
                "endpoint": "/do/chain",
            });
        }
    }

    Ok(envelope)
}

/// Explicit id wins; otherwise match the task against the catalog, and as
/// a last resort ask the marketplace and activate the best candidate.
async fn resolve_capability(
    state: &SharedState,
    request: &DoRequest,
) -> Result<Capability, ApiError> {
    if let Some(id) = &request.capability {
        return state
            .find_capability(id)
            .ok_or_else(|| GatewayError::UnknownCapability { id: id.clone() }.into());
    }

    let Some(task) = request.task.as_deref().map(str::trim).filter(|t| !t.is_empty()) else {
        return Err(GatewayError::MissingTask.into());
    };

    let catalog = state.full_catalog();
    if let Some(capability) = matcher::best_match(&catalog, task) {
        return Ok(capability.clone());
    }

    if let Some(capability) = discover_for_task(state, task).await {
        return Ok(capability);
    }

    Err(GatewayError::NoMatchingCapability {
        task: task.to_string(),
    }
    .into())
}

/// Marketplace fallback: derive a search term, consult the shared cache,
/// and activate the first admissible listing.
async fn discover_for_task(state: &SharedState, task: &str) -> Option<Capability> {
    let term = search_term(task)?;

    let listings = match state.discovery_cache.get(&term) {
        Some(cached) => cached,
        None => match state.bazaar.search(&term).await {
            Ok(listings) => {
                state.discovery_cache.put(&term, listings.clone());
                listings
            }
            Err(error) => {
                tracing::warn!(%error, %term, "marketplace search failed");
                return None;
            }
        },
    };

    let candidate = listings.iter().find(|listing| admissible(listing))?;
    let capability = state.activate_discovered(normalize(candidate));
    tracing::info!(capability = %capability.id, %term, "activated discovered capability");
    Some(capability)
}

/// Budgets parse toward zero so a caller cap is never inflated.
fn enforce_budget(capability: &Capability, budget: Option<&str>) -> Result<(), ApiError> {
    let Some(budget) = budget else {
        return Ok(());
    };
    let budget = MicroUsd::parse(budget, Rounding::TowardZero)
        .map_err(|_| bad_request("budget is not a valid amount"))?;
    if capability.cost > budget {
        return Err(GatewayError::OverBudget {
            capability: capability.id.clone(),
            cost: capability.cost,
            budget,
        }
        .into());
    }
    Ok(())
}

fn resolve_params(
    capability: &Capability,
    request: &DoRequest,
) -> Result<Map<String, Value>, GatewayError> {
    let mut params = match &request.params {
        Some(explicit) if !explicit.is_empty() => explicit.clone(),
        _ => request
            .task
            .as_deref()
            .map(|task| extract_params(capability, task))
            .unwrap_or_default(),
    };
    capability.apply_defaults(&mut params);

    let missing = capability.missing_required(&params);
    if missing.is_empty() {
        Ok(params)
    } else {
        Err(GatewayError::MissingParams {
            capability: capability.id.clone(),
            missing,
            schema: json!(capability.inputs),
            extracted: Value::Object(params),
        })
    }
}

/// A failure after the payment gate: the payment settles (unless the
/// circuit short-circuited) and the ledger gets a failure record either
/// way.
fn billed_failure(
    state: &SharedState,
    capability: &Capability,
    payment: &PaymentContext,
    quote: &pylon_client::PaymentQuote,
    caller: &str,
    started: Instant,
    error: GatewayError,
) -> ApiError {
    // An open circuit never reached the backend; its record keeps the
    // ledger complete but carries no spend and nothing settles.
    let bills = error.bills_caller();
    let cost = if bills { capability.cost } else { MicroUsd::ZERO };
    state.record_usage(&UsageRecord::now(
        caller,
        &capability.id,
        cost,
        false,
        started.elapsed().as_millis() as u64,
    ));
    if bills {
        spawn_settlement(state, payment, quote);
    }
    error.into()
}
