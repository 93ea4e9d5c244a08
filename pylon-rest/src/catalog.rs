//! Unpaid read surfaces
//!
//! Liveness, per-capability reliability status, the catalog in plain and
//! agent-tool form, partner providers, and the marketplace search
//! passthrough.

use crate::api_error::ApiError;
use crate::state::SharedState;
use axum::extract::{Query, State};
use axum::response::Json;
use pylon_core::discovery::{admissible, search_term};
use pylon_core::{matcher, Capability, SourceTier, GATEWAY_NAME, GATEWAY_VERSION};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;

pub async fn health(State(state): State<SharedState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": GATEWAY_NAME,
        "version": GATEWAY_VERSION,
        "capabilities": state.registry.len() + state.discovered_count(),
        "uptimeSecs": state.started_at.elapsed().as_secs(),
    }))
}

/// Circuit state and lifetime counters per capability that has seen
/// traffic.
pub async fn status(State(state): State<SharedState>) -> Json<Value> {
    let mut capabilities = BTreeMap::new();
    for (id, snapshot) in state.breaker_snapshots() {
        capabilities.insert(
            id,
            json!({
                "state": snapshot.state,
                "successes": snapshot.successes,
                "failures": snapshot.failures,
                "totalCalls": snapshot.total_calls,
                "avgLatencyMs": snapshot.avg_latency_ms,
                "windowFailureRate": snapshot.window_failure_rate,
            }),
        );
    }
    Json(json!({
        "service": GATEWAY_NAME,
        "capabilities": capabilities,
    }))
}

/// Full registry dump with schemas and costs, plus a reliability overlay
/// for capabilities with traffic.
pub async fn capabilities(State(state): State<SharedState>) -> Json<Value> {
    let snapshots: BTreeMap<String, _> = state.breaker_snapshots().into_iter().collect();
    let entries: Vec<Value> = state
        .full_catalog()
        .iter()
        .map(|capability| {
            let mut entry = capability_view(capability);
            if let Some(snapshot) = snapshots.get(&capability.id) {
                entry["reliability"] = json!({
                    "state": snapshot.state,
                    "successRate": if snapshot.total_calls > 0 {
                        snapshot.successes as f64 / snapshot.total_calls as f64
                    } else {
                        1.0
                    },
                    "avgLatencyMs": snapshot.avg_latency_ms,
                });
            }
            entry
        })
        .collect();

    Json(json!({
        "count": entries.len(),
        "capabilities": entries,
    }))
}

/// The same catalog rendered as agent-tool descriptors.
pub async fn mcp_tools(State(state): State<SharedState>) -> Json<Value> {
    let tools: Vec<Value> = state
        .full_catalog()
        .iter()
        .map(|capability| {
            let mut properties = serde_json::Map::new();
            let mut required = Vec::new();
            for (name, spec) in &capability.inputs {
                properties.insert(
                    name.clone(),
                    json!({
                        "type": spec.param_type,
                        "description": spec.description,
                    }),
                );
                if spec.required {
                    required.push(name.clone());
                }
            }
            json!({
                "name": capability.id.replace(':', "_"),
                "description": format!(
                    "{} Costs {} per request via x402.",
                    capability.description, capability.cost
                ),
                "inputSchema": {
                    "type": "object",
                    "properties": properties,
                    "required": required,
                },
            })
        })
        .collect();

    Json(json!({ "tools": tools }))
}

/// Partner providers grouped with the capabilities they back.
pub async fn providers(State(state): State<SharedState>) -> Json<Value> {
    let mut grouped: BTreeMap<String, Value> = BTreeMap::new();
    for capability in state.registry.list() {
        if capability.tier != SourceTier::Partner {
            continue;
        }
        let Some(provider) = &capability.provider else {
            continue;
        };
        let entry = grouped.entry(provider.name.clone()).or_insert_with(|| {
            json!({
                "name": provider.name,
                "payoutAddress": provider.payout_address,
                "contactUrl": provider.contact_url,
                "capabilities": [],
            })
        });
        if let Some(list) = entry["capabilities"].as_array_mut() {
            list.push(json!({
                "id": capability.id,
                "name": capability.name,
                "cost": capability.cost.to_string(),
                "revenueSplit": capability.split,
            }));
        }
    }

    Json(json!({
        "providers": grouped.into_values().collect::<Vec<_>>(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct DiscoverQuery {
    #[serde(default)]
    pub q: String,
}

/// Marketplace search passthrough plus native matches for the same query.
pub async fn discover(
    State(state): State<SharedState>,
    Query(query): Query<DiscoverQuery>,
) -> Result<Json<Value>, ApiError> {
    let q = query.q.trim();
    if q.is_empty() {
        return Err(crate::ingress::bad_request("query parameter 'q' is required"));
    }

    let catalog = state.full_catalog();
    let q_lower = q.to_lowercase();
    let mut native: Vec<(&Capability, u32)> = catalog
        .iter()
        .map(|capability| (capability, matcher::score(capability, &q_lower)))
        .filter(|(_, score)| *score > 0)
        .collect();
    native.sort_by(|a, b| b.1.cmp(&a.1));

    let marketplace = match search_term(q) {
        Some(term) => {
            let cached = state.discovery_cache.get(&term);
            let listings = match cached {
                Some(listings) => listings,
                None => match state.bazaar.search(&term).await {
                    Ok(listings) => {
                        state.discovery_cache.put(&term, listings.clone());
                        listings
                    }
                    Err(error) => {
                        tracing::warn!(%error, %term, "marketplace search failed");
                        Vec::new()
                    }
                },
            };
            listings
                .into_iter()
                .filter(|listing| admissible(listing))
                .map(|listing| {
                    let preview = pylon_core::discovery::normalize(&listing);
                    json!({
                        "id": preview.id,
                        "name": preview.name,
                        "description": preview.description,
                        "cost": preview.cost.to_string(),
                        "providerCost": listing_cost_string(&listing),
                        "endpoint": preview.endpoint,
                    })
                })
                .collect::<Vec<_>>()
        }
        None => Vec::new(),
    };

    Ok(Json(json!({
        "query": q,
        "native": native
            .iter()
            .map(|(capability, score)| {
                let mut view = capability_view(capability);
                view["matchScore"] = json!(score);
                view
            })
            .collect::<Vec<_>>(),
        "marketplace": marketplace,
    })))
}

fn listing_cost_string(listing: &pylon_core::BazaarListing) -> String {
    pylon_core::MicroUsd(listing.price_micros).to_string()
}

fn capability_view(capability: &Capability) -> Value {
    json!({
        "id": capability.id,
        "name": capability.name,
        "description": capability.description,
        "cost": capability.cost.to_string(),
        "source": capability.tier,
        "method": capability.method,
        "inputs": capability.inputs,
        "output": capability.output,
        "keywords": capability.keywords,
    })
}
