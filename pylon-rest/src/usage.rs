//! Self-scoped usage queries
//!
//! Callers read their own spend. The wallet in the query string is only
//! honored when it matches the `x-wallet-address` header or the request
//! comes from an internal peer; otherwise it is silently rewritten to the
//! header wallet so one caller can never read another's ledger.

use crate::api_error::ApiError;
use crate::ingress::{bad_request, ClientMeta};
use crate::state::SharedState;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Json;
use axum::Extension;
use chrono::NaiveDate;
use pylon_store::DateRange;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
pub struct UsageQuery {
    #[serde(default)]
    pub wallet: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
}

/// The wallet this query is allowed to see.
fn effective_wallet(
    state: &SharedState,
    headers: &HeaderMap,
    meta: ClientMeta,
    query: &UsageQuery,
) -> String {
    let header_wallet = headers
        .get("x-wallet-address")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let query_wallet = query.wallet.clone().filter(|s| !s.is_empty());

    if meta.is_internal(state) {
        return query_wallet
            .or(header_wallet)
            .unwrap_or_else(|| "anonymous".to_string());
    }

    match (&header_wallet, &query_wallet) {
        (Some(header), Some(query)) if header != query => {
            tracing::warn!(header = %header, query = %query,
                "usage query wallet mismatch; rewriting to header wallet");
        }
        _ => {}
    }
    header_wallet.unwrap_or_else(|| "anonymous".to_string())
}

fn parse_range(query: &UsageQuery) -> Result<DateRange, ApiError> {
    let parse = |value: &Option<String>, name: &str| -> Result<Option<NaiveDate>, ApiError> {
        match value {
            None => Ok(None),
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|_| bad_request(&format!("'{name}' must be a YYYY-MM-DD date"))),
        }
    };
    Ok(DateRange {
        from: parse(&query.from, "from")?,
        to: parse(&query.to, "to")?,
    })
}

pub async fn totals(
    State(state): State<SharedState>,
    Extension(meta): Extension<ClientMeta>,
    headers: HeaderMap,
    Query(query): Query<UsageQuery>,
) -> Result<Json<Value>, ApiError> {
    let wallet = effective_wallet(&state, &headers, meta, &query);
    let range = parse_range(&query)?;
    let totals = state
        .ledger
        .totals(&wallet, range)
        .map_err(internal_error)?;
    Ok(Json(json!({
        "wallet": wallet,
        "totals": {
            "totalCalls": totals.total_calls,
            "totalSpend": totals.total_spend.to_string(),
            "successRate": totals.success_rate,
            "avgLatencyMs": totals.avg_latency_ms,
            "firstCall": totals.first_call,
            "lastCall": totals.last_call,
        },
    })))
}

pub async fn by_capability(
    State(state): State<SharedState>,
    Extension(meta): Extension<ClientMeta>,
    headers: HeaderMap,
    Query(query): Query<UsageQuery>,
) -> Result<Json<Value>, ApiError> {
    let wallet = effective_wallet(&state, &headers, meta, &query);
    let range = parse_range(&query)?;
    let usage = state
        .ledger
        .by_capability(&wallet, range)
        .map_err(internal_error)?;
    Ok(Json(json!({
        "wallet": wallet,
        "capabilities": usage
            .iter()
            .map(|row| json!({
                "capability": row.capability,
                "calls": row.calls,
                "spend": row.spend.to_string(),
                "successRate": row.success_rate,
                "avgLatencyMs": row.avg_latency_ms,
            }))
            .collect::<Vec<_>>(),
    })))
}

pub async fn timeline(
    State(state): State<SharedState>,
    Extension(meta): Extension<ClientMeta>,
    headers: HeaderMap,
    Query(query): Query<UsageQuery>,
) -> Result<Json<Value>, ApiError> {
    let wallet = effective_wallet(&state, &headers, meta, &query);
    let range = parse_range(&query)?;
    let days = state
        .ledger
        .timeline(&wallet, range)
        .map_err(internal_error)?;
    Ok(Json(json!({
        "wallet": wallet,
        "timeline": days
            .iter()
            .map(|day| json!({
                "date": day.date,
                "calls": day.calls,
                "spend": day.spend.to_string(),
            }))
            .collect::<Vec<_>>(),
    })))
}

fn internal_error(error: pylon_store::StoreError) -> ApiError {
    tracing::error!(%error, "usage query failed");
    ApiError::new(
        axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        json!({ "error": "internal_error", "message": "usage query failed" }),
    )
}
