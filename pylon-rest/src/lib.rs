//! pylon-rest - HTTP server for the Pylon gateway
//!
//! One port, eleven routes:
//! - `GET /health`, `GET /status` - liveness and per-capability reliability
//! - `GET /capabilities`, `GET /mcp`, `GET /providers` - catalog surfaces
//! - `GET /discover?q=` - marketplace search passthrough
//! - `POST /do` - payment-gated single-capability dispatch
//! - `POST /do/chain` - payment-gated multi-step orchestration
//! - `GET /usage[/capabilities|/timeline]` - self-scoped spend queries

use axum::routing::{get, post};
use axum::{middleware, Router};
use tower_http::trace::TraceLayer;

pub mod api_error;
pub mod catalog;
pub mod chain;
pub mod dispatch;
pub mod ingress;
pub mod payment;
pub mod state;
pub mod usage;

pub use api_error::ApiError;
pub use state::{GatewayState, SharedState, StartupError};

/// Build the gateway router with all middleware attached.
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(catalog::health))
        .route("/status", get(catalog::status))
        .route("/capabilities", get(catalog::capabilities))
        .route("/mcp", get(catalog::mcp_tools))
        .route("/providers", get(catalog::providers))
        .route("/discover", get(catalog::discover))
        .route("/do", post(dispatch::do_handler))
        .route("/do/chain", post(chain::chain_handler))
        .route("/usage", get(usage::totals))
        .route("/usage/capabilities", get(usage::by_capability))
        .route("/usage/timeline", get(usage::timeline))
        // Layers run bottom-up for requests: client_meta resolves identity
        // first, then the rate limit, then headers decorate the response.
        .layer(middleware::from_fn(ingress::security_headers))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            ingress::rate_limit,
        ))
        .layer(middleware::from_fn(ingress::client_meta))
        .layer(ingress::cors_layer(&state))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
