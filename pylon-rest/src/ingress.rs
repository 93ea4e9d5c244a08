//! Ingress middleware
//!
//! Security headers on every response, a closed CORS allow-list, and the
//! coarse per-IP rate limit. Also resolves the client identity used by the
//! limiter and by internal-peer checks: trust decisions use the socket
//! peer, never the spoofable forwarded header.

use crate::api_error::ApiError;
use crate::state::SharedState;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::{HeaderName, HeaderValue};
use axum::http::{Method, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use pylon_core::rate_limit::client_ip;
use pylon_core::GatewayError;
use std::net::{IpAddr, SocketAddr};
use tower_http::cors::CorsLayer;

/// Paths exempt from rate limiting.
const UNLIMITED_PATHS: &[&str] = &["/health", "/status"];

/// Request headers CORS exposes to browsers.
const CORS_HEADERS: &[&str] = &[
    "content-type",
    "x-wallet-address",
    "x-payment",
    "x-test-key",
    "payment-signature",
];

/// Who is calling: the socket peer and the effective client address.
///
/// `client` honors the left-most `x-forwarded-for` entry and feeds the rate
/// limiter. `peer` is the raw socket address and gates internal-only
/// surfaces. A `None` peer means the request never crossed a TCP socket
/// (in-process tests); that is treated as loopback.
#[derive(Debug, Clone, Copy)]
pub struct ClientMeta {
    pub peer: Option<IpAddr>,
    pub client: Option<IpAddr>,
}

impl ClientMeta {
    pub fn is_internal(&self, state: &SharedState) -> bool {
        match self.peer {
            Some(peer) => state.config.is_internal_peer(peer),
            None => true,
        }
    }
}

/// Resolve and attach [`ClientMeta`] to the request.
pub async fn client_meta(mut request: Request, next: Next) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip());
    let forwarded = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let meta = ClientMeta {
        peer,
        client: client_ip(forwarded.as_deref(), peer),
    };
    request.extensions_mut().insert(meta);
    next.run(request).await
}

/// Per-IP token bucket; health and status stay reachable for probes.
pub async fn rate_limit(
    State(state): State<SharedState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let path = request.uri().path();
    if UNLIMITED_PATHS.contains(&path) {
        return Ok(next.run(request).await);
    }

    let meta = request
        .extensions()
        .get::<ClientMeta>()
        .copied()
        .unwrap_or(ClientMeta {
            peer: None,
            client: None,
        });
    let ip = meta
        .client
        .unwrap_or_else(|| IpAddr::from([127, 0, 0, 1]));

    if state.limiter.allow(ip) {
        Ok(next.run(request).await)
    } else {
        tracing::warn!(%ip, path, "rate limit exceeded");
        Err(GatewayError::RateLimited.into())
    }
}

/// Strict security headers on every response.
pub async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        HeaderName::from_static("x-frame-options"),
        HeaderValue::from_static("DENY"),
    );
    headers.insert(
        HeaderName::from_static("strict-transport-security"),
        HeaderValue::from_static("max-age=31536000; includeSubDomains"),
    );
    headers.insert(
        HeaderName::from_static("x-xss-protection"),
        HeaderValue::from_static("1; mode=block"),
    );
    response
}

/// Closed CORS allow-list: gateway domains plus localhost.
pub fn cors_layer(state: &SharedState) -> CorsLayer {
    let origins: Vec<HeaderValue> = state
        .config
        .allowed_origins()
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    let headers: Vec<HeaderName> = CORS_HEADERS
        .iter()
        .filter_map(|h| h.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(headers)
}

/// Map a rejected JSON body into a 400 rather than axum's default 422.
pub fn bad_request(message: &str) -> ApiError {
    ApiError::new(
        StatusCode::BAD_REQUEST,
        serde_json::json!({ "error": "bad_request", "message": message }),
    )
}
