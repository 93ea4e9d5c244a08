//! Shared harness for gateway e2e tests: stub facilitator, stub backends,
//! stub planner and bazaar, all on ephemeral local ports, driven through
//! the real router with `tower::ServiceExt::oneshot`.
#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use http_body_util::BodyExt;
use pylon_core::{builtin_catalog, CapabilityRegistry, GatewayConfig, RetrySchedule};
use pylon_rest::state::GatewayState;
use pylon_rest::SharedState;
use pylon_store::UsageLedger;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceExt;

pub const TEST_KEY: &str = "pylon-test-key";

pub async fn spawn(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// Leaf capability servers: enough of the catalog to drive the scenarios.
pub async fn stub_backends() -> SocketAddr {
    let router = Router::new()
        .route(
            "/screenshot",
            get(|| async {
                ([(header::CONTENT_TYPE, "image/png")], b"\x89PNGfake-screenshot-bytes".to_vec())
            }),
        )
        .route(
            "/generate",
            get(|| async { ([(header::CONTENT_TYPE, "image/png")], b"\x89PNGfake-qr-bytes".to_vec()) }),
        )
        .route(
            "/scrape",
            get(|| async {
                Json(json!({
                    "content": "# Example Domain\nThis domain is for use in examples.",
                    "title": "Example Domain"
                }))
            }),
        )
        .route(
            "/search",
            get(|| async { Json(json!({"results": [{"title": "hit", "url": "https://a.com"}]})) }),
        )
        .route(
            "/convert",
            post(|| async {
                ([(header::CONTENT_TYPE, "application/pdf")], b"%PDF-1.4 fake".to_vec())
            }),
        )
        .route("/ocr", get(|| async { Json(json!({"text": "recognized text"})) }))
        .route(
            "/validate",
            get(|| async { Json(json!({"valid": true, "deliverable": true})) }),
        );
    spawn(router).await
}

/// Facilitator that accepts proofs starting with `valid` and rejects the
/// rest.
pub async fn stub_facilitator() -> SocketAddr {
    let router = Router::new()
        .route(
            "/verify",
            post(|Json(body): Json<Value>| async move {
                let proof = body["paymentPayload"].as_str().unwrap_or("");
                if proof.starts_with("valid") {
                    Json(json!({"isValid": true}))
                } else {
                    Json(json!({"isValid": false, "invalidReason": "unknown proof"}))
                }
            }),
        )
        .route("/settle", post(|| async { Json(json!({"settled": true})) }));
    spawn(router).await
}

/// Planner that always answers with the given plan JSON, wrapped in the
/// messages-API response shape.
pub async fn stub_planner(plan: Value) -> SocketAddr {
    let router = Router::new().route(
        "/v1/messages",
        post(move || {
            let plan = plan.clone();
            async move {
                Json(json!({
                    "content": [{"type": "text", "text": plan.to_string()}],
                    "stop_reason": "end_turn"
                }))
            }
        }),
    );
    spawn(router).await
}

/// Marketplace returning a fixed listing set.
pub async fn stub_bazaar(items: Value) -> SocketAddr {
    let router = Router::new().route(
        "/discovery/resources",
        get(move || {
            let items = items.clone();
            async move { Json(json!({"items": items})) }
        }),
    );
    spawn(router).await
}

/// A backend whose every route fails with 500, for breaker tests.
pub async fn stub_failing_backends() -> SocketAddr {
    async fn fail() -> impl IntoResponse {
        (StatusCode::INTERNAL_SERVER_ERROR, "backend exploded")
    }
    let router = Router::new()
        .route("/screenshot", get(fail))
        .route("/search", get(fail));
    spawn(router).await
}

pub struct TestGateway {
    pub state: SharedState,
}

impl TestGateway {
    /// Gateway wired to the given stubs, with an in-memory ledger, the
    /// test bypass key enabled, and a no-delay retry schedule.
    pub async fn new(
        backends: SocketAddr,
        facilitator: SocketAddr,
        planner: Option<SocketAddr>,
        bazaar: Option<SocketAddr>,
    ) -> Self {
        let config = GatewayConfig {
            backend_base: format!("http://{backends}"),
            facilitator_url: format!("http://{facilitator}"),
            bazaar_url: bazaar
                .map(|addr| format!("http://{addr}"))
                .unwrap_or_else(|| "http://127.0.0.1:9".to_string()),
            planner_api_key: planner.map(|_| "test-planner-key".to_string()),
            planner_url: planner
                .map(|addr| format!("http://{addr}"))
                .unwrap_or_else(|| "http://127.0.0.1:9".to_string()),
            test_key: Some(TEST_KEY.to_string()),
            pay_to: "0xGatewayPayout".to_string(),
            ..GatewayConfig::default()
        };
        let registry =
            CapabilityRegistry::load(builtin_catalog(&config.backend_base).unwrap()).unwrap();
        let ledger = UsageLedger::in_memory().unwrap();
        let mut state = GatewayState::with_parts(config, registry, ledger).unwrap();
        state.retry_schedule = RetrySchedule::new(vec![0, 0]);
        Self {
            state: Arc::new(state),
        }
    }

    pub fn router(&self) -> Router {
        pylon_rest::router(self.state.clone())
    }

    pub async fn post(
        &self,
        path: &str,
        body: Value,
        headers: &[(&str, &str)],
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder.body(Body::from(body.to_string())).unwrap();
        Self::send(self.router(), request).await
    }

    pub async fn get(&self, path: &str, headers: &[(&str, &str)]) -> (StatusCode, Value) {
        let mut builder = Request::builder().method("GET").uri(path);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder.body(Body::empty()).unwrap();
        Self::send(self.router(), request).await
    }

    /// GET as if the TCP peer were `peer`, for internal-vs-external rules.
    pub async fn get_from(
        &self,
        path: &str,
        headers: &[(&str, &str)],
        peer: SocketAddr,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method("GET")
            .uri(path)
            .extension(axum::extract::ConnectInfo(peer));
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder.body(Body::empty()).unwrap();
        Self::send(self.router(), request).await
    }

    async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }
}

/// Full wiring with working stubs for the common case.
pub async fn default_gateway() -> TestGateway {
    let backends = stub_backends().await;
    let facilitator = stub_facilitator().await;
    TestGateway::new(backends, facilitator, None, None).await
}
