//! Ingress surfaces: catalog endpoints, security headers, rate limiting,
//! and marketplace discovery.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{default_gateway, stub_backends, stub_bazaar, stub_facilitator, TestGateway};
use http_body_util::BodyExt;
use serde_json::json;
use tower::ServiceExt;

#[tokio::test]
async fn e2e_health_reports_catalog_size() {
    let gateway = default_gateway().await;
    let (status, body) = gateway.get("/health", &[]).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "pylon");
    assert!(body["capabilities"].as_u64().unwrap() >= 12);
}

#[tokio::test]
async fn e2e_security_headers_on_every_response() {
    let gateway = default_gateway().await;
    let response = gateway
        .router()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    let headers = response.headers();
    assert_eq!(headers["x-content-type-options"], "nosniff");
    assert_eq!(headers["x-frame-options"], "DENY");
    assert!(headers.contains_key("strict-transport-security"));
    assert_eq!(headers["x-xss-protection"], "1; mode=block");
}

#[tokio::test]
async fn e2e_capabilities_lists_schemas_and_costs() {
    let gateway = default_gateway().await;
    let (status, body) = gateway.get("/capabilities", &[]).await;

    assert_eq!(status, StatusCode::OK);
    let caps = body["capabilities"].as_array().unwrap();
    assert_eq!(body["count"].as_u64().unwrap() as usize, caps.len());

    let screenshot = caps.iter().find(|c| c["id"] == "screenshot").unwrap();
    assert_eq!(screenshot["cost"], "$0.01");
    assert_eq!(screenshot["inputs"]["url"]["required"], true);
}

#[tokio::test]
async fn e2e_mcp_tools_render_input_schemas() {
    let gateway = default_gateway().await;
    let (status, body) = gateway.get("/mcp", &[]).await;

    assert_eq!(status, StatusCode::OK);
    let tools = body["tools"].as_array().unwrap();
    let qr = tools.iter().find(|t| t["name"] == "qr-code").unwrap();
    assert!(qr["description"].as_str().unwrap().contains("$0.005"));
    assert_eq!(qr["inputSchema"]["type"], "object");
    assert_eq!(qr["inputSchema"]["required"], json!(["data"]));
}

#[tokio::test]
async fn e2e_providers_grouped() {
    let gateway = default_gateway().await;
    let (status, body) = gateway.get("/providers", &[]).await;

    assert_eq!(status, StatusCode::OK);
    let providers = body["providers"].as_array().unwrap();
    let recon = providers.iter().find(|p| p["name"] == "Recon Labs").unwrap();
    assert_eq!(recon["capabilities"][0]["id"], "whois-history");
}

#[tokio::test]
async fn e2e_rate_limit_trips_and_exempts_health() {
    let gateway = default_gateway().await;
    let spoofed = [("x-forwarded-for", "198.51.100.77")];

    // The bucket holds 60 and refills one token per second; a quick burst
    // of 70 cannot stay under it.
    let mut saw_limit = false;
    for _ in 0..70 {
        let (status, _) = gateway.get("/capabilities", &spoofed).await;
        if status == StatusCode::TOO_MANY_REQUESTS {
            saw_limit = true;
            break;
        }
    }
    assert!(saw_limit);

    // Health stays reachable for the same client.
    let (status, _) = gateway.get("/health", &spoofed).await;
    assert_eq!(status, StatusCode::OK);

    // Another client is unaffected.
    let (status, _) = gateway
        .get("/capabilities", &[("x-forwarded-for", "198.51.100.78")])
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn e2e_discover_merges_native_and_marketplace() {
    let backends = stub_backends().await;
    let facilitator = stub_facilitator().await;
    let bazaar = stub_bazaar(json!([
        {
            "name": "Phish Scan API",
            "description": "Detects phishing and scam pages",
            "resource": "https://phish-scan.example/scan",
            "maxAmountRequired": 10000,
            "payTo": "0xfeed",
            "network": "base"
        },
        {
            "name": "Gold Plated OCR",
            "description": "Premium OCR",
            "resource": "https://gold.example/ocr",
            "maxAmountRequired": 900000
        }
    ]))
    .await;
    let gateway = TestGateway::new(backends, facilitator, None, Some(bazaar)).await;

    let (status, body) = gateway.get("/discover?q=scan+for+phishing", &[]).await;
    assert_eq!(status, StatusCode::OK, "body: {body}");

    // The affordable listing is offered with the gateway markup; the one
    // over the provider-cost ceiling is filtered out.
    let marketplace = body["marketplace"].as_array().unwrap();
    assert_eq!(marketplace.len(), 1);
    assert_eq!(marketplace[0]["id"], "discovered:phish-scan-api");
    assert_eq!(marketplace[0]["providerCost"], "$0.01");
    assert_eq!(marketplace[0]["cost"], "$0.02");
}

#[tokio::test]
async fn e2e_discovered_capability_activates_but_loopback_endpoint_blocked() {
    let backends = stub_backends().await;
    let facilitator = stub_facilitator().await;
    // A listing whose endpoint points into the gateway's own network.
    let bazaar = stub_bazaar(json!([
        {
            "name": "Inside Job",
            "description": "Sentiment analysis for corporate filings",
            "resource": "http://127.0.0.1:9999/analyze",
            "maxAmountRequired": 10000,
            "payTo": "0xfeed",
            "network": "base"
        }
    ]))
    .await;
    let gateway = TestGateway::new(backends, facilitator, None, Some(bazaar)).await;

    // No registered capability matches, so discovery activates the listing.
    let (status, body) = gateway
        .post(
            "/do",
            json!({"task": "sentiment analysis for corporate filings"}),
            &[("x-payment", "valid-ssrf-1")],
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST, "body: {body}");
    assert_eq!(body["error"], "blocked_endpoint");
    assert_eq!(gateway.state.discovered_count(), 1);
}

#[tokio::test]
async fn e2e_body_collects() {
    // Guard against the harness silently dropping bodies.
    let gateway = default_gateway().await;
    let response = gateway
        .router()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert!(!bytes.is_empty());
}
