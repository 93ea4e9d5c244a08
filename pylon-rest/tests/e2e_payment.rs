//! Payment gate behavior: 402 quoting, replay protection, bypass rules.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use axum::http::StatusCode;
use common::{default_gateway, stub_backends, TestGateway, TEST_KEY};
use serde_json::json;

#[tokio::test]
async fn e2e_missing_payment_gets_x402_quote() {
    let gateway = default_gateway().await;
    let (status, body) = gateway
        .post("/do", json!({"task": "resize image"}), &[])
        .await;

    assert_eq!(status, StatusCode::PAYMENT_REQUIRED, "body: {body}");
    assert_eq!(body["x402Version"], 2);
    assert_eq!(body["error"], serde_json::Value::Null);
    assert!(body["facilitatorUrl"].as_str().unwrap().starts_with("http"));

    let accept = &body["accepts"][0];
    assert_eq!(accept["scheme"], "exact");
    assert_eq!(accept["network"], "base");
    assert_eq!(accept["asset"], "USDC");
    // image-resize costs $0.01 = 10,000 micro-units.
    assert_eq!(accept["amount"], "10000");
    assert_eq!(accept["payTo"], "0xGatewayPayout");
    assert_eq!(accept["resource"], "pylon://image-resize");
    assert_eq!(accept["extra"]["name"], "pylon");
}

#[tokio::test]
async fn e2e_replayed_proof_rejected() {
    let gateway = default_gateway().await;
    let body = json!({"capability": "search", "params": {"query": "rust"}});

    let (status, _) = gateway
        .post("/do", body.clone(), &[("x-payment", "valid-replay-me")])
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, second) = gateway
        .post("/do", body, &[("x-payment", "valid-replay-me")])
        .await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(second["error"], "payment_replay");
}

#[tokio::test]
async fn e2e_invalid_proof_rejected() {
    let gateway = default_gateway().await;
    let (status, body) = gateway
        .post(
            "/do",
            json!({"capability": "search", "params": {"query": "rust"}}),
            &[("x-payment", "bogus-proof")],
        )
        .await;

    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["error"], "invalid_payment");
}

#[tokio::test]
async fn e2e_legacy_payment_header_accepted() {
    let gateway = default_gateway().await;
    let (status, _) = gateway
        .post(
            "/do",
            json!({"capability": "search", "params": {"query": "rust"}}),
            &[("payment-signature", "valid-legacy-1")],
        )
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn e2e_test_bypass_skips_payment() {
    let gateway = default_gateway().await;
    let (status, body) = gateway
        .post(
            "/do",
            json!({"capability": "search", "params": {"query": "rust"}}),
            &[("x-test-key", TEST_KEY)],
        )
        .await;
    assert_eq!(status, StatusCode::OK, "body: {body}");
    assert_eq!(body["success"], true);
}

#[tokio::test]
async fn e2e_wrong_test_key_still_requires_payment() {
    let gateway = default_gateway().await;
    let (status, body) = gateway
        .post(
            "/do",
            json!({"capability": "search", "params": {"query": "rust"}}),
            &[("x-test-key", "not-the-key")],
        )
        .await;

    // The response must not hint whether a bypass key exists.
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert!(body.to_string().find("not-the-key").is_none());
    assert!(body.to_string().find(TEST_KEY).is_none());
}

#[tokio::test]
async fn e2e_facilitator_outage_is_5xx() {
    let backends = stub_backends().await;
    // Nothing listens on port 9; verification cannot happen.
    let gateway = TestGateway::new(backends, "127.0.0.1:9".parse().unwrap(), None, None).await;

    let (status, body) = gateway
        .post(
            "/do",
            json!({"capability": "search", "params": {"query": "rust"}}),
            &[("x-payment", "valid-unverifiable")],
        )
        .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "verification_unavailable");
}
