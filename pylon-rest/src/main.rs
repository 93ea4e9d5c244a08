//! Pylon Gateway Server
//!
//! Pay-per-request API gateway for autonomous agents: one entry point,
//! many capability backends, x402 payment in front.
//!
//! # Environment Variables
//!
//! See `pylon_core::config` for the full list. The interesting ones:
//!
//! - `PYLON_HOST` / `PYLON_PORT`: bind address (default 127.0.0.1:8402)
//! - `PYLON_FACILITATOR_URL`: payment facilitator
//! - `PYLON_BACKEND_BASE`: root URL of the leaf capability servers
//! - `PYLON_PLANNER_API_KEY`: enables `/do/chain`
//! - `PYLON_LEDGER_PATH`: usage ledger SQLite file

use pylon_core::GatewayConfig;
use pylon_rest::{router, GatewayState};
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pylon_rest=info,pylon_client=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = GatewayConfig::from_env();

    if config.planner_api_key.is_none() {
        tracing::warn!(
            "PYLON_PLANNER_API_KEY not set - /do/chain will refuse requests \
             until a planner key is configured."
        );
    }
    if config.test_key.is_none() {
        tracing::info!("no test-bypass key configured; all requests require payment");
    }

    let state = match GatewayState::new(config.clone()) {
        Ok(state) => state,
        Err(error) => {
            tracing::error!(%error, "gateway failed to start");
            std::process::exit(1);
        }
    };

    tracing::info!(
        capabilities = state.registry.len(),
        facilitator = %config.facilitator_url,
        network = %config.network,
        ledger = %config.ledger_path.display(),
        "Starting Pylon gateway"
    );

    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .expect("Invalid host:port combination");

    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind gateway port");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("Server error");

    tracing::info!("Gateway shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, draining...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, draining...");
        },
    }
}
