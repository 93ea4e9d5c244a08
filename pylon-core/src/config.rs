//! Gateway configuration
//!
//! Defaults first, environment on top. Secrets (test-bypass key, backend
//! credential, planner API key) come only from the environment.
//!
//! # Environment Variables
//!
//! - `PYLON_HOST` / `PYLON_PORT`: bind address (default 127.0.0.1:8402)
//! - `PYLON_PAY_TO`: gateway payout address
//! - `PYLON_FACILITATOR_URL`: x402 facilitator base URL
//! - `PYLON_NETWORK`: settlement network identifier (default `base`)
//! - `PYLON_BACKEND_BASE`: root URL the leaf capability servers live under
//! - `PYLON_BAZAAR_URL`: marketplace base URL for discovery
//! - `PYLON_TEST_KEY`: test-bypass key (internal peers only)
//! - `PYLON_BACKEND_KEY`: credential sent to native/partner backends
//! - `PYLON_PLANNER_API_KEY` / `PYLON_PLANNER_URL` / `PYLON_PLANNER_MODEL`:
//!   chain planner access
//! - `PYLON_LEDGER_PATH`: usage ledger SQLite file
//! - `PYLON_CORS_ORIGINS`: comma-separated extra allowed origins

use std::net::IpAddr;
use std::path::PathBuf;

/// Name the gateway reports in envelopes and 402 bodies.
pub const GATEWAY_NAME: &str = "pylon";

/// Version reported in response metadata.
pub const GATEWAY_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Process-wide gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Address payments for native capabilities settle to.
    pub pay_to: String,
    pub facilitator_url: String,
    /// Settlement network identifier, e.g. `base`.
    pub network: String,
    /// Root URL for the leaf capability servers.
    pub backend_base: String,
    /// Marketplace queried by the discovery engine.
    pub bazaar_url: String,
    /// Test-bypass key; honored only from allow-listed peers.
    pub test_key: Option<String>,
    /// Peers (beyond loopback) allowed to use the test bypass and to read
    /// foreign usage data.
    pub internal_peers: Vec<IpAddr>,
    /// Credential forwarded to native/partner backends so their own payment
    /// gates do not double-charge.
    pub backend_key: Option<String>,
    pub planner_api_key: Option<String>,
    pub planner_url: String,
    pub planner_model: String,
    pub ledger_path: PathBuf,
    /// Extra CORS origins on top of the gateway's own domains.
    pub cors_origins: Vec<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8402,
            pay_to: "0x0000000000000000000000000000000000000000".to_string(),
            facilitator_url: "https://x402.org/facilitator".to_string(),
            network: "base".to_string(),
            backend_base: "http://127.0.0.1:9000".to_string(),
            bazaar_url: "https://bazaar.x402.org".to_string(),
            test_key: None,
            internal_peers: Vec::new(),
            backend_key: None,
            planner_api_key: None,
            planner_url: "https://api.anthropic.com".to_string(),
            planner_model: "claude-3-5-haiku-latest".to_string(),
            ledger_path: PathBuf::from("pylon-usage.db"),
            cors_origins: Vec::new(),
        }
    }
}

impl GatewayConfig {
    /// Defaults overlaid with environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: env_or("PYLON_HOST", defaults.host),
            port: std::env::var("PYLON_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            pay_to: env_or("PYLON_PAY_TO", defaults.pay_to),
            facilitator_url: env_or("PYLON_FACILITATOR_URL", defaults.facilitator_url),
            network: env_or("PYLON_NETWORK", defaults.network),
            backend_base: env_or("PYLON_BACKEND_BASE", defaults.backend_base),
            bazaar_url: env_or("PYLON_BAZAAR_URL", defaults.bazaar_url),
            test_key: env_nonempty("PYLON_TEST_KEY"),
            internal_peers: std::env::var("PYLON_INTERNAL_PEERS")
                .map(|s| {
                    s.split(',')
                        .filter_map(|p| p.trim().parse().ok())
                        .collect()
                })
                .unwrap_or_default(),
            backend_key: env_nonempty("PYLON_BACKEND_KEY"),
            planner_api_key: env_nonempty("PYLON_PLANNER_API_KEY")
                .or_else(|| env_nonempty("ANTHROPIC_API_KEY")),
            planner_url: env_or("PYLON_PLANNER_URL", defaults.planner_url),
            planner_model: env_or("PYLON_PLANNER_MODEL", defaults.planner_model),
            ledger_path: std::env::var("PYLON_LEDGER_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.ledger_path),
            cors_origins: std::env::var("PYLON_CORS_ORIGINS")
                .map(|s| {
                    s.split(',')
                        .map(|o| o.trim().to_string())
                        .filter(|o| !o.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    /// Whether a peer address may use internal-only surfaces: the test
    /// bypass and cross-wallet usage queries.
    pub fn is_internal_peer(&self, peer: IpAddr) -> bool {
        peer.is_loopback() || self.internal_peers.contains(&peer)
    }

    /// Origins the CORS layer admits.
    pub fn allowed_origins(&self) -> Vec<String> {
        let mut origins = vec![
            "https://pylonapi.com".to_string(),
            "https://www.pylonapi.com".to_string(),
            format!("http://localhost:{}", self.port),
            "http://localhost:3000".to_string(),
        ];
        origins.extend(self.cors_origins.iter().cloned());
        origins
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).ok().filter(|v| !v.is_empty()).unwrap_or(default)
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}
