//! pylon-core - Core gateway logic for Pylon (no I/O deps)
//!
//! This crate contains the capability model, pricing, dispatch matching,
//! and reliability primitives for the Pylon pay-per-request gateway. It is
//! intentionally free of I/O dependencies so every rule here is testable
//! without a socket.

pub mod capability;
pub mod circuit;
pub mod config;
pub mod discovery;
pub mod error;
pub mod extract;
pub mod matcher;
pub mod money;
pub mod plan;
pub mod rate_limit;
pub mod registry;
pub mod replay;
pub mod retry;
pub mod ssrf;

// Re-export main types at crate root
pub use capability::{
    Capability, HttpMethod, InputSpec, OutputKind, ParamType, Provider, RevenueSplit, SourceTier,
    DISCOVERED_PREFIX,
};
pub use circuit::{BreakerConfig, BreakerSnapshot, CircuitBreaker, CircuitState};
pub use config::{GatewayConfig, GATEWAY_NAME, GATEWAY_VERSION};
pub use discovery::{BazaarListing, DiscoveryCache, DISCOVERY_CACHE_TTL, PROVIDER_COST_CEILING};
pub use error::GatewayError;
pub use money::{MicroUsd, MoneyError, Rounding};
pub use plan::{ChainPlan, ChainStep, CHAIN_COST_CEILING, CHAIN_TIMEOUT_MS, MAX_STEPS, STEP_TIMEOUT_MS};
pub use rate_limit::{IpRateLimiter, RateLimitConfig};
pub use registry::{builtin_catalog, CapabilityRegistry, RegistryError};
pub use replay::{proof_id, ReplayGuard, REPLAY_TTL};
pub use retry::{status_is_retryable, RetrySchedule, ATTEMPT_TIMEOUT};
pub use ssrf::{check_endpoint, EndpointBlocked};
