//! Shared gateway state
//!
//! One value owns every piece of process-wide mutable state: the replay
//! set, the breakers, the rate buckets, the discovered-capability map, the
//! discovery cache, and the ledger handle. Handlers read-borrow it through
//! an `Arc`; nothing else in the process holds gateway state.

use pylon_client::{BackendCaller, BazaarClient, ChainPlanner, FacilitatorClient};
use pylon_core::{
    builtin_catalog, Capability, CapabilityRegistry, CircuitBreaker, DiscoveryCache,
    GatewayConfig, IpRateLimiter, RegistryError, ReplayGuard, RetrySchedule,
};
use pylon_store::{StoreError, UsageLedger, UsageRecord};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// Errors that prevent the gateway from starting.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("capability catalog failed to load: {0}")]
    Registry(#[from] RegistryError),

    #[error("usage ledger failed to open: {0}")]
    Ledger(#[from] StoreError),

    #[error("HTTP client failed to build: {0}")]
    Client(#[from] pylon_client::CallError),
}

/// Process-wide gateway context.
pub struct GatewayState {
    pub config: GatewayConfig,
    pub registry: CapabilityRegistry,
    /// Capabilities activated from the marketplace this process lifetime.
    /// Insert-only; the first activation of an id wins.
    discovered: RwLock<indexmap::IndexMap<String, Capability>>,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    pub replay: ReplayGuard,
    pub limiter: IpRateLimiter,
    pub discovery_cache: DiscoveryCache,
    pub ledger: UsageLedger,
    pub backend: BackendCaller,
    pub facilitator: FacilitatorClient,
    pub bazaar: BazaarClient,
    pub planner: Option<ChainPlanner>,
    pub retry_schedule: RetrySchedule,
    pub started_at: Instant,
}

/// Handle handlers receive.
pub type SharedState = Arc<GatewayState>;

impl GatewayState {
    /// Build the full gateway context from configuration. Registry or
    /// ledger failure here aborts startup.
    pub fn new(config: GatewayConfig) -> Result<SharedState, StartupError> {
        let registry = CapabilityRegistry::load(builtin_catalog(&config.backend_base)?)?;
        let ledger = UsageLedger::open(&config.ledger_path)?;
        Ok(Arc::new(Self::with_parts(config, registry, ledger)?))
    }

    /// Assemble state from pre-built parts. Lets tests swap in an
    /// in-memory ledger, a stub catalog, or a custom retry schedule before
    /// wrapping in an `Arc`.
    pub fn with_parts(
        config: GatewayConfig,
        registry: CapabilityRegistry,
        ledger: UsageLedger,
    ) -> Result<Self, StartupError> {
        let backend = BackendCaller::new(config.backend_key.clone())?;
        let facilitator = FacilitatorClient::new(config.facilitator_url.clone())?;
        let bazaar = BazaarClient::new(config.bazaar_url.clone())?;
        let planner = match &config.planner_api_key {
            Some(key) => Some(ChainPlanner::new(
                config.planner_url.clone(),
                key.clone(),
                config.planner_model.clone(),
            )?),
            None => None,
        };

        Ok(Self {
            config,
            registry,
            discovered: RwLock::new(indexmap::IndexMap::new()),
            breakers: RwLock::new(HashMap::new()),
            replay: ReplayGuard::default(),
            limiter: IpRateLimiter::default(),
            discovery_cache: DiscoveryCache::default(),
            ledger,
            backend,
            facilitator,
            bazaar,
            planner,
            retry_schedule: RetrySchedule::default(),
            started_at: Instant::now(),
        })
    }

    /// Look up a capability across the registry and the active discovered
    /// map.
    pub fn find_capability(&self, id: &str) -> Option<Capability> {
        if let Some(capability) = self.registry.by_id(id) {
            return Some(capability.clone());
        }
        self.read_discovered().get(id).cloned()
    }

    /// Registry plus currently-active discovered capabilities, in catalog
    /// then activation order.
    pub fn full_catalog(&self) -> Vec<Capability> {
        let mut catalog: Vec<Capability> = self.registry.list().cloned().collect();
        catalog.extend(self.read_discovered().values().cloned());
        catalog
    }

    /// Activate a discovered capability. The first activation per id wins;
    /// the winning record is returned either way.
    pub fn activate_discovered(&self, capability: Capability) -> Capability {
        let mut discovered = match self.discovered.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        discovered
            .entry(capability.id.clone())
            .or_insert(capability)
            .clone()
    }

    pub fn discovered_count(&self) -> usize {
        self.read_discovered().len()
    }

    /// The breaker guarding a capability id, created on first use.
    pub fn breaker_for(&self, id: &str) -> Arc<CircuitBreaker> {
        {
            let breakers = match self.breakers.read() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(breaker) = breakers.get(id) {
                return breaker.clone();
            }
        }
        let mut breakers = match self.breakers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        breakers
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::default()))
            .clone()
    }

    /// Breaker snapshots for the status endpoint.
    pub fn breaker_snapshots(&self) -> Vec<(String, pylon_core::BreakerSnapshot)> {
        let breakers = match self.breakers.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut snapshots: Vec<_> = breakers
            .iter()
            .map(|(id, breaker)| (id.clone(), breaker.snapshot()))
            .collect();
        snapshots.sort_by(|a, b| a.0.cmp(&b.0));
        snapshots
    }

    /// Append a usage record, logging rather than failing the response if
    /// the write goes wrong after the backend already ran.
    pub fn record_usage(&self, record: &UsageRecord) {
        if let Err(error) = self.ledger.append(record) {
            tracing::error!(%error, caller = %record.caller, capability = %record.capability,
                "failed to append usage record");
        }
    }

    fn read_discovered(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, indexmap::IndexMap<String, Capability>> {
        match self.discovered.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
