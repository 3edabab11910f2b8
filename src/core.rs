//! The explicit, process-wide shared state (§9, §10.2).
//!
//! Rather than module-level `Lazy` statics for the router/limiter/breaker/
//! metrics singletons, every entry point receives a `Core` value built once
//! via [`Core::new`] and threaded through explicitly. This keeps
//! construction order visible and makes tests able to build an isolated
//! `Core` per case instead of sharing hidden global state.

use std::collections::HashMap;
use std::sync::Arc;

use crate::breaker::CircuitBreaker;
use crate::config::Config;
use crate::coordinator::ResourceCoordinator;
use crate::metrics::ProviderMetrics;
use crate::policy::PhasePolicyRegistry;
use crate::provider::ProviderClient;
use crate::router::ProviderRouter;

/// All process-wide resilience state for one running service instance.
pub struct Core {
    pub config: Config,
    pub router: ProviderRouter,
    pub coordinator: Arc<ResourceCoordinator>,
    pub breaker: Arc<CircuitBreaker>,
    pub metrics: Arc<ProviderMetrics>,
    pub phases: Arc<PhasePolicyRegistry>,
}

impl Core {
    /// Construct a fresh `Core` from `config` and the provider registry.
    /// There is no other way to obtain the shared state used by the
    /// router, coordinator, breaker, and metrics — no global singleton
    /// exists anywhere in this crate.
    pub fn new(config: Config, providers: HashMap<String, Arc<dyn ProviderClient>>) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(config.breaker));
        let metrics = Arc::new(ProviderMetrics::new());
        let coordinator = Arc::new(ResourceCoordinator::new(
            config.provider_concurrency.clone(),
            config.provider_rpm.clone(),
            config.max_inflight_per_tenant,
        ));
        let phases = Arc::new(PhasePolicyRegistry::from_config(&config));

        let router = ProviderRouter::new(
            providers,
            breaker.clone(),
            metrics.clone(),
            coordinator.clone(),
            phases.clone(),
            config.retry,
        );

        Self { config, router, coordinator, breaker, metrics, phases }
    }
}
