//! Resource coordinator (C4): bounds concurrency per provider and per
//! tenant, and gates on the provider's RPM limiter.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};

use crate::cancellation::CancellationToken;
use crate::rate_limiter::SlidingWindowRateLimiter;

/// Holds the three semaphores/limiters released in reverse acquisition
/// order when dropped or explicitly released.
pub struct ResourceGuard {
    _tenant_permit: Option<tokio::sync::OwnedSemaphorePermit>,
    _provider_permit: tokio::sync::OwnedSemaphorePermit,
}

struct ProviderResources {
    concurrency: Arc<Semaphore>,
    queue_depth: Arc<AtomicUsize>,
    rpm: Arc<SlidingWindowRateLimiter>,
    tenants: Mutex<HashMap<String, Arc<Semaphore>>>,
}

/// Coordinates per-provider concurrency, per-tenant fairness, and RPM
/// gating. Acquisition order is provider concurrency -> tenant concurrency
/// -> provider RPM; release happens in reverse on every exit path
/// (including cancellation while waiting), which `ResourceGuard`'s `Drop`
/// impl guarantees structurally.
pub struct ResourceCoordinator {
    default_provider_concurrency: usize,
    default_rpm: u32,
    max_inflight_per_tenant: usize,
    providers: Mutex<HashMap<String, Arc<ProviderResources>>>,
    provider_concurrency: HashMap<String, usize>,
    provider_rpm: HashMap<String, u32>,
}

impl ResourceCoordinator {
    pub fn new(
        provider_concurrency: HashMap<String, usize>,
        provider_rpm: HashMap<String, u32>,
        max_inflight_per_tenant: usize,
    ) -> Self {
        Self {
            default_provider_concurrency: 3,
            default_rpm: 60,
            max_inflight_per_tenant,
            providers: Mutex::new(HashMap::new()),
            provider_concurrency,
            provider_rpm,
        }
    }

    async fn resources_for(&self, provider: &str) -> Arc<ProviderResources> {
        let mut providers = self.providers.lock().await;
        if let Some(existing) = providers.get(provider) {
            return existing.clone();
        }
        let concurrency = *self.provider_concurrency.get(provider).unwrap_or(&self.default_provider_concurrency);
        let rpm = *self.provider_rpm.get(provider).unwrap_or(&self.default_rpm);
        let created = Arc::new(ProviderResources {
            concurrency: Arc::new(Semaphore::new(concurrency)),
            queue_depth: Arc::new(AtomicUsize::new(0)),
            rpm: Arc::new(SlidingWindowRateLimiter::new(rpm, Duration::from_secs(60))),
            tenants: Mutex::new(HashMap::new()),
        });
        providers.insert(provider.to_string(), created.clone());
        created
    }

    async fn tenant_semaphore(&self, resources: &ProviderResources, tenant_id: &str) -> Arc<Semaphore> {
        let mut tenants = resources.tenants.lock().await;
        tenants
            .entry(tenant_id.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.max_inflight_per_tenant)))
            .clone()
    }

    /// Number of callers currently waiting on the provider's concurrency
    /// semaphore.
    pub async fn queue_depth(&self, provider: &str) -> usize {
        self.resources_for(provider).await.queue_depth.load(Ordering::SeqCst)
    }

    /// Acquire all three gates for one LLM call, in order. Returns `None`
    /// if cancelled before all gates were held; any gate already acquired
    /// is released automatically.
    pub async fn acquire(
        &self,
        provider: &str,
        tenant_id: &str,
        token: &CancellationToken,
    ) -> Option<ResourceGuard> {
        let resources = self.resources_for(provider).await;

        resources.queue_depth.fetch_add(1, Ordering::SeqCst);
        let provider_permit = resources.concurrency.clone().acquire_owned();
        let provider_permit = tokio::select! {
            result = provider_permit => {
                resources.queue_depth.fetch_sub(1, Ordering::SeqCst);
                result.expect("semaphore not closed")
            }
            _ = wait_for_cancel(token) => {
                resources.queue_depth.fetch_sub(1, Ordering::SeqCst);
                return None;
            }
        };

        let tenant_permit = if self.max_inflight_per_tenant > 0 {
            let tenant_sem = self.tenant_semaphore(&resources, tenant_id).await;
            let acquired = tokio::select! {
                result = tenant_sem.acquire_owned() => Some(result.expect("semaphore not closed")),
                _ = wait_for_cancel(token) => None,
            };
            match acquired {
                Some(permit) => Some(permit),
                None => return None,
            }
        } else {
            None
        };

        if resources.rpm.acquire(token).await {
            return None;
        }

        Some(ResourceGuard { _tenant_permit: tenant_permit, _provider_permit: provider_permit })
    }
}

async fn wait_for_cancel(token: &CancellationToken) {
    loop {
        if token.is_cancelled() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
