//! Batch resolution of service names into a shared status table

use crate::{LoadBalancer, LoadBalancingStrategy, ResolverMetrics};
use discovery_core::{DiscoveryError, Endpoint, EndpointCache, Registry, Result};
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Outcome of resolving one service name
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ServiceResolution {
    pub service: String,
    /// Chosen endpoint, absent on failure
    pub endpoint: Option<Endpoint>,
    /// `scheme://address:port` of the chosen endpoint
    pub base_url: Option<String>,
    pub success: bool,
}

impl ServiceResolution {
    fn failed(service: &str) -> Self {
        Self {
            service: service.to_string(),
            endpoint: None,
            base_url: None,
            success: false,
        }
    }

    fn resolved(service: &str, endpoint: Endpoint, scheme: &str) -> Self {
        Self {
            service: service.to_string(),
            base_url: Some(endpoint.base_url(scheme)),
            endpoint: Some(endpoint),
            success: true,
        }
    }
}

/// Resolver turns service names into chosen endpoints.
///
/// Results land in a status table keyed by service name. Each name's result
/// is replaced wholesale under the table lock, so readers see either the
/// previous or the new result for a name, never a mix.
pub struct Resolver {
    registry: OnceLock<Arc<dyn Registry>>,
    cache: EndpointCache,
    balancer: LoadBalancer,
    status: RwLock<HashMap<String, ServiceResolution>>,
    scheme: String,
    metrics: ResolverMetrics,
}

impl Resolver {
    /// Create a resolver with no registry attached
    pub fn new(scheme: impl Into<String>, cache_ttl: Duration) -> Self {
        Self::with_balancer(scheme, cache_ttl, LoadBalancer::new())
    }

    pub fn with_balancer(
        scheme: impl Into<String>,
        cache_ttl: Duration,
        balancer: LoadBalancer,
    ) -> Self {
        Self {
            registry: OnceLock::new(),
            cache: EndpointCache::with_ttl(cache_ttl),
            balancer,
            status: RwLock::new(HashMap::new()),
            scheme: scheme.into(),
            metrics: ResolverMetrics::default(),
        }
    }

    /// Attach the registry backend; only the first call succeeds
    pub fn attach(&self, registry: Arc<dyn Registry>) -> Result<()> {
        self.registry.set(registry).map_err(|_| {
            DiscoveryError::InvalidArgument("registry already initialized".to_string())
        })
    }

    pub fn registry(&self) -> Result<&Arc<dyn Registry>> {
        self.registry.get().ok_or(DiscoveryError::NotInitialized)
    }

    pub fn is_initialized(&self) -> bool {
        self.registry.get().is_some()
    }

    pub fn cache(&self) -> &EndpointCache {
        &self.cache
    }

    pub fn balancer(&self) -> &LoadBalancer {
        &self.balancer
    }

    pub fn metrics(&self) -> &ResolverMetrics {
        &self.metrics
    }

    /// Healthy endpoints for `service`.
    ///
    /// With `use_cache` an unexpired cache entry is served as is; otherwise the
    /// registry is queried and the cache overwritten with the answer.
    pub async fn healthy_endpoints(
        &self,
        service: &str,
        use_cache: bool,
    ) -> Result<Arc<Vec<Endpoint>>> {
        let registry = self.registry()?;

        if use_cache {
            match self.cache.get(service).await {
                Some(entry) if entry.is_fresh() => {
                    self.metrics.record_cache_lookup(true);
                    debug!(
                        service,
                        count = entry.endpoints().len(),
                        "Served endpoints from cache"
                    );
                    return Ok(entry.endpoints().clone());
                }
                _ => self.metrics.record_cache_lookup(false),
            }
        }

        let timer = self
            .metrics
            .registry_query_duration_seconds
            .with_label_values(&[service])
            .start_timer();
        let endpoints = registry.query_healthy(service).await;
        timer.observe_duration();

        let endpoints = Arc::new(endpoints?);
        if endpoints.is_empty() {
            return Err(DiscoveryError::NoEndpoints(service.to_string()));
        }

        self.cache.update(service, endpoints.clone()).await;
        Ok(endpoints)
    }

    /// Resolve every name in `names` to one endpoint using `strategy`.
    ///
    /// Names are resolved independently and concurrently; a failing name is
    /// recorded as an unsuccessful result and never aborts the rest. Returns
    /// `Ok` once the batch has run, whatever the per-name outcomes.
    pub async fn resolve<S: AsRef<str>>(
        &self,
        names: &[S],
        strategy: &LoadBalancingStrategy,
        use_cache: bool,
    ) -> Result<()> {
        self.registry()?;
        if names.is_empty() {
            return Err(DiscoveryError::InvalidArgument(
                "service names cannot be empty".to_string(),
            ));
        }

        join_all(names.iter().map(|name| async move {
            let service = name.as_ref();
            let result = self.resolve_one(service, strategy, use_cache).await;
            self.metrics.record_resolution(service, result.success);
            self.status.write().await.insert(service.to_string(), result);
        }))
        .await;

        Ok(())
    }

    async fn resolve_one(
        &self,
        service: &str,
        strategy: &LoadBalancingStrategy,
        use_cache: bool,
    ) -> ServiceResolution {
        let endpoints = match self.healthy_endpoints(service, use_cache).await {
            Ok(endpoints) => endpoints,
            Err(e) => {
                warn!(service, error = %e, "Failed to fetch healthy endpoints");
                return ServiceResolution::failed(service);
            }
        };

        match self.balancer.select(strategy, &endpoints) {
            Ok(endpoint) => {
                let result = ServiceResolution::resolved(service, endpoint.clone(), &self.scheme);
                debug!(service, %strategy, base_url = ?result.base_url, "Resolved service");
                result
            }
            Err(e) => {
                warn!(service, %strategy, error = %e, "Failed to select endpoint");
                ServiceResolution::failed(service)
            }
        }
    }

    /// Re-resolve `names` bypassing the cache
    pub async fn refresh<S: AsRef<str>>(
        &self,
        names: &[S],
        strategy: &LoadBalancingStrategy,
    ) -> Result<()> {
        self.resolve(names, strategy, false).await
    }

    /// Latest result for `service`
    pub async fn result(&self, service: &str) -> Option<ServiceResolution> {
        self.status.read().await.get(service).cloned()
    }

    /// Copy of the whole status table
    pub async fn all_results(&self) -> HashMap<String, ServiceResolution> {
        self.status.read().await.clone()
    }

    pub async fn set_ttl(&self, ttl: Duration) -> Result<()> {
        self.cache.set_ttl(ttl).await
    }
}
