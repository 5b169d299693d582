//! Discovery client: registration, resolution and background refresh

use crate::{DiscoveryConfig, LoadBalancingStrategy, RefreshHandle, Resolver, ServiceResolution};
use discovery_core::{DiscoveryError, Registry, Result, ServiceRegistration};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// DiscoveryClient is the entry point callers use.
///
/// It owns a [`Resolver`] and at most one background refresh loop, and
/// remembers the id this process registered itself under so it can be
/// deregistered on shutdown.
pub struct DiscoveryClient {
    config: DiscoveryConfig,
    resolver: Arc<Resolver>,
    identity: OnceLock<String>,
    // Held across register and attach so concurrent inits cannot both register
    init_lock: Mutex<()>,
    refresh: Mutex<Option<RefreshHandle>>,
}

impl DiscoveryClient {
    /// Create a client with no registry attached
    pub fn new(config: DiscoveryConfig) -> Result<Self> {
        config.validate()?;
        let resolver = Arc::new(Resolver::new(config.scheme.clone(), config.cache_ttl()));
        Ok(Self {
            config,
            resolver,
            identity: OnceLock::new(),
            init_lock: Mutex::new(()),
            refresh: Mutex::new(None),
        })
    }

    /// Register this process with `registry` and attach it for lookups.
    ///
    /// A missing id is generated and a missing health check defaults to
    /// [`HealthCheck::http_default`](discovery_core::HealthCheck::http_default).
    /// Returns the registered service id.
    pub async fn init(
        &self,
        registry: Arc<dyn Registry>,
        registration: ServiceRegistration,
    ) -> Result<String> {
        registration.validate()?;
        let _guard = self.init_lock.lock().await;
        if self.resolver.is_initialized() {
            return Err(DiscoveryError::InvalidArgument(
                "registry already initialized".to_string(),
            ));
        }

        let registration = registration.normalized();
        if let Some(check) = &registration.check {
            info!(url = %check.http, "Health check configured");
        }

        registry.register(&registration).await?;
        if let Err(e) = self.resolver.attach(registry.clone()) {
            // A direct attach took the slot; drop the registration made above
            if let Err(undo) = registry.deregister(&registration.id).await {
                warn!(
                    id = %registration.id,
                    error = %undo,
                    "Failed to roll back registration"
                );
            }
            return Err(e);
        }
        // Cannot already be set: attach succeeds only once
        let _ = self.identity.set(registration.id.clone());

        info!(service = %registration.name, id = %registration.id, "Service registered");
        Ok(registration.id)
    }

    /// Attach `registry` for lookups without registering this process
    pub fn attach(&self, registry: Arc<dyn Registry>) -> Result<()> {
        self.resolver.attach(registry)
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }

    /// Id this process registered under, if `init` succeeded
    pub fn identity(&self) -> Option<&str> {
        self.identity.get().map(String::as_str)
    }

    pub async fn resolve<S: AsRef<str>>(
        &self,
        names: &[S],
        strategy: &LoadBalancingStrategy,
        use_cache: bool,
    ) -> Result<()> {
        self.resolver.resolve(names, strategy, use_cache).await
    }

    /// Force a resolution pass that bypasses the cache
    pub async fn refresh<S: AsRef<str>>(
        &self,
        names: &[S],
        strategy: &LoadBalancingStrategy,
    ) -> Result<()> {
        self.resolver.refresh(names, strategy).await
    }

    pub async fn result(&self, service: &str) -> Option<ServiceResolution> {
        self.resolver.result(service).await
    }

    pub async fn all_results(&self) -> HashMap<String, ServiceResolution> {
        self.resolver.all_results().await
    }

    pub async fn set_ttl(&self, ttl: Duration) -> Result<()> {
        self.resolver.set_ttl(ttl).await
    }

    /// Start the background refresh loop.
    ///
    /// A loop started earlier is stopped first.
    pub async fn start_refresh(
        &self,
        names: Vec<String>,
        strategy: LoadBalancingStrategy,
        interval: Duration,
    ) -> Result<()> {
        let handle = RefreshHandle::spawn(self.resolver.clone(), names, strategy, interval)?;

        let previous = self.refresh.lock().await.replace(handle);
        if let Some(previous) = previous {
            warn!("Replacing running service refresh");
            previous.stop().await;
        }
        Ok(())
    }

    /// Start the refresh loop for the configured services
    pub async fn start_configured_refresh(&self) -> Result<()> {
        self.start_refresh(
            self.config.services.clone(),
            self.config.strategy.clone(),
            self.config.refresh_interval(),
        )
        .await
    }

    /// Stop the background refresh loop, if one is running
    pub async fn stop_refresh(&self) {
        let handle = self.refresh.lock().await.take();
        if let Some(handle) = handle {
            handle.stop().await;
        }
    }

    pub async fn is_refreshing(&self) -> bool {
        self.refresh
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub async fn deregister(&self, service_id: &str) -> Result<()> {
        self.resolver.registry()?.deregister(service_id).await?;
        info!(service_id, "Service deregistered");
        Ok(())
    }

    /// Stop refreshing and deregister this process's own registration
    pub async fn shutdown(&self) -> Result<()> {
        self.stop_refresh().await;
        match self.identity() {
            Some(id) => self.deregister(id).await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use discovery_core::{Endpoint, HealthCheck, InMemoryRegistry};

    fn client() -> DiscoveryClient {
        DiscoveryClient::new(DiscoveryConfig::default()).unwrap()
    }

    /// In-memory registry whose registrations take a while to land
    #[derive(Clone, Default)]
    struct SlowRegistry {
        inner: InMemoryRegistry,
    }

    #[async_trait]
    impl Registry for SlowRegistry {
        async fn query_healthy(&self, service: &str) -> Result<Vec<Endpoint>> {
            self.inner.query_healthy(service).await
        }

        async fn register(&self, registration: &ServiceRegistration) -> Result<()> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.inner.register(registration).await
        }

        async fn deregister(&self, service_id: &str) -> Result<()> {
            self.inner.deregister(service_id).await
        }
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_config() {
        let config = DiscoveryConfig {
            scheme: String::new(),
            ..Default::default()
        };
        assert!(matches!(
            DiscoveryClient::new(config),
            Err(DiscoveryError::InvalidConfiguration(_))
        ));
    }

    #[tokio::test]
    async fn test_uninitialized_operations_fail() {
        let client = client();
        assert!(matches!(
            client.resolve(&["api"], &LoadBalancingStrategy::Random, true).await,
            Err(DiscoveryError::NotInitialized)
        ));
        assert!(matches!(
            client
                .start_refresh(
                    vec!["api".to_string()],
                    LoadBalancingStrategy::Random,
                    Duration::from_secs(1),
                )
                .await,
            Err(DiscoveryError::NotInitialized)
        ));
        assert!(matches!(
            client.deregister("api-1").await,
            Err(DiscoveryError::NotInitialized)
        ));
        // Nothing registered, nothing to undo
        assert!(client.shutdown().await.is_ok());
    }

    #[tokio::test]
    async fn test_init_registers_with_default_check() {
        let client = client();
        let registry = InMemoryRegistry::new();

        let id = client
            .init(
                Arc::new(registry.clone()),
                ServiceRegistration::new("gateway", "10.0.0.9", 9000),
            )
            .await
            .unwrap();

        assert!(id.starts_with("gateway-"));
        assert_eq!(client.identity(), Some(id.as_str()));

        let endpoints = registry.query_healthy("gateway").await.unwrap();
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].id, id);
        assert_eq!(
            HealthCheck::http_default("10.0.0.9", 9000).http,
            "http://10.0.0.9:9000/health"
        );
    }

    #[tokio::test]
    async fn test_init_rejects_invalid_registration() {
        let client = client();
        let result = client
            .init(
                Arc::new(InMemoryRegistry::new()),
                ServiceRegistration::new("gateway", "10.0.0.9", 0),
            )
            .await;
        assert!(matches!(result, Err(DiscoveryError::InvalidArgument(_))));
        assert!(!client.resolver().is_initialized());
    }

    #[tokio::test]
    async fn test_init_twice_fails() {
        let client = client();
        let registration = ServiceRegistration::new("gateway", "10.0.0.9", 9000);
        client
            .init(Arc::new(InMemoryRegistry::new()), registration.clone())
            .await
            .unwrap();
        assert!(client
            .init(Arc::new(InMemoryRegistry::new()), registration)
            .await
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_init_registers_once() {
        let client = client();
        let registry = SlowRegistry::default();

        let (a, b) = tokio::join!(
            client.init(
                Arc::new(registry.clone()),
                ServiceRegistration::new("gateway", "10.0.0.9", 9000).with_id("gateway-a"),
            ),
            client.init(
                Arc::new(registry.clone()),
                ServiceRegistration::new("gateway", "10.0.0.9", 9000).with_id("gateway-b"),
            ),
        );

        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
        assert_eq!(registry.inner.instance_count().await, 1);

        client.shutdown().await.unwrap();
        assert_eq!(registry.inner.instance_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_init_rolls_back_when_attach_loses() {
        let client = client();
        let registry = SlowRegistry::default();

        let (init, attach) = tokio::join!(
            client.init(
                Arc::new(registry.clone()),
                ServiceRegistration::new("gateway", "10.0.0.9", 9000).with_id("gateway-1"),
            ),
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                client.attach(Arc::new(InMemoryRegistry::new()))
            },
        );

        assert!(attach.is_ok());
        assert!(matches!(init, Err(DiscoveryError::InvalidArgument(_))));
        assert_eq!(client.identity(), None);
        assert_eq!(registry.inner.instance_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_lifecycle_and_shutdown() {
        let client = client();
        let registry = InMemoryRegistry::new();
        registry
            .register(&ServiceRegistration::new("api", "10.0.0.1", 8080).with_id("api-1"))
            .await
            .unwrap();
        registry
            .register(&ServiceRegistration::new("api", "10.0.0.2", 8080).with_id("api-2"))
            .await
            .unwrap();

        let id = client
            .init(
                Arc::new(registry.clone()),
                ServiceRegistration::new("gateway", "10.0.0.9", 9000).with_id("gateway-1"),
            )
            .await
            .unwrap();
        assert_eq!(id, "gateway-1");

        client
            .start_refresh(
                vec!["api".to_string(), "billing".to_string()],
                LoadBalancingStrategy::RoundRobin,
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert!(client.is_refreshing().await);

        tokio::time::sleep(Duration::from_millis(1)).await;
        let first = client.result("api").await.unwrap();
        assert!(first.success);
        assert!(!client.result("billing").await.unwrap().success);

        tokio::time::sleep(Duration::from_secs(5)).await;
        let second = client.result("api").await.unwrap();
        assert_ne!(first.endpoint, second.endpoint);

        client.shutdown().await.unwrap();
        assert!(!client.is_refreshing().await);
        assert!(registry.query_healthy("gateway").await.unwrap().is_empty());
        assert_eq!(registry.instance_count().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_refresh_replaces_previous_loop() {
        let client = client();
        let registry = InMemoryRegistry::new();
        registry
            .register(&ServiceRegistration::new("api", "10.0.0.1", 8080).with_id("api-1"))
            .await
            .unwrap();
        registry
            .register(&ServiceRegistration::new("db", "10.0.1.1", 5432).with_id("db-1"))
            .await
            .unwrap();
        client.attach(Arc::new(registry)).unwrap();

        client
            .start_refresh(
                vec!["api".to_string()],
                LoadBalancingStrategy::RoundRobin,
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        client
            .start_refresh(
                vec!["db".to_string()],
                LoadBalancingStrategy::Random,
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert!(client.is_refreshing().await);

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(client.result("db").await.unwrap().success);

        client.stop_refresh().await;
        assert!(!client.is_refreshing().await);
    }

    #[tokio::test]
    async fn test_set_ttl_rejects_zero() {
        let client = client();
        assert!(matches!(
            client.set_ttl(Duration::ZERO).await,
            Err(DiscoveryError::InvalidArgument(_))
        ));
        assert_eq!(
            client.resolver().cache().ttl().await,
            client.config().cache_ttl()
        );
    }
}
