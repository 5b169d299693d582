//! Registry capability and an in-memory implementation

use crate::{DiscoveryError, Endpoint, Result, ServiceRegistration};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Call surface of an external service registry.
///
/// Implementations only return instances that currently pass their health
/// check from `query_healthy`.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Healthy instances of `service`
    async fn query_healthy(&self, service: &str) -> Result<Vec<Endpoint>>;

    /// Register a service instance
    async fn register(&self, registration: &ServiceRegistration) -> Result<()>;

    /// Deregister a service instance by id
    async fn deregister(&self, service_id: &str) -> Result<()>;
}

#[derive(Clone, Debug)]
struct Instance {
    registration: ServiceRegistration,
    passing: bool,
}

/// InMemoryRegistry keeps registrations in process, for development and tests
#[derive(Clone, Default)]
pub struct InMemoryRegistry {
    // Map of service id to registered instance
    instances: Arc<RwLock<HashMap<String, Instance>>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark an instance as passing or failing its health check
    pub async fn set_passing(&self, service_id: &str, passing: bool) -> Result<()> {
        let mut instances = self.instances.write().await;
        let instance = instances.get_mut(service_id).ok_or_else(|| {
            DiscoveryError::Registry(format!("unknown service id: {}", service_id))
        })?;
        instance.passing = passing;
        debug!(service_id, passing, "Updated instance health");
        Ok(())
    }

    /// Number of registered instances, healthy or not
    pub async fn instance_count(&self) -> usize {
        self.instances.read().await.len()
    }
}

#[async_trait]
impl Registry for InMemoryRegistry {
    async fn query_healthy(&self, service: &str) -> Result<Vec<Endpoint>> {
        let instances = self.instances.read().await;
        let mut endpoints: Vec<Endpoint> = instances
            .values()
            .filter(|i| i.passing && i.registration.name == service)
            .map(|i| i.registration.endpoint())
            .collect();
        // HashMap order is arbitrary; keep results stable across queries
        endpoints.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(endpoints)
    }

    async fn register(&self, registration: &ServiceRegistration) -> Result<()> {
        registration.validate()?;
        let registration = registration.clone().normalized();
        let service_id = registration.id.clone();

        let mut instances = self.instances.write().await;
        instances.insert(
            service_id.clone(),
            Instance {
                registration,
                passing: true,
            },
        );

        debug!("Registered service: {}", service_id);
        Ok(())
    }

    async fn deregister(&self, service_id: &str) -> Result<()> {
        let mut instances = self.instances.write().await;
        instances.remove(service_id).ok_or_else(|| {
            DiscoveryError::Registry(format!("unknown service id: {}", service_id))
        })?;
        debug!("Deregistered service: {}", service_id);
        Ok(())
    }
}
