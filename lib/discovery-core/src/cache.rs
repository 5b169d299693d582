//! Per-service endpoint cache with a shared, runtime-configurable TTL

use crate::{DiscoveryError, Endpoint, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info};

/// TTL applied to cache entries until `set_ttl` is called
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(20);

/// Snapshot of the last known endpoints for one service
#[derive(Clone, Debug)]
pub struct CacheEntry {
    endpoints: Arc<Vec<Endpoint>>,
    expires_at: Instant,
}

impl CacheEntry {
    pub fn endpoints(&self) -> &Arc<Vec<Endpoint>> {
        &self.endpoints
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// Whether the entry may still be served at `now`
    pub fn is_fresh_at(&self, now: Instant) -> bool {
        now <= self.expires_at
    }

    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(Instant::now())
    }
}

/// EndpointCache maps service names to their last fetched endpoint list.
///
/// Every entry carries its own lock so refreshing one service never blocks
/// readers of another. The TTL sits behind a separate lock and is read once
/// per `update`, so a TTL change only affects entries written after it.
pub struct EndpointCache {
    entries: RwLock<HashMap<String, Arc<RwLock<CacheEntry>>>>,
    ttl: RwLock<Duration>,
}

impl EndpointCache {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_CACHE_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl: RwLock::new(ttl),
        }
    }

    /// Return the entry for `service`, expired or not.
    ///
    /// Staleness is left to the caller; see [`CacheEntry::is_fresh`].
    pub async fn get(&self, service: &str) -> Option<CacheEntry> {
        let entry = self.entries.read().await.get(service).cloned()?;
        let snapshot = entry.read().await.clone();
        Some(snapshot)
    }

    /// Replace the endpoints for `service` and restart its expiry clock
    pub async fn update(&self, service: &str, endpoints: impl Into<Arc<Vec<Endpoint>>>) {
        let ttl = *self.ttl.read().await;
        let fresh = CacheEntry {
            endpoints: endpoints.into(),
            expires_at: Instant::now() + ttl,
        };

        let existing = self.entries.read().await.get(service).cloned();
        let entry = match existing {
            Some(entry) => entry,
            None => {
                let mut entries = self.entries.write().await;
                match entries.get(service) {
                    Some(entry) => entry.clone(),
                    None => {
                        debug!(service, count = fresh.endpoints.len(), "Cached new service");
                        entries.insert(service.to_string(), Arc::new(RwLock::new(fresh)));
                        return;
                    }
                }
            }
        };

        let count = fresh.endpoints.len();
        *entry.write().await = fresh;
        debug!(service, count, "Refreshed cached endpoints");
    }

    /// Current TTL
    pub async fn ttl(&self) -> Duration {
        *self.ttl.read().await
    }

    /// Swap the TTL used by subsequent updates; zero is rejected
    pub async fn set_ttl(&self, ttl: Duration) -> Result<()> {
        if ttl.is_zero() {
            return Err(DiscoveryError::InvalidArgument(
                "cache TTL must be greater than 0".to_string(),
            ));
        }
        *self.ttl.write().await = ttl;
        info!(new_ttl = ?ttl, "Cache TTL updated");
        Ok(())
    }

    /// Number of services with an entry
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for EndpointCache {
    fn default() -> Self {
        Self::new()
    }
}
