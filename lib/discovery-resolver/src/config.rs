//! Discovery client configuration

use crate::LoadBalancingStrategy;
use discovery_core::{DiscoveryError, Result, DEFAULT_CACHE_TTL};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a [`DiscoveryClient`](crate::DiscoveryClient)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Scheme used when building base URLs
    pub scheme: String,
    /// Strategy used by the background refresh
    pub strategy: LoadBalancingStrategy,
    /// Endpoint cache TTL in seconds
    pub cache_ttl_secs: u64,
    /// Background refresh interval in seconds
    pub refresh_interval_secs: u64,
    /// Services kept resolved by the background refresh
    pub services: Vec<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            scheme: "http".to_string(),
            strategy: LoadBalancingStrategy::RoundRobin,
            cache_ttl_secs: DEFAULT_CACHE_TTL.as_secs(),
            refresh_interval_secs: 10,
            services: Vec::new(),
        }
    }
}

impl DiscoveryConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.scheme.is_empty() {
            return Err(DiscoveryError::InvalidConfiguration(
                "scheme cannot be empty".to_string(),
            ));
        }
        if self.cache_ttl_secs == 0 {
            return Err(DiscoveryError::InvalidConfiguration(
                "cache TTL must be greater than 0".to_string(),
            ));
        }
        if self.refresh_interval_secs == 0 {
            return Err(DiscoveryError::InvalidConfiguration(
                "refresh interval must be greater than 0".to_string(),
            ));
        }
        if let LoadBalancingStrategy::Unsupported(value) = &self.strategy {
            return Err(DiscoveryError::InvalidConfiguration(format!(
                "unsupported load balancing strategy: {}",
                value
            )));
        }
        Ok(())
    }
}
