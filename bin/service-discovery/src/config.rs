//! Daemon configuration from environment variables and an optional YAML file

use anyhow::{anyhow, Context, Result};
use discovery_core::ServiceRegistration;
use discovery_resolver::{DiscoveryConfig, LoadBalancingStrategy};
use serde::Deserialize;
use std::net::SocketAddr;

const DEFAULT_CONSUL_ADDR: &str = "127.0.0.1:8500";

/// Layout of the file named by `DISCOVERY_CONFIG`
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    consul_addr: Option<String>,
    listen: Option<SocketAddr>,
    service: Option<ServiceRegistration>,
    discovery: DiscoveryConfig,
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Consul agent address
    pub consul_addr: String,
    /// Address the health endpoint listens on
    pub listen: SocketAddr,
    /// This process's own registration
    pub registration: ServiceRegistration,
    pub discovery: DiscoveryConfig,
}

impl DaemonConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let file = match lookup("DISCOVERY_CONFIG") {
            Some(path) => {
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read config file {}", path))?;
                serde_yaml::from_str(&raw)
                    .with_context(|| format!("failed to parse config file {}", path))?
            }
            None => FileConfig::default(),
        };
        Self::build(file, lookup)
    }

    /// Overlay environment variables on the file configuration
    fn build(file: FileConfig, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let consul_addr = lookup("CONSUL_ADDR")
            .or(file.consul_addr)
            .unwrap_or_else(|| DEFAULT_CONSUL_ADDR.to_string());

        let mut registration = file
            .service
            .unwrap_or_else(|| ServiceRegistration::new("", "", 0));
        if let Some(name) = lookup("SERVICE_NAME") {
            registration.name = name;
        }
        if let Some(id) = lookup("SERVICE_ID") {
            registration.id = id;
        }
        if let Some(address) = lookup("SERVICE_ADDRESS") {
            registration.address = address;
        }
        if let Some(port) = lookup("SERVICE_PORT") {
            registration.port = port
                .parse()
                .with_context(|| format!("invalid SERVICE_PORT: {}", port))?;
        }
        registration
            .validate()
            .map_err(|_| anyhow!("SERVICE_NAME, SERVICE_ADDRESS and SERVICE_PORT must be set"))?;

        let listen = match lookup("HEALTH_LISTEN") {
            Some(listen) => listen
                .parse()
                .with_context(|| format!("invalid HEALTH_LISTEN: {}", listen))?,
            None => file
                .listen
                .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], registration.port))),
        };

        let mut discovery = file.discovery;
        if let Some(services) = lookup("DISCOVERY_SERVICES") {
            discovery.services = services
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(strategy) = lookup("DISCOVERY_STRATEGY") {
            discovery.strategy = LoadBalancingStrategy::from(strategy);
        }
        if let Some(secs) = lookup("DISCOVERY_REFRESH_SECS") {
            discovery.refresh_interval_secs = secs
                .parse()
                .with_context(|| format!("invalid DISCOVERY_REFRESH_SECS: {}", secs))?;
        }
        if let Some(secs) = lookup("DISCOVERY_CACHE_TTL_SECS") {
            discovery.cache_ttl_secs = secs
                .parse()
                .with_context(|| format!("invalid DISCOVERY_CACHE_TTL_SECS: {}", secs))?;
        }
        discovery.validate()?;

        Ok(Self {
            consul_addr,
            listen,
            registration,
            discovery,
        })
    }
}
