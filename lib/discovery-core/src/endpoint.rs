//! Endpoint and registration data model
use crate::{DiscoveryError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// A resolved network location for one instance of a named service.
///
/// Endpoints are replaced wholesale on refresh and never mutated in place.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: String,
    pub service: String,
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub tags: Vec<String>,
    pub healthy: bool,
}

impl Endpoint {
    /// Create a healthy endpoint
    pub fn new(
        id: impl Into<String>,
        service: impl Into<String>,
        address: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            id: id.into(),
            service: service.into(),
            address: address.into(),
            port,
            tags: Vec::new(),
            healthy: true,
        }
    }

    /// Build `scheme://address:port` for this endpoint
    pub fn base_url(&self, scheme: &str) -> String {
        format!("{}://{}:{}", scheme, self.address, self.port)
    }
}

/// Health check the registry runs against a registered instance
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    /// URL polled by the registry
    pub http: String,
    /// Interval between checks
    pub interval: Duration,
    /// Timeout for a single check
    pub timeout: Duration,
    /// How long a check may stay critical before the instance is removed
    pub deregister_critical_after: Duration,
}

impl HealthCheck {
    pub const DEFAULT_PATH: &'static str = "/health";

    /// HTTP check against `/health` every 5s with a 1s timeout, deregistering
    /// the instance after 30s of failures.
    pub fn http_default(address: &str, port: u16) -> Self {
        Self {
            http: format!("http://{}:{}{}", address, port, Self::DEFAULT_PATH),
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(1),
            deregister_critical_after: Duration::from_secs(30),
        }
    }
}

/// Descriptor used to register a service instance with the registry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRegistration {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub meta: HashMap<String, String>,
    #[serde(default)]
    pub check: Option<HealthCheck>,
}

impl ServiceRegistration {
    pub fn new(name: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            address: address.into(),
            port,
            tags: Vec::new(),
            meta: HashMap::new(),
            check: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    pub fn with_check(mut self, check: HealthCheck) -> Self {
        self.check = Some(check);
        self
    }

    /// Reject registrations missing a name, address or port
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.address.is_empty() || self.port == 0 {
            return Err(DiscoveryError::InvalidArgument(
                "registration missing required fields (name/address/port)".to_string(),
            ));
        }
        Ok(())
    }

    /// Fill in a generated id and the default health check where absent.
    pub fn normalized(mut self) -> Self {
        if self.id.is_empty() {
            self.id = format!("{}-{}", self.name, uuid::Uuid::new_v4());
        }
        if self.check.is_none() {
            self.check = Some(HealthCheck::http_default(&self.address, self.port));
        }
        self
    }

    /// Endpoint this registration advertises
    pub fn endpoint(&self) -> Endpoint {
        let mut endpoint = Endpoint::new(&self.id, &self.name, &self.address, self.port);
        endpoint.tags = self.tags.clone();
        endpoint
    }
}
