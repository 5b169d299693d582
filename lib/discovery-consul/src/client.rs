//! Consul agent HTTP API client implementing the `Registry` capability

use async_trait::async_trait;
use discovery_core::{DiscoveryError, Endpoint, Registry, Result, ServiceRegistration};
use reqwest::Url;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

/// ConsulRegistry talks to a single Consul agent over HTTP
#[derive(Clone)]
pub struct ConsulRegistry {
    base_url: String,
    base: Url,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct HealthEntry {
    #[serde(rename = "Node")]
    node: NodeDetail,
    #[serde(rename = "Service")]
    service: ServiceDetail,
}

#[derive(Deserialize)]
struct NodeDetail {
    #[serde(rename = "Address", default)]
    address: String,
}

#[derive(Deserialize)]
struct ServiceDetail {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Service")]
    service: String,
    #[serde(rename = "Address", default)]
    address: String,
    #[serde(rename = "Port")]
    port: u16,
    #[serde(rename = "Tags", default)]
    tags: Option<Vec<String>>,
}

impl HealthEntry {
    fn into_endpoint(self) -> Endpoint {
        // Consul leaves the service address empty when it matches the node's
        let address = if self.service.address.is_empty() {
            self.node.address
        } else {
            self.service.address
        };
        let mut endpoint =
            Endpoint::new(self.service.id, self.service.service, address, self.service.port);
        endpoint.tags = self.service.tags.unwrap_or_default();
        endpoint
    }
}

impl ConsulRegistry {
    /// Create a client for the agent at `address`.
    ///
    /// Accepts either `host:port` or a full `http(s)://` URL.
    pub fn new(address: impl Into<String>) -> Result<Self> {
        let address = address.into();
        let address = address.trim().trim_end_matches('/');
        if address.is_empty() {
            return Err(DiscoveryError::InvalidArgument(
                "consul address cannot be empty".to_string(),
            ));
        }

        let base_url = if address.starts_with("http://") || address.starts_with("https://") {
            address.to_string()
        } else {
            format!("http://{}", address)
        };
        let base = Url::parse(&base_url)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| {
                DiscoveryError::InvalidArgument(format!("invalid consul address: {}", address))
            })?;

        Ok(Self {
            base_url,
            base,
            client: reqwest::Client::new(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Agent API URL with each segment percent-encoded
    fn api_url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| {
                let message = format!("invalid consul address: {}", self.base_url);
                DiscoveryError::InvalidArgument(message)
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Agent registration payload for `registration`
    fn registration_payload(registration: &ServiceRegistration) -> serde_json::Value {
        let mut payload = serde_json::json!({
            "ID": registration.id,
            "Name": registration.name,
            "Address": registration.address,
            "Port": registration.port,
            "Tags": registration.tags,
            "Meta": registration.meta,
        });

        if let Some(check) = &registration.check {
            payload["Check"] = serde_json::json!({
                "HTTP": check.http,
                "Interval": consul_duration(check.interval),
                "Timeout": consul_duration(check.timeout),
                "DeregisterCriticalServiceAfter": consul_duration(check.deregister_critical_after),
            });
        }

        payload
    }

    async fn error_body(response: reqwest::Response) -> String {
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        format!("{}: {}", status, body.trim())
    }
}

/// Render a duration the way Consul's Go parser expects ("5s", "1500ms").
///
/// Sub-millisecond remainders round up so a nonzero duration never becomes "0ms".
fn consul_duration(duration: Duration) -> String {
    if duration.subsec_nanos() == 0 {
        format!("{}s", duration.as_secs())
    } else {
        format!("{}ms", duration.as_nanos().div_ceil(1_000_000))
    }
}

fn transport_error(context: &str, err: reqwest::Error) -> DiscoveryError {
    DiscoveryError::Registry(format!("{}: {}", context, err))
}

#[async_trait]
impl Registry for ConsulRegistry {
    async fn query_healthy(&self, service: &str) -> Result<Vec<Endpoint>> {
        let url = self.api_url(&["v1", "health", "service", service])?;

        let response = self
            .client
            .get(url)
            .query(&[("passing", "true")])
            .send()
            .await
            .map_err(|e| transport_error("query healthy services failed", e))?;

        if !response.status().is_success() {
            return Err(DiscoveryError::Registry(format!(
                "query healthy services failed: {}",
                Self::error_body(response).await
            )));
        }

        let entries: Vec<HealthEntry> = response
            .json()
            .await
            .map_err(|e| transport_error("decode health response failed", e))?;

        let endpoints: Vec<Endpoint> =
            entries.into_iter().map(HealthEntry::into_endpoint).collect();

        debug!(
            "Discovered {} healthy instances of service {}",
            endpoints.len(),
            service
        );
        Ok(endpoints)
    }

    async fn register(&self, registration: &ServiceRegistration) -> Result<()> {
        let url = self.api_url(&["v1", "agent", "service", "register"])?;
        let payload = Self::registration_payload(registration);

        let response = self
            .client
            .put(url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| transport_error("service register failed", e))?;

        if response.status().is_success() {
            info!(
                service = %registration.name,
                id = %registration.id,
                "Registered service with Consul"
            );
            Ok(())
        } else {
            Err(DiscoveryError::Registry(format!(
                "service register failed: {}",
                Self::error_body(response).await
            )))
        }
    }

    async fn deregister(&self, service_id: &str) -> Result<()> {
        let url = self.api_url(&["v1", "agent", "service", "deregister", service_id])?;

        let response = self
            .client
            .put(url)
            .send()
            .await
            .map_err(|e| transport_error("service deregister failed", e))?;

        if response.status().is_success() {
            info!(service_id, "Deregistered service from Consul");
            Ok(())
        } else {
            Err(DiscoveryError::Registry(format!(
                "service deregister failed: {}",
                Self::error_body(response).await
            )))
        }
    }
}
