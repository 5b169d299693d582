//! Endpoint resolution, load balancing and background refresh
pub mod client;
pub mod config;
pub mod load_balancer;
pub mod metrics;
pub mod refresh;
pub mod resolver;

pub use client::DiscoveryClient;
pub use config::DiscoveryConfig;
pub use load_balancer::{LoadBalancer, LoadBalancingStrategy};
pub use metrics::ResolverMetrics;
pub use refresh::RefreshHandle;
pub use resolver::{Resolver, ServiceResolution};
