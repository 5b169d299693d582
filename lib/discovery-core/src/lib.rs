//! Core service discovery types
//!
//! This library provides:
//! - Endpoint and service registration data model
//! - The `Registry` capability implemented by registry backends
//! - An in-memory registry for development and tests
//! - A per-service endpoint cache with a runtime-configurable TTL

pub mod cache;
pub mod endpoint;
pub mod error;
pub mod registry;

pub use cache::{CacheEntry, EndpointCache, DEFAULT_CACHE_TTL};
pub use endpoint::{Endpoint, HealthCheck, ServiceRegistration};
pub use error::{DiscoveryError, Result};
pub use registry::{InMemoryRegistry, Registry};
