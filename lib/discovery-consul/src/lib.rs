//! Consul registry integration
pub mod client;

pub use client::ConsulRegistry;
