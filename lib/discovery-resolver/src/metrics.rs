//! Prometheus metrics for endpoint resolution

use anyhow::Result;
use prometheus::{
    Counter, CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Prometheus metrics collector for the resolver
#[derive(Clone)]
pub struct ResolverMetrics {
    /// Per-service resolution outcomes
    pub resolutions_total: CounterVec,
    /// Cache lookups by result (hit/miss)
    pub cache_lookups_total: CounterVec,
    /// Registry query latency in seconds
    pub registry_query_duration_seconds: HistogramVec,
    /// Background refresh passes run
    pub refresh_passes_total: Counter,
    /// Prometheus registry for metrics
    pub registry: Arc<Registry>,
}

impl ResolverMetrics {
    /// Create a new metrics collector
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());

        let resolutions_total = CounterVec::new(
            Opts::new(
                "discovery_resolutions_total",
                "Service resolutions by outcome",
            ),
            &["service", "outcome"],
        )?;

        let cache_lookups_total = CounterVec::new(
            Opts::new("discovery_cache_lookups_total", "Endpoint cache lookups"),
            &["result"],
        )?;

        let registry_query_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "discovery_registry_query_duration_seconds",
                "Registry query latency in seconds",
            ),
            &["service"],
        )?;

        let refresh_passes_total = Counter::new(
            "discovery_refresh_passes_total",
            "Background refresh passes",
        )?;

        registry.register(Box::new(resolutions_total.clone()))?;
        registry.register(Box::new(cache_lookups_total.clone()))?;
        registry.register(Box::new(registry_query_duration_seconds.clone()))?;
        registry.register(Box::new(refresh_passes_total.clone()))?;

        Ok(Self {
            resolutions_total,
            cache_lookups_total,
            registry_query_duration_seconds,
            refresh_passes_total,
            registry,
        })
    }

    pub(crate) fn record_resolution(&self, service: &str, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.resolutions_total
            .with_label_values(&[service, outcome])
            .inc();
    }

    pub(crate) fn record_cache_lookup(&self, hit: bool) {
        let result = if hit { "hit" } else { "miss" };
        self.cache_lookups_total.with_label_values(&[result]).inc();
    }

    /// Gather all metrics in Prometheus text format
    pub fn gather(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = vec![];
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

impl Default for ResolverMetrics {
    fn default() -> Self {
        Self::new().expect("Failed to create default ResolverMetrics")
    }
}
