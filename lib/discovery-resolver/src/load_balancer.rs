//! Load balancing strategies for choosing one endpoint per service

use discovery_core::{DiscoveryError, Endpoint, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};

/// Load balancing strategy
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LoadBalancingStrategy {
    /// Uniform random choice
    Random,
    /// Rotate through endpoints, one counter per service name
    RoundRobin,
    /// Any value that names no known strategy
    Unsupported(String),
}

impl LoadBalancingStrategy {
    pub fn as_str(&self) -> &str {
        match self {
            LoadBalancingStrategy::Random => "random",
            LoadBalancingStrategy::RoundRobin => "round_robin",
            LoadBalancingStrategy::Unsupported(value) => value,
        }
    }
}

impl Default for LoadBalancingStrategy {
    fn default() -> Self {
        LoadBalancingStrategy::RoundRobin
    }
}

impl From<&str> for LoadBalancingStrategy {
    fn from(value: &str) -> Self {
        match value {
            "random" => LoadBalancingStrategy::Random,
            "round_robin" => LoadBalancingStrategy::RoundRobin,
            other => LoadBalancingStrategy::Unsupported(other.to_string()),
        }
    }
}

impl From<String> for LoadBalancingStrategy {
    fn from(value: String) -> Self {
        LoadBalancingStrategy::from(value.as_str())
    }
}

impl From<LoadBalancingStrategy> for String {
    fn from(strategy: LoadBalancingStrategy) -> Self {
        strategy.as_str().to_string()
    }
}

impl fmt::Display for LoadBalancingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Load balancer for selecting endpoints.
///
/// Random selection draws from one generator seeded when the balancer is
/// built. Round-robin keeps a counter per service name, so a service's
/// rotation survives endpoint list replacement.
pub struct LoadBalancer {
    rng: Mutex<StdRng>,
    round_robin_indexes: Mutex<HashMap<String, usize>>,
}

impl LoadBalancer {
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    /// Balancer with a deterministic random sequence
    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self {
            rng: Mutex::new(rng),
            round_robin_indexes: Mutex::new(HashMap::new()),
        }
    }

    /// Select an endpoint using `strategy`
    pub fn select<'a>(
        &self,
        strategy: &LoadBalancingStrategy,
        endpoints: &'a [Endpoint],
    ) -> Result<&'a Endpoint> {
        match strategy {
            LoadBalancingStrategy::Random => self.select_random(endpoints),
            LoadBalancingStrategy::RoundRobin => {
                self.select_round_robin(endpoints).ok_or_else(|| {
                    DiscoveryError::NoEndpoints("no endpoints to select from".to_string())
                })
            }
            LoadBalancingStrategy::Unsupported(value) => {
                Err(DiscoveryError::UnsupportedStrategy(value.clone()))
            }
        }
    }

    /// Select endpoint uniformly at random
    pub fn select_random<'a>(&self, endpoints: &'a [Endpoint]) -> Result<&'a Endpoint> {
        if endpoints.is_empty() {
            return Err(DiscoveryError::NoEndpoints(
                "no endpoints to select from".to_string(),
            ));
        }

        let index = self
            .rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .gen_range(0..endpoints.len());
        Ok(&endpoints[index])
    }

    /// Select endpoint using round-robin.
    ///
    /// All endpoints must belong to one service; the first endpoint names it.
    /// The counter advances exactly once per call and is wrapped only at
    /// selection time.
    pub fn select_round_robin<'a>(&self, endpoints: &'a [Endpoint]) -> Option<&'a Endpoint> {
        let service = &endpoints.first()?.service;

        let mut indexes = self
            .round_robin_indexes
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let counter = indexes.entry(service.clone()).or_insert(0);
        let current = *counter;
        *counter = current.wrapping_add(1);

        endpoints.get(current % endpoints.len())
    }

    /// Current round-robin counter for `service` (0 if never selected)
    pub fn round_robin_counter(&self, service: &str) -> usize {
        self.round_robin_indexes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(service)
            .copied()
            .unwrap_or(0)
    }
}

impl Default for LoadBalancer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn endpoints(service: &str, count: u16) -> Vec<Endpoint> {
        (0..count)
            .map(|i| {
                let address = format!("10.0.0.{}", i + 1);
                Endpoint::new(format!("{}-{}", service, i), service, address, 8080)
            })
            .collect()
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!(LoadBalancingStrategy::from("random"), LoadBalancingStrategy::Random);
        assert_eq!(LoadBalancingStrategy::from("round_robin"), LoadBalancingStrategy::RoundRobin);
        assert_eq!(
            LoadBalancingStrategy::from("least_conn"),
            LoadBalancingStrategy::Unsupported("least_conn".to_string())
        );
        assert_eq!(LoadBalancingStrategy::RoundRobin.to_string(), "round_robin");
    }

    #[test]
    fn test_strategy_serde() {
        let strategy: LoadBalancingStrategy = serde_json::from_str("\"random\"").unwrap();
        assert_eq!(strategy, LoadBalancingStrategy::Random);
        assert_eq!(
            serde_json::to_string(&LoadBalancingStrategy::RoundRobin).unwrap(),
            "\"round_robin\""
        );
    }

    #[test]
    fn test_round_robin_sequence() {
        let lb = LoadBalancer::new();
        let eps = endpoints("api", 3);

        let picked: Vec<&str> = (0..7)
            .map(|_| lb.select_round_robin(&eps).unwrap().id.as_str())
            .collect();
        assert_eq!(
            picked,
            vec!["api-0", "api-1", "api-2", "api-0", "api-1", "api-2", "api-0"]
        );
        assert_eq!(lb.round_robin_counter("api"), 7);
    }

    #[test]
    fn test_round_robin_is_per_service() {
        let lb = LoadBalancer::new();
        let api = endpoints("api", 2);
        let db = endpoints("db", 2);

        assert_eq!(lb.select_round_robin(&api).unwrap().id, "api-0");
        assert_eq!(lb.select_round_robin(&api).unwrap().id, "api-1");
        assert_eq!(lb.select_round_robin(&db).unwrap().id, "db-0");
        assert_eq!(lb.round_robin_counter("api"), 2);
        assert_eq!(lb.round_robin_counter("db"), 1);
    }

    #[test]
    fn test_round_robin_survives_list_replacement() {
        let lb = LoadBalancer::new();
        let three = endpoints("api", 3);
        lb.select_round_robin(&three);
        lb.select_round_robin(&three);
        lb.select_round_robin(&three);

        // Counter is 3; against a shorter list the index is 3 mod 2
        let two = endpoints("api", 2);
        assert_eq!(lb.select_round_robin(&two).unwrap().id, "api-1");
        assert_eq!(lb.round_robin_counter("api"), 4);
    }

    #[test]
    fn test_round_robin_empty() {
        let lb = LoadBalancer::new();
        assert!(lb.select_round_robin(&[]).is_none());
        assert!(matches!(
            lb.select(&LoadBalancingStrategy::RoundRobin, &[]),
            Err(DiscoveryError::NoEndpoints(_))
        ));
    }

    #[test]
    fn test_random_empty() {
        let lb = LoadBalancer::new();
        assert!(matches!(
            lb.select_random(&[]),
            Err(DiscoveryError::NoEndpoints(_))
        ));
    }

    #[test]
    fn test_random_covers_all_endpoints() {
        let lb = LoadBalancer::with_seed(7);
        let eps = endpoints("api", 4);

        let seen: HashSet<&str> = (0..200)
            .map(|_| lb.select_random(&eps).unwrap().id.as_str())
            .collect();
        assert_eq!(seen.len(), 4);
    }

    #[test]
    fn test_random_is_deterministic_with_seed() {
        let eps = endpoints("api", 5);
        let a = LoadBalancer::with_seed(42);
        let b = LoadBalancer::with_seed(42);

        for _ in 0..20 {
            assert_eq!(a.select_random(&eps).unwrap().id, b.select_random(&eps).unwrap().id);
        }
    }

    #[test]
    fn test_unsupported_strategy() {
        let lb = LoadBalancer::new();
        let eps = endpoints("api", 2);
        let result = lb.select(&LoadBalancingStrategy::from("weighted"), &eps);
        assert!(matches!(result, Err(DiscoveryError::UnsupportedStrategy(s)) if s == "weighted"));
        assert_eq!(lb.round_robin_counter("api"), 0);
    }

    #[test]
    fn test_round_robin_concurrent_callers() {
        let lb = Arc::new(LoadBalancer::new());
        let eps = Arc::new(endpoints("api", 4));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let lb = lb.clone();
                let eps = eps.clone();
                std::thread::spawn(move || {
                    let mut counts = [0usize; 4];
                    for _ in 0..100 {
                        let picked = lb.select_round_robin(&eps).unwrap();
                        let index = eps.iter().position(|e| e.id == picked.id).unwrap();
                        counts[index] += 1;
                    }
                    counts
                })
            })
            .collect();

        let mut totals = [0usize; 4];
        for handle in handles {
            for (total, count) in totals.iter_mut().zip(handle.join().unwrap()) {
                *total += count;
            }
        }

        // 800 selections over 4 endpoints distribute exactly evenly
        assert_eq!(totals, [200, 200, 200, 200]);
        assert_eq!(lb.round_robin_counter("api"), 800);
    }
}
