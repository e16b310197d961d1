//! Backend selection over the registry's healthy set.
//!
//! The balancer queries the registry fresh on every `select` call rather
//! than holding its own copy of the instance list, so it can never route
//! on a stale snapshot. The only state it owns is the per-service
//! round-robin counter.

use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::core::{instance::ServiceInstance, registry::ServiceRegistry};

/// Selection algorithm, fixed at construction time (not per request).
///
/// `LeastConnections` and weighted variants are intentionally absent:
/// the platform never implemented their selection logic.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    #[default]
    RoundRobin,
    Random,
}

/// Picks one healthy instance per logical service name.
pub struct LoadBalancer {
    registry: Arc<ServiceRegistry>,
    strategy: SelectionStrategy,
    // One monotonically increasing counter per service name; only used by
    // round-robin, guarded separately from the registry lock.
    counters: Mutex<HashMap<String, usize>>,
}

impl LoadBalancer {
    pub fn new(registry: Arc<ServiceRegistry>, strategy: SelectionStrategy) -> Self {
        Self {
            registry,
            strategy,
            counters: Mutex::new(HashMap::new()),
        }
    }

    pub fn strategy(&self) -> SelectionStrategy {
        self.strategy
    }

    /// Fetch all instances for `service`, filter to healthy, then apply
    /// the strategy. `None` means the caller must answer "service
    /// unavailable"; no queuing or buffering happens here.
    pub fn select(&self, service: &str) -> Option<ServiceInstance> {
        let mut candidates = self.registry.get_services_by_name(service);
        candidates.retain(|i| i.is_healthy());
        if candidates.is_empty() {
            return None;
        }
        // Stable order so the round-robin cycle is deterministic even
        // though the registry map iterates in arbitrary order.
        candidates.sort_by(|a, b| a.id.cmp(&b.id));

        let index = match self.strategy {
            SelectionStrategy::RoundRobin => {
                let mut counters = self.counters.lock();
                let counter = counters.entry(service.to_string()).or_insert(0);
                let index = *counter % candidates.len();
                *counter = counter.wrapping_add(1);
                index
            }
            SelectionStrategy::Random => rand::rng().random_range(0..candidates.len()),
        };
        candidates.into_iter().nth(index)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::core::instance::{HealthStatus, RegisterRequest};

    fn register(registry: &ServiceRegistry, name: &str, host: &str, healthy: bool) -> String {
        let stored = registry.register(
            RegisterRequest {
                name: name.to_string(),
                host: host.to_string(),
                port: 8081,
                version: None,
                tags: Vec::new(),
            }
            .into_instance(),
        );
        let status = if healthy {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };
        registry.update_health(&stored.id, status);
        stored.id
    }

    #[test]
    fn test_round_robin_fairness() {
        let registry = Arc::new(ServiceRegistry::new());
        for i in 0..3 {
            register(&registry, "auth-service", &format!("host{i}"), true);
        }
        let balancer = LoadBalancer::new(registry, SelectionStrategy::RoundRobin);

        // k = 3 instances, n = k * m selections: each seen exactly m times.
        let mut seen: HashMap<String, usize> = HashMap::new();
        for _ in 0..12 {
            let picked = balancer.select("auth-service").unwrap();
            *seen.entry(picked.id).or_insert(0) += 1;
        }
        assert_eq!(seen.len(), 3);
        assert!(seen.values().all(|&count| count == 4));
    }

    #[test]
    fn test_round_robin_cycles_in_fixed_order() {
        let registry = Arc::new(ServiceRegistry::new());
        register(&registry, "auth-service", "host1", true);
        register(&registry, "auth-service", "host2", true);
        let balancer = LoadBalancer::new(registry, SelectionStrategy::RoundRobin);

        let first = balancer.select("auth-service").unwrap();
        let second = balancer.select("auth-service").unwrap();
        let third = balancer.select("auth-service").unwrap();
        let fourth = balancer.select("auth-service").unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(first.id, third.id);
        assert_eq!(second.id, fourth.id);
    }

    #[test]
    fn test_skips_unhealthy_instances() {
        let registry = Arc::new(ServiceRegistry::new());
        let healthy = register(&registry, "auth-service", "host1", true);
        register(&registry, "auth-service", "host2", false);
        let balancer = LoadBalancer::new(registry, SelectionStrategy::RoundRobin);

        for _ in 0..5 {
            assert_eq!(balancer.select("auth-service").unwrap().id, healthy);
        }
    }

    #[test]
    fn test_unknown_health_not_routable() {
        let registry = Arc::new(ServiceRegistry::new());
        registry.register(
            RegisterRequest {
                name: "auth-service".to_string(),
                host: "host1".to_string(),
                port: 8081,
                version: None,
                tags: Vec::new(),
            }
            .into_instance(),
        );
        let balancer = LoadBalancer::new(registry, SelectionStrategy::RoundRobin);
        assert!(balancer.select("auth-service").is_none());
    }

    #[test]
    fn test_no_instances_returns_none() {
        let registry = Arc::new(ServiceRegistry::new());
        let balancer = LoadBalancer::new(registry, SelectionStrategy::RoundRobin);
        assert!(balancer.select("missing-service").is_none());
    }

    #[test]
    fn test_single_instance_degenerates() {
        let registry = Arc::new(ServiceRegistry::new());
        let only = register(&registry, "auth-service", "host1", true);

        for strategy in [SelectionStrategy::RoundRobin, SelectionStrategy::Random] {
            let balancer = LoadBalancer::new(registry.clone(), strategy);
            for _ in 0..4 {
                assert_eq!(balancer.select("auth-service").unwrap().id, only);
            }
        }
    }

    #[test]
    fn test_random_picks_from_healthy_set() {
        let registry = Arc::new(ServiceRegistry::new());
        let a = register(&registry, "auth-service", "host1", true);
        let b = register(&registry, "auth-service", "host2", true);
        let balancer = LoadBalancer::new(registry, SelectionStrategy::Random);

        for _ in 0..20 {
            let picked = balancer.select("auth-service").unwrap();
            assert!(picked.id == a || picked.id == b);
        }
    }

    #[test]
    fn test_counters_are_per_service() {
        let registry = Arc::new(ServiceRegistry::new());
        register(&registry, "auth-service", "host1", true);
        register(&registry, "auth-service", "host2", true);
        register(&registry, "content-service", "host3", true);
        register(&registry, "content-service", "host4", true);
        let balancer = LoadBalancer::new(registry, SelectionStrategy::RoundRobin);

        let auth_first = balancer.select("auth-service").unwrap();
        // Selections against another service must not advance this cycle.
        balancer.select("content-service").unwrap();
        let auth_second = balancer.select("auth-service").unwrap();
        assert_ne!(auth_first.id, auth_second.id);
    }
}
