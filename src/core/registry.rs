//! Concurrent in-memory store of known service instances.
//!
//! The registry is the single piece of state shared between request
//! handlers, the health monitor and the admin API. Reads take the shared
//! lock, writes the exclusive lock, and no operation ever holds the lock
//! across I/O: health probes and upstream forwards happen outside the
//! critical section and report back with a short locked write.
//!
//! Backend selection deliberately does *not* live here; the registry only
//! filters by health and the [`crate::core::LoadBalancer`] owns the
//! selection algorithm and its counters.

use std::{collections::HashMap, time::Duration};

use chrono::Utc;
use parking_lot::RwLock;

use crate::core::instance::{HealthStatus, ServiceInstance};

/// Concurrency-safe CRUD over the instance set plus the health-state
/// queries used by the load balancer. Cheap to share via `Arc`.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    instances: RwLock<HashMap<String, ServiceInstance>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            instances: RwLock::new(HashMap::new()),
        }
    }

    /// Insert or overwrite by `id` (last-write-wins) and stamp `last_seen`.
    ///
    /// There is intentionally no uniqueness check on `(name, host, port)`:
    /// re-registering the same physical instance under a new id is allowed
    /// and shows up as two routable replicas until the stale sweep or an
    /// explicit deregistration removes the old record.
    pub fn register(&self, mut instance: ServiceInstance) -> ServiceInstance {
        instance.last_seen = Utc::now();
        tracing::info!(
            instance.id = %instance.id,
            service = %instance.name,
            address = %instance.address(),
            "registered service instance"
        );
        crate::metrics::set_instance_health(&instance.id, &instance.name, instance.health);
        self.instances
            .write()
            .insert(instance.id.clone(), instance.clone());
        instance
    }

    /// Remove by id. Returns whether a record was actually removed, so a
    /// second call with the same id is an idempotent no-op.
    pub fn deregister(&self, id: &str) -> bool {
        let removed = self.instances.write().remove(id);
        if let Some(instance) = removed {
            tracing::info!(
                instance.id = %id,
                service = %instance.name,
                "deregistered service instance"
            );
            true
        } else {
            false
        }
    }

    pub fn get(&self, id: &str) -> Option<ServiceInstance> {
        self.instances.read().get(id).cloned()
    }

    /// Convenience lookup: first healthy instance for a logical name.
    /// Not the routing path; the load balancer applies the real selection.
    pub fn get_by_name(&self, name: &str) -> Option<ServiceInstance> {
        self.instances
            .read()
            .values()
            .find(|i| i.name == name && i.is_healthy())
            .cloned()
    }

    /// All instances carrying `name`, regardless of health. The load
    /// balancer applies its own healthy-filter on top of this.
    pub fn get_services_by_name(&self, name: &str) -> Vec<ServiceInstance> {
        self.instances
            .read()
            .values()
            .filter(|i| i.name == name)
            .cloned()
            .collect()
    }

    pub fn all(&self) -> Vec<ServiceInstance> {
        self.instances.read().values().cloned().collect()
    }

    /// Set the health state of an instance and refresh `last_seen`.
    /// Returns false when the id is unknown (e.g. deregistered while a
    /// probe was in flight); concurrent updates are last-writer-wins.
    pub fn update_health(&self, id: &str, status: HealthStatus) -> bool {
        let mut guard = self.instances.write();
        match guard.get_mut(id) {
            Some(instance) => {
                if instance.health != status {
                    tracing::info!(
                        instance.id = %id,
                        service = %instance.name,
                        from = %instance.health,
                        to = %status,
                        "instance health changed"
                    );
                }
                instance.health = status;
                instance.last_seen = Utc::now();
                crate::metrics::set_instance_health(id, &instance.name, status);
                true
            }
            None => false,
        }
    }

    /// Refresh `last_seen` without touching health. Used by the health
    /// monitor on successful probes that do not flip the state.
    pub fn touch(&self, id: &str) -> bool {
        let mut guard = self.instances.write();
        match guard.get_mut(id) {
            Some(instance) => {
                instance.last_seen = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Remove every instance whose `last_seen` is older than `now - timeout`.
    /// Handles instances that crashed without deregistering.
    pub fn cleanup_stale(&self, timeout: Duration) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::zero());
        let mut guard = self.instances.write();
        let before = guard.len();
        guard.retain(|id, instance| {
            let keep = instance.last_seen >= cutoff;
            if !keep {
                tracing::warn!(
                    instance.id = %id,
                    service = %instance.name,
                    last_seen = %instance.last_seen,
                    "removing stale service instance"
                );
            }
            keep
        });
        before - guard.len()
    }

    /// `(healthy, total)` instance counts, used by the readiness endpoint.
    pub fn counts(&self) -> (usize, usize) {
        let guard = self.instances.read();
        let healthy = guard.values().filter(|i| i.is_healthy()).count();
        (healthy, guard.len())
    }

    pub fn len(&self) -> usize {
        self.instances.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::instance::RegisterRequest;

    fn instance(name: &str, host: &str, port: u16) -> ServiceInstance {
        RegisterRequest {
            name: name.to_string(),
            host: host.to_string(),
            port,
            version: None,
            tags: Vec::new(),
        }
        .into_instance()
    }

    #[test]
    fn test_register_and_get() {
        let registry = ServiceRegistry::new();
        let stored = registry.register(instance("auth-service", "host1", 8081));

        let found = registry.get(&stored.id).expect("instance should exist");
        assert_eq!(found.name, "auth-service");
        assert_eq!(found.health, HealthStatus::Unknown);
    }

    #[test]
    fn test_register_last_write_wins() {
        let registry = ServiceRegistry::new();
        let mut first = instance("auth-service", "host1", 8081);
        first.id = "fixed-id".to_string();
        registry.register(first);

        let mut second = instance("auth-service", "host2", 9090);
        second.id = "fixed-id".to_string();
        registry.register(second);

        assert_eq!(registry.len(), 1);
        let found = registry.get("fixed-id").unwrap();
        assert_eq!(found.host, "host2");
        assert_eq!(found.port, 9090);
    }

    #[test]
    fn test_deregister_idempotent() {
        let registry = ServiceRegistry::new();
        let stored = registry.register(instance("auth-service", "host1", 8081));

        assert!(registry.deregister(&stored.id));
        assert!(!registry.deregister(&stored.id));
        assert!(registry.all().is_empty());
    }

    #[test]
    fn test_get_services_by_name_ignores_health() {
        let registry = ServiceRegistry::new();
        let a = registry.register(instance("auth-service", "host1", 8081));
        let b = registry.register(instance("auth-service", "host2", 8081));
        registry.register(instance("content-service", "host3", 8082));

        registry.update_health(&a.id, HealthStatus::Healthy);
        registry.update_health(&b.id, HealthStatus::Unhealthy);

        let found = registry.get_services_by_name("auth-service");
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn test_get_by_name_filters_to_healthy() {
        let registry = ServiceRegistry::new();
        let a = registry.register(instance("auth-service", "host1", 8081));
        registry.register(instance("auth-service", "host2", 8081));

        assert!(registry.get_by_name("auth-service").is_none());

        registry.update_health(&a.id, HealthStatus::Healthy);
        let found = registry.get_by_name("auth-service").unwrap();
        assert_eq!(found.id, a.id);
    }

    #[test]
    fn test_update_health_unknown_id() {
        let registry = ServiceRegistry::new();
        assert!(!registry.update_health("missing", HealthStatus::Healthy));
        assert!(!registry.touch("missing"));
    }

    #[test]
    fn test_update_health_refreshes_last_seen() {
        let registry = ServiceRegistry::new();
        let stored = registry.register(instance("auth-service", "host1", 8081));
        let before = registry.get(&stored.id).unwrap().last_seen;

        registry.update_health(&stored.id, HealthStatus::Healthy);
        let after = registry.get(&stored.id).unwrap().last_seen;
        assert!(after >= before);
    }

    #[test]
    fn test_cleanup_stale_boundary() {
        let registry = ServiceRegistry::new();
        let timeout = Duration::from_secs(60);

        let mut stale = instance("auth-service", "host1", 8081);
        stale.id = "stale".to_string();
        registry.register(stale);
        let mut fresh = instance("auth-service", "host2", 8081);
        fresh.id = "fresh".to_string();
        registry.register(fresh);

        // Backdate the stale record past the cutoff.
        {
            let mut guard = registry.instances.write();
            let record = guard.get_mut("stale").unwrap();
            record.last_seen = Utc::now() - chrono::Duration::seconds(61);
        }

        assert_eq!(registry.cleanup_stale(timeout), 1);
        assert!(registry.get("stale").is_none());
        assert!(registry.get("fresh").is_some());
    }

    #[test]
    fn test_counts() {
        let registry = ServiceRegistry::new();
        let a = registry.register(instance("auth-service", "host1", 8081));
        registry.register(instance("auth-service", "host2", 8081));

        registry.update_health(&a.id, HealthStatus::Healthy);
        assert_eq!(registry.counts(), (1, 2));
    }

    #[test]
    fn test_concurrent_registration() {
        use std::sync::Arc;

        let registry = Arc::new(ServiceRegistry::new());
        let mut handles = Vec::new();
        for i in 0..8u16 {
            let registry = registry.clone();
            handles.push(std::thread::spawn(move || {
                for j in 0..50u16 {
                    let stored =
                        registry.register(instance("auth-service", "host", 8000 + i * 50 + j));
                    registry.update_health(&stored.id, HealthStatus::Healthy);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.len(), 400);
        assert_eq!(registry.counts().0, 400);
    }
}
