//! Active health checking of registered service instances.
//!
//! The [`HealthMonitor`] supervises one long-lived probe task per
//! registered instance, reconciling the task set against the registry so
//! dynamically registered instances gain a checker and deregistered ones
//! lose theirs. It also owns the staleness sweep that reaps instances
//! which crashed without deregistering.
//!
//! Probes happen entirely outside the registry lock; each task reports
//! back with a short locked write (`update_health` / `touch`). Only this
//! module and the admin API mutate health state; the proxy router never
//! does.

use std::{collections::HashMap, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::{task::JoinHandle, time::interval};
use tokio_util::sync::CancellationToken;

use crate::{
    config::models::{HealthCheckConfig, RegistryConfig},
    core::{instance::HealthStatus, registry::ServiceRegistry},
    ports::http_client::HttpClient,
};

/// How often the supervisor compares its checker set with the registry.
const RECONCILE_INTERVAL: Duration = Duration::from_secs(1);

struct CheckerHandle {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Supervises per-instance health checkers and the staleness sweep.
pub struct HealthMonitor {
    registry: Arc<ServiceRegistry>,
    http_client: Arc<dyn HttpClient>,
    health_config: HealthCheckConfig,
    registry_config: RegistryConfig,
    checkers: Mutex<HashMap<String, CheckerHandle>>,
    root_token: CancellationToken,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        http_client: Arc<dyn HttpClient>,
        health_config: HealthCheckConfig,
        registry_config: RegistryConfig,
    ) -> Self {
        Self {
            registry,
            http_client,
            health_config,
            registry_config,
            checkers: Mutex::new(HashMap::new()),
            root_token: CancellationToken::new(),
            supervisor: Mutex::new(None),
        }
    }

    /// Start the supervisor loop. Idempotent; a second call is a no-op.
    pub fn start(self: Arc<Self>) {
        if !self.health_config.enabled {
            tracing::info!("health checking is disabled");
            return;
        }
        let mut guard = self.supervisor.lock();
        if guard.is_some() {
            return;
        }

        tracing::info!(
            interval_secs = self.health_config.interval_secs,
            timeout_secs = self.health_config.timeout_secs,
            path = %self.health_config.path,
            healthy_threshold = self.health_config.healthy_threshold,
            unhealthy_threshold = self.health_config.unhealthy_threshold,
            "starting health monitor"
        );

        let monitor = Arc::clone(&self);
        let token = self.root_token.clone();
        *guard = Some(tokio::spawn(async move {
            monitor.run_supervisor(token).await;
        }));
    }

    async fn run_supervisor(self: Arc<Self>, token: CancellationToken) {
        let mut reconcile_tick = interval(RECONCILE_INTERVAL);
        let mut cleanup_tick = interval(Duration::from_secs(
            self.registry_config.cleanup_interval_secs.max(1),
        ));
        // The first tick of a tokio interval fires immediately.
        cleanup_tick.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = reconcile_tick.tick() => self.reconcile().await,
                _ = cleanup_tick.tick() => {
                    let stale_timeout =
                        Duration::from_secs(self.registry_config.stale_timeout_secs);
                    let removed = self.registry.cleanup_stale(stale_timeout);
                    if removed > 0 {
                        tracing::info!(removed, "staleness sweep removed instances");
                    }
                    crate::metrics::set_registered_instances(self.registry.len());
                }
            }
        }
        tracing::debug!("health monitor supervisor exiting");
    }

    /// Align the set of running checkers with the registry contents.
    async fn reconcile(&self) {
        let current: HashMap<String, String> = self
            .registry
            .all()
            .into_iter()
            .map(|i| (i.id, i.name))
            .collect();

        let mut finished = Vec::new();
        {
            let mut checkers = self.checkers.lock();

            // Stop checkers for instances that left the registry.
            let gone: Vec<String> = checkers
                .keys()
                .filter(|id| !current.contains_key(*id))
                .cloned()
                .collect();
            for id in gone {
                if let Some(checker) = checkers.remove(&id) {
                    checker.token.cancel();
                    finished.push(checker.handle);
                }
            }

            // Spawn checkers for new instances.
            for (id, service) in &current {
                if checkers.contains_key(id) {
                    continue;
                }
                let token = self.root_token.child_token();
                let handle = tokio::spawn(run_instance_checker(
                    id.clone(),
                    service.clone(),
                    Arc::clone(&self.registry),
                    Arc::clone(&self.http_client),
                    self.health_config.clone(),
                    token.clone(),
                ));
                checkers.insert(id.clone(), CheckerHandle { token, handle });
            }
        }

        for handle in finished {
            let _ = handle.await;
        }
        crate::metrics::set_registered_instances(current.len());
    }

    /// Stop the supervisor and every checker, waiting for each task to
    /// finish. No registry writes from this monitor occur after return.
    pub async fn stop(&self) {
        self.root_token.cancel();

        let supervisor = self.supervisor.lock().take();
        if let Some(handle) = supervisor {
            let _ = handle.await;
        }

        let handles: Vec<JoinHandle<()>> = {
            let mut checkers = self.checkers.lock();
            checkers
                .drain()
                .map(|(_, checker)| checker.handle)
                .collect()
        };
        for handle in handles {
            let _ = handle.await;
        }
        tracing::info!("health monitor stopped");
    }
}

/// Probe loop for a single instance.
///
/// Each tick is independent: probe errors never terminate the loop, only
/// cancellation or the instance disappearing from the registry does.
/// Hysteresis counters are local to the task; with both thresholds at 1
/// this degenerates to flip-on-single-probe.
async fn run_instance_checker(
    instance_id: String,
    service: String,
    registry: Arc<ServiceRegistry>,
    http_client: Arc<dyn HttpClient>,
    config: HealthCheckConfig,
    token: CancellationToken,
) {
    let probe_interval = Duration::from_secs(config.interval_secs);
    let probe_timeout = Duration::from_secs(config.timeout_secs);
    let mut consecutive_successes: u32 = 0;
    let mut consecutive_failures: u32 = 0;

    tracing::debug!(instance.id = %instance_id, service = %service, "instance checker started");

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(probe_interval) => {}
        }

        let Some(instance) = registry.get(&instance_id) else {
            tracing::debug!(instance.id = %instance_id, "instance gone, checker exiting");
            break;
        };

        let url = format!("{}{}", instance.base_url(), config.path);
        let probe = http_client.health_check(&url, probe_timeout).await;
        let succeeded = matches!(probe, Ok(true));
        crate::metrics::record_health_probe(&service, succeeded);

        // Do not write to the registry if we were cancelled mid-probe.
        if token.is_cancelled() {
            break;
        }

        if succeeded {
            consecutive_successes += 1;
            consecutive_failures = 0;

            if instance.health != HealthStatus::Healthy {
                if consecutive_successes >= config.healthy_threshold {
                    tracing::info!(
                        instance.id = %instance_id,
                        service = %service,
                        successes = consecutive_successes,
                        "instance is now healthy"
                    );
                    registry.update_health(&instance_id, HealthStatus::Healthy);
                }
            } else {
                // Still healthy: refresh last_seen so the sweep keeps it.
                registry.touch(&instance_id);
            }
        } else {
            consecutive_failures += 1;
            consecutive_successes = 0;

            if let Err(err) = &probe {
                tracing::debug!(instance.id = %instance_id, error = %err, "health probe error");
            }
            if instance.health != HealthStatus::Unhealthy
                && consecutive_failures >= config.unhealthy_threshold
            {
                tracing::warn!(
                    instance.id = %instance_id,
                    service = %service,
                    failures = consecutive_failures,
                    "instance is now unhealthy"
                );
                registry.update_health(&instance_id, HealthStatus::Unhealthy);
            }
        }
    }
}
