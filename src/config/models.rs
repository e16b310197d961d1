//! Configuration data structures for Junction.
//!
//! These types map directly to YAML (also JSON / TOML) configuration
//! files. They are intentionally serde-friendly and include defaults so
//! that minimal configs remain concise.
use serde::{Deserialize, Serialize};

use crate::core::load_balancer::SelectionStrategy;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct GatewayConfig {
    /// Address the gateway listens on, e.g. "0.0.0.0:8080".
    pub listen_addr: String,
    /// How long in-flight connections get to drain after SIGTERM/SIGINT
    /// before the process stops waiting for them.
    pub shutdown_grace_secs: u64,
    pub health_check: HealthCheckConfig,
    pub proxy: ProxyConfig,
    pub registry: RegistryConfig,
    pub load_balancer: LoadBalancerConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthConfig>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            shutdown_grace_secs: 30,
            health_check: HealthCheckConfig::default(),
            proxy: ProxyConfig::default(),
            registry: RegistryConfig::default(),
            load_balancer: LoadBalancerConfig::default(),
            auth: None,
        }
    }
}

impl GatewayConfig {
    pub fn builder() -> GatewayConfigBuilder {
        GatewayConfigBuilder::default()
    }
}

/// Active health probing of registered instances.
///
/// The probe timeout is independent of (and much shorter than) the proxy
/// forwarding timeout; the two must never be conflated. Setting both
/// thresholds to 1 reproduces single-probe flipping, which is known to
/// cause routing churn under network jitter.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HealthCheckConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub timeout_secs: u64,
    /// Probe path on every backend instance.
    pub path: String,
    pub unhealthy_threshold: u32,
    pub healthy_threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 10,
            timeout_secs: 2,
            path: "/health".to_string(),
            unhealthy_threshold: 3,
            healthy_threshold: 2,
        }
    }
}

/// Forwarding behaviour of the reverse proxy.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ProxyConfig {
    /// Upper bound on one proxied upstream request.
    pub timeout_secs: u64,
    /// Extra attempts after a transport failure. Applies only to
    /// idempotent methods (GET/HEAD/OPTIONS); each retry re-selects an
    /// instance. 0 disables retrying.
    pub max_retries: u32,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_retries: 0,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RegistryConfig {
    /// Instances not seen within this window are removed by the sweep.
    pub stale_timeout_secs: u64,
    pub cleanup_interval_secs: u64,
    /// Instances registered at boot, before any dynamic registration.
    pub instances: Vec<StaticInstanceConfig>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            stale_timeout_secs: 120,
            cleanup_interval_secs: 30,
            instances: Vec::new(),
        }
    }
}

/// Bootstrap-time instance definition.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StaticInstanceConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct LoadBalancerConfig {
    pub strategy: SelectionStrategy,
}

/// Bearer-token authentication for proxied routes.
///
/// Only validation is configured here; token issuance belongs to the auth
/// service behind the gateway.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AuthConfig {
    pub enabled: bool,
    /// HS256 shared secret used to validate inbound JWTs.
    pub secret: String,
}

/// Builder for `GatewayConfig`, mainly used by tests and embedders.
#[derive(Default)]
pub struct GatewayConfigBuilder {
    listen_addr: Option<String>,
    shutdown_grace_secs: Option<u64>,
    health_check: Option<HealthCheckConfig>,
    proxy: Option<ProxyConfig>,
    registry: Option<RegistryConfig>,
    load_balancer: Option<LoadBalancerConfig>,
    auth: Option<AuthConfig>,
}

impl GatewayConfigBuilder {
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.listen_addr = Some(addr.into());
        self
    }

    pub fn shutdown_grace_secs(mut self, secs: u64) -> Self {
        self.shutdown_grace_secs = Some(secs);
        self
    }

    pub fn health_check(mut self, config: HealthCheckConfig) -> Self {
        self.health_check = Some(config);
        self
    }

    pub fn proxy(mut self, config: ProxyConfig) -> Self {
        self.proxy = Some(config);
        self
    }

    pub fn registry(mut self, config: RegistryConfig) -> Self {
        self.registry = Some(config);
        self
    }

    pub fn strategy(mut self, strategy: SelectionStrategy) -> Self {
        self.load_balancer = Some(LoadBalancerConfig { strategy });
        self
    }

    pub fn auth(mut self, config: AuthConfig) -> Self {
        self.auth = Some(config);
        self
    }

    pub fn build(self) -> GatewayConfig {
        GatewayConfig {
            listen_addr: self
                .listen_addr
                .unwrap_or_else(|| "127.0.0.1:8080".to_string()),
            shutdown_grace_secs: self.shutdown_grace_secs.unwrap_or(30),
            health_check: self.health_check.unwrap_or_default(),
            proxy: self.proxy.unwrap_or_default(),
            registry: self.registry.unwrap_or_default(),
            load_balancer: self.load_balancer.unwrap_or_default(),
            auth: self.auth,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.listen_addr, "127.0.0.1:8080");
        assert_eq!(config.shutdown_grace_secs, 30);
        assert_eq!(config.proxy.timeout_secs, 30);
        assert_eq!(config.proxy.max_retries, 0);
        assert_eq!(config.health_check.interval_secs, 10);
        assert_eq!(config.health_check.timeout_secs, 2);
        assert_eq!(config.load_balancer.strategy, SelectionStrategy::RoundRobin);
        assert!(config.auth.is_none());
    }

    #[test]
    fn test_builder() {
        let config = GatewayConfig::builder()
            .listen_addr("0.0.0.0:9000")
            .strategy(SelectionStrategy::Random)
            .proxy(ProxyConfig {
                timeout_secs: 5,
                max_retries: 2,
            })
            .build();
        assert_eq!(config.listen_addr, "0.0.0.0:9000");
        assert_eq!(config.load_balancer.strategy, SelectionStrategy::Random);
        assert_eq!(config.proxy.max_retries, 2);
    }

    #[test]
    fn test_deserialize_minimal() {
        let config: GatewayConfig = serde_json::from_str(r#"{"listen_addr":"0.0.0.0:8080"}"#)
            .expect("minimal config should deserialize");
        assert!(config.health_check.enabled);
        assert!(config.registry.instances.is_empty());
    }
}
