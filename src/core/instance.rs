use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Observed health of a service instance.
///
/// `Unknown` is the state between registration and the first probe result;
/// the load balancer treats it the same as `Unhealthy` and never routes to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Unknown,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
            HealthStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// One running, network-addressable replica of a backend service.
///
/// Many instances may share a `name` (horizontal replicas); `id` is unique
/// within the registry for the lifetime of the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInstance {
    pub id: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub health: HealthStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub last_seen: DateTime<Utc>,
}

impl ServiceInstance {
    /// `host:port` network address of the instance.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Base URL used both for proxied requests and health probes.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn is_healthy(&self) -> bool {
        self.health == HealthStatus::Healthy
    }
}

/// Admin-API registration payload: everything a caller may set.
///
/// The registry assigns `id`, starts `health` at `Unknown` and stamps
/// `last_seen` itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub name: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl RegisterRequest {
    /// Materialize a full instance record with a fresh id.
    pub fn into_instance(self) -> ServiceInstance {
        ServiceInstance {
            id: Uuid::new_v4().to_string(),
            name: self.name,
            host: self.host,
            port: self.port,
            health: HealthStatus::Unknown,
            version: self.version,
            tags: self.tags,
            last_seen: Utc::now(),
        }
    }
}
