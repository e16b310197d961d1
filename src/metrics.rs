//! Metrics facade helpers for Junction.
//!
//! Thin wrappers around the `metrics` crate macros plus an RAII timer for
//! proxied requests. No exporter is embedded; the application can install
//! any compatible recorder.
//!
//! Families:
//! * `junction_requests_total` (counter: method, path, service, status)
//! * `junction_request_duration_seconds` (histogram: method, service)
//! * `junction_instance_health_status` (gauge per instance: 1 healthy, 0 otherwise)
//! * `junction_registered_instances` (gauge)
//! * `junction_health_probes_total` (counter: service, result)
use std::{collections::HashMap, sync::Mutex, time::Instant};

use metrics::{Unit, counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use once_cell::sync::Lazy;

use crate::core::instance::HealthStatus;

pub const JUNCTION_REQUESTS_TOTAL: &str = "junction_requests_total";
pub const JUNCTION_REQUEST_DURATION_SECONDS: &str = "junction_request_duration_seconds";
pub const JUNCTION_INSTANCE_HEALTH_STATUS: &str = "junction_instance_health_status";
pub const JUNCTION_REGISTERED_INSTANCES: &str = "junction_registered_instances";
pub const JUNCTION_HEALTH_PROBES_TOTAL: &str = "junction_health_probes_total";

/// Last reported health gauge per instance id, kept for ad-hoc export.
static INSTANCE_HEALTH_GAUGES: Lazy<Mutex<HashMap<String, f64>>> = Lazy::new(|| {
    describe_counter!(
        JUNCTION_REQUESTS_TOTAL,
        Unit::Count,
        "Total proxied requests handled by the gateway."
    );
    describe_histogram!(
        JUNCTION_REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "Latency of proxied requests, from resolution to final response."
    );
    describe_gauge!(
        JUNCTION_INSTANCE_HEALTH_STATUS,
        "Health of individual instances (1 healthy, 0 unhealthy/unknown)."
    );
    describe_gauge!(
        JUNCTION_REGISTERED_INSTANCES,
        "Number of instances currently in the registry."
    );
    describe_counter!(
        JUNCTION_HEALTH_PROBES_TOTAL,
        Unit::Count,
        "Health probes issued, labelled by result."
    );
    Mutex::new(HashMap::new())
});

/// Record the outcome of one proxied request.
pub fn record_proxied_request(
    method: &str,
    path: &str,
    service: &str,
    status: u16,
    duration: std::time::Duration,
) {
    counter!(
        JUNCTION_REQUESTS_TOTAL,
        "method" => method.to_string(),
        "path" => path.to_string(),
        "service" => service.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!(
        JUNCTION_REQUEST_DURATION_SECONDS,
        "method" => method.to_string(),
        "service" => service.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Set the health gauge for one instance.
pub fn set_instance_health(instance_id: &str, service: &str, status: HealthStatus) {
    let value = if status == HealthStatus::Healthy {
        1.0
    } else {
        0.0
    };
    if let Ok(mut gauges) = INSTANCE_HEALTH_GAUGES.lock() {
        gauges.insert(instance_id.to_string(), value);
    }
    gauge!(
        JUNCTION_INSTANCE_HEALTH_STATUS,
        "instance" => instance_id.to_string(),
        "service" => service.to_string()
    )
    .set(value);
}

pub fn set_registered_instances(count: usize) {
    gauge!(JUNCTION_REGISTERED_INSTANCES).set(count as f64);
}

pub fn record_health_probe(service: &str, success: bool) {
    let result = if success { "success" } else { "failure" };
    counter!(
        JUNCTION_HEALTH_PROBES_TOTAL,
        "service" => service.to_string(),
        "result" => result
    )
    .increment(1);
}

/// RAII timer emitting the request counter and duration histogram when
/// dropped, so early returns and error paths are still recorded.
pub struct ProxiedRequestTimer {
    start: Instant,
    method: String,
    path: String,
    service: String,
    status: u16,
}

impl ProxiedRequestTimer {
    pub fn new(method: &str, path: &str, service: &str) -> Self {
        Self {
            start: Instant::now(),
            method: method.to_string(),
            path: path.to_string(),
            service: service.to_string(),
            status: 0,
        }
    }

    pub fn set_status(&mut self, status: u16) {
        self.status = status;
    }
}

impl Drop for ProxiedRequestTimer {
    fn drop(&mut self) {
        record_proxied_request(
            &self.method,
            &self.path,
            &self.service,
            self.status,
            self.start.elapsed(),
        );
    }
}

/// Initialize metric descriptions (idempotent).
pub fn init_metrics() {
    Lazy::force(&INSTANCE_HEALTH_GAUGES);
}

/// Snapshot of instance health gauge values for ad-hoc exports.
pub fn instance_health_snapshot() -> HashMap<String, f64> {
    INSTANCE_HEALTH_GAUGES
        .lock()
        .map(|gauges| gauges.clone())
        .unwrap_or_default()
}
