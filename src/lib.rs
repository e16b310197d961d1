//! Junction - a request-routing gateway for microservice fleets.
//!
//! Junction sits in front of a set of backend services and takes care of
//! the plumbing between clients and service instances: a dynamic service
//! registry, active health checking, load-balanced reverse proxying and
//! WebSocket pass-through. It follows a **hexagonal architecture**:
//! business rules live in `core`, the outbound HTTP seam is a trait in
//! `ports`, and everything touching the network sits in `adapters`.
//!
//! # Features
//! - Dynamic service registry with last-write-wins registration and a
//!   staleness sweep for instances that vanish without deregistering
//! - Active health checking with configurable probe interval, timeout
//!   and flip hysteresis
//! - Round-robin and random load balancing over the healthy set
//! - Reverse proxying under `/api/v1/{service}/...` with forwarding
//!   headers and bounded upstream timeouts
//! - WebSocket proxying under `/ws/{service}` with pre-upgrade resolution
//! - Admin API for registration, liveness and readiness
//! - Optional bearer-token auth on proxied routes
//! - Structured tracing and a `metrics`-facade instrumentation layer
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use junction::{
//!     adapters::{AppState, HttpClientAdapter, ProxyRouter},
//!     config::GatewayConfig,
//!     core::{LoadBalancer, ServiceRegistry},
//! };
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let config = Arc::new(GatewayConfig::default());
//! let registry = Arc::new(ServiceRegistry::new());
//! let balancer = Arc::new(LoadBalancer::new(
//!     registry.clone(),
//!     config.load_balancer.strategy,
//! ));
//! let http_client = Arc::new(HttpClientAdapter::new()?);
//! let proxy = Arc::new(ProxyRouter::new(
//!     balancer.clone(),
//!     http_client,
//!     config.proxy.clone(),
//! ));
//! let state = AppState { registry, balancer, proxy, config };
//! let router = junction::adapters::build_router(state);
//! # let _ = router; Ok(()) }
//! ```
//!
//! # Error Handling
//! Client-facing failures are expressed through
//! [`core::error::GatewayError`], which renders a structured JSON body.
//! Application-level failures use `eyre::Result` with context attached
//! via `WrapErr`.
pub mod config;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

// Re-export the specific types needed by the binary crate
pub use crate::{
    adapters::{AppState, HealthMonitor, HttpClientAdapter, ProxyRouter},
    core::{LoadBalancer, ServiceRegistry},
    ports::http_client::HttpClient,
    utils::GracefulShutdown,
};
