pub mod health;
pub mod http_client;
pub mod middleware;
pub mod proxy;
pub mod server;
pub mod websocket;

/// Re-export commonly used types from adapters
pub use health::HealthMonitor;
pub use http_client::HttpClientAdapter;
pub use proxy::ProxyRouter;
pub use server::{AppState, build_router, serve};
