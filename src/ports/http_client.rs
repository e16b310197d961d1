use async_trait::async_trait;
use axum::body::Body as AxumBody;
use hyper::{Request, Response};
use thiserror::Error;

/// Errors surfaced by the upstream HTTP seam.
///
/// The proxy router maps all of these to 502; the health monitor treats
/// them as a failed probe and never surfaces them to clients.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpClientError {
    /// Connection to the upstream instance failed (refused, reset, DNS).
    #[error("connection error: {0}")]
    ConnectionError(String),

    /// The bounded request timeout elapsed.
    #[error("timeout after {0:?}")]
    Timeout(std::time::Duration),

    /// The request could not be constructed or sent as-is.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

pub type HttpClientResult<T> = Result<T, HttpClientError>;

/// Port for all outbound HTTP traffic: proxied requests and health probes.
///
/// Tests substitute a stub here to assert upstream call counts without
/// any network I/O.
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    /// Forward a fully built request to an upstream instance.
    async fn send_request(&self, req: Request<AxumBody>) -> HttpClientResult<Response<AxumBody>>;

    /// Probe `url` with a GET bounded by `timeout`. `Ok(true)` means a 2xx
    /// arrived in time; connection-level failures are `Ok(false)` so the
    /// caller can count them against the unhealthy threshold, while a
    /// timeout is reported distinctly.
    async fn health_check(
        &self,
        url: &str,
        timeout: std::time::Duration,
    ) -> HttpClientResult<bool>;
}
