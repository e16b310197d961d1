//! Reverse-proxy forwarding of client requests to backend instances.
//!
//! Resolution happens per request: service name to healthy instance via
//! the load balancer, then a rewritten request goes out through the
//! [`HttpClient`] port under a bounded timeout. Failure to resolve is a
//! 503 with zero upstream connections; transport failure after
//! resolution is a 502. Health state is never mutated here.

use std::{sync::Arc, time::Duration};

use axum::body::Body as AxumBody;
use http::uri::PathAndQuery;
use http_body_util::BodyExt;
use hyper::{
    Method, Request, Response, Uri,
    header::{HeaderName, HeaderValue},
};

use crate::{
    adapters::middleware::RequestContext,
    config::models::ProxyConfig,
    core::{error::GatewayError, instance::ServiceInstance, load_balancer::LoadBalancer},
    metrics::ProxiedRequestTimer,
    ports::http_client::HttpClient,
};

pub const X_FORWARDED_HOST: &str = "x-forwarded-host";
pub const X_FORWARDED_PROTO: &str = "x-forwarded-proto";
pub const X_GATEWAY_SERVICE: &str = "x-gateway-service";
pub const X_REQUEST_ID: &str = "x-request-id";
pub const X_USER_ID: &str = "x-user-id";
pub const X_COUNTRY_CODE: &str = "x-country-code";

/// Connection-scoped headers that must not be forwarded.
const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Forwards requests for `/api/v1/{service}/...` to a selected instance.
pub struct ProxyRouter {
    balancer: Arc<LoadBalancer>,
    http_client: Arc<dyn HttpClient>,
    config: ProxyConfig,
}

impl ProxyRouter {
    pub fn new(
        balancer: Arc<LoadBalancer>,
        http_client: Arc<dyn HttpClient>,
        config: ProxyConfig,
    ) -> Self {
        Self {
            balancer,
            http_client,
            config,
        }
    }

    /// Proxy one client request to `service`.
    ///
    /// Retries (idempotent methods only) re-select an instance on every
    /// attempt, so a failing backend does not absorb the whole budget.
    pub async fn forward(
        &self,
        service: &str,
        req: Request<AxumBody>,
    ) -> Result<Response<AxumBody>, GatewayError> {
        let (parts, body) = req.into_parts();
        let method = parts.method.clone();
        let original_path = parts
            .uri
            .path_and_query()
            .map(PathAndQuery::as_str)
            .unwrap_or("/")
            .to_string();

        let mut timer = ProxiedRequestTimer::new(method.as_str(), parts.uri.path(), service);

        let attempts = if is_idempotent(&method) {
            self.config.max_retries as usize + 1
        } else {
            1
        };

        // Retrying needs a replayable body. Idempotent requests rarely
        // carry one, but collect up front rather than guessing.
        let (buffered, mut body) = if attempts > 1 {
            let bytes = body
                .collect()
                .await
                .map_err(|e| GatewayError::Validation(format!("failed to read body: {e}")))?
                .to_bytes();
            (Some(bytes), None)
        } else {
            (None, Some(body))
        };

        let mut last_failure: Option<GatewayError> = None;
        for attempt in 0..attempts {
            let Some(instance) = self.balancer.select(service) else {
                // Nothing to connect to. On the first attempt this is the
                // canonical 503; mid-retry we keep the transport error.
                let err = last_failure.take().unwrap_or(GatewayError::ServiceUnavailable {
                    service: service.to_string(),
                });
                timer.set_status(err.status().as_u16());
                return Err(err);
            };

            let attempt_body = match &buffered {
                Some(bytes) => AxumBody::from(bytes.clone()),
                None => body.take().unwrap_or_else(AxumBody::empty),
            };
            let upstream_req =
                self.build_upstream_request(&parts, &instance, service, &original_path, attempt_body)?;

            if attempt > 0 {
                tracing::debug!(
                    service = %service,
                    instance.id = %instance.id,
                    attempt,
                    "retrying proxied request"
                );
            }

            match self.send_with_timeout(upstream_req).await {
                Ok(response) => {
                    timer.set_status(response.status().as_u16());
                    tracing::debug!(
                        service = %service,
                        instance.id = %instance.id,
                        status = response.status().as_u16(),
                        "proxied request completed"
                    );
                    return Ok(response);
                }
                Err(reason) => {
                    tracing::warn!(
                        service = %service,
                        instance.id = %instance.id,
                        attempt,
                        reason = %reason,
                        "upstream attempt failed"
                    );
                    last_failure = Some(GatewayError::BadGateway {
                        service: service.to_string(),
                        reason,
                    });
                }
            }
        }

        let err = last_failure.unwrap_or(GatewayError::ServiceUnavailable {
            service: service.to_string(),
        });
        timer.set_status(err.status().as_u16());
        Err(err)
    }

    async fn send_with_timeout(&self, req: Request<AxumBody>) -> Result<Response<AxumBody>, String> {
        let timeout = Duration::from_secs(self.config.timeout_secs);
        match tokio::time::timeout(timeout, self.http_client.send_request(req)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(err)) => Err(err.to_string()),
            Err(_) => Err(format!("timeout after {timeout:?}")),
        }
    }

    /// Rebuild the client request for the chosen instance: swap the
    /// authority, strip the service segment from the path is NOT done
    /// (the full original path and query are preserved verbatim), drop
    /// hop-by-hop headers, and stamp the gateway forwarding headers.
    fn build_upstream_request(
        &self,
        parts: &http::request::Parts,
        instance: &ServiceInstance,
        service: &str,
        original_path: &str,
        body: AxumBody,
    ) -> Result<Request<AxumBody>, GatewayError> {
        let target = format!("http://{}{}", instance.address(), original_path);
        let uri: Uri = target
            .parse()
            .map_err(|e| GatewayError::Internal(format!("invalid upstream uri '{target}': {e}")))?;

        let mut builder = Request::builder()
            .method(parts.method.clone())
            .uri(uri)
            .version(hyper::Version::HTTP_11);

        let original_host = parts
            .headers
            .get(hyper::header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if let Some(headers) = builder.headers_mut() {
            for (name, value) in &parts.headers {
                if name == hyper::header::HOST || HOP_BY_HOP_HEADERS.contains(&name.as_str()) {
                    continue;
                }
                headers.insert(name.clone(), value.clone());
            }

            if let Some(host) = original_host
                && let Ok(value) = HeaderValue::from_str(&host)
            {
                headers.insert(HeaderName::from_static(X_FORWARDED_HOST), value);
            }
            headers.insert(
                HeaderName::from_static(X_FORWARDED_PROTO),
                HeaderValue::from_static("http"),
            );
            if let Ok(value) = HeaderValue::from_str(service) {
                headers.insert(HeaderName::from_static(X_GATEWAY_SERVICE), value);
            }

            if let Some(ctx) = parts.extensions.get::<RequestContext>() {
                if let Ok(value) = HeaderValue::from_str(&ctx.request_id) {
                    headers.insert(HeaderName::from_static(X_REQUEST_ID), value);
                }
                if let Some(user_id) = &ctx.user_id
                    && let Ok(value) = HeaderValue::from_str(user_id)
                {
                    headers.insert(HeaderName::from_static(X_USER_ID), value);
                }
                if let Some(country) = &ctx.country
                    && let Ok(value) = HeaderValue::from_str(country)
                {
                    headers.insert(HeaderName::from_static(X_COUNTRY_CODE), value);
                }
            }
        }

        builder
            .body(body)
            .map_err(|e| GatewayError::Internal(format!("failed to build upstream request: {e}")))
    }
}

fn is_idempotent(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use hyper::StatusCode;
    use parking_lot::Mutex;

    use super::*;
    use crate::{
        core::{
            instance::{HealthStatus, RegisterRequest},
            load_balancer::SelectionStrategy,
            registry::ServiceRegistry,
        },
        ports::http_client::{HttpClientError, HttpClientResult},
    };

    struct RecordingClient {
        calls: AtomicUsize,
        requests: Mutex<Vec<Request<AxumBody>>>,
        fail: bool,
    }

    impl RecordingClient {
        fn new(fail: bool) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
                fail,
            }
        }
    }

    #[async_trait]
    impl HttpClient for RecordingClient {
        async fn send_request(
            &self,
            req: Request<AxumBody>,
        ) -> HttpClientResult<Response<AxumBody>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().push(req);
            if self.fail {
                Err(HttpClientError::ConnectionError(
                    "connection refused".to_string(),
                ))
            } else {
                Ok(Response::builder()
                    .status(StatusCode::OK)
                    .body(AxumBody::from("upstream response"))
                    .unwrap())
            }
        }

        async fn health_check(&self, _url: &str, _timeout: Duration) -> HttpClientResult<bool> {
            Ok(true)
        }
    }

    fn registry_with_healthy(service: &str) -> Arc<ServiceRegistry> {
        let registry = Arc::new(ServiceRegistry::new());
        let stored = registry.register(
            RegisterRequest {
                name: service.to_string(),
                host: "10.0.0.1".to_string(),
                port: 8081,
                version: None,
                tags: Vec::new(),
            }
            .into_instance(),
        );
        registry.update_health(&stored.id, HealthStatus::Healthy);
        registry
    }

    fn router(registry: Arc<ServiceRegistry>, client: Arc<RecordingClient>, retries: u32) -> ProxyRouter {
        let balancer = Arc::new(LoadBalancer::new(registry, SelectionStrategy::RoundRobin));
        ProxyRouter::new(
            balancer,
            client,
            ProxyConfig {
                timeout_secs: 5,
                max_retries: retries,
            },
        )
    }

    fn client_request(method: Method, uri: &str) -> Request<AxumBody> {
        let mut req = Request::builder()
            .method(method)
            .uri(uri)
            .header(hyper::header::HOST, "gateway.example.com")
            .body(AxumBody::empty())
            .unwrap();
        req.extensions_mut().insert(RequestContext {
            request_id: "req-42".to_string(),
            user_id: Some("user-7".to_string()),
            country: Some("DE".to_string()),
        });
        req
    }

    #[tokio::test]
    async fn test_no_healthy_instance_is_503_with_zero_calls() {
        let registry = Arc::new(ServiceRegistry::new());
        let client = Arc::new(RecordingClient::new(false));
        let proxy = router(registry, client.clone(), 0);

        let err = proxy
            .forward(
                "auth-service",
                client_request(Method::GET, "/api/v1/auth-service/profile"),
            )
            .await
            .unwrap_err();

        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_transport_failure_is_502() {
        let registry = registry_with_healthy("auth-service");
        let client = Arc::new(RecordingClient::new(true));
        let proxy = router(registry.clone(), client.clone(), 0);

        let err = proxy
            .forward(
                "auth-service",
                client_request(Method::GET, "/api/v1/auth-service/profile"),
            )
            .await
            .unwrap_err();

        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        // A transport failure must not flip health; only the monitor does.
        assert!(registry.all().iter().all(|i| i.is_healthy()));
    }

    #[tokio::test]
    async fn test_uri_rewrite_preserves_path_and_query() {
        let registry = registry_with_healthy("content-service");
        let client = Arc::new(RecordingClient::new(false));
        let proxy = router(registry, client.clone(), 0);

        let response = proxy
            .forward(
                "content-service",
                client_request(Method::GET, "/api/v1/content-service/posts?page=2&sort=desc"),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let requests = client.requests.lock();
        let upstream = &requests[0];
        assert_eq!(
            upstream.uri().to_string(),
            "http://10.0.0.1:8081/api/v1/content-service/posts?page=2&sort=desc"
        );
    }

    #[tokio::test]
    async fn test_forwarding_headers_are_stamped() {
        let registry = registry_with_healthy("auth-service");
        let client = Arc::new(RecordingClient::new(false));
        let proxy = router(registry, client.clone(), 0);

        proxy
            .forward(
                "auth-service",
                client_request(Method::GET, "/api/v1/auth-service/profile"),
            )
            .await
            .unwrap();

        let requests = client.requests.lock();
        let headers = requests[0].headers();
        assert_eq!(headers.get(X_FORWARDED_HOST).unwrap(), "gateway.example.com");
        assert_eq!(headers.get(X_FORWARDED_PROTO).unwrap(), "http");
        assert_eq!(headers.get(X_GATEWAY_SERVICE).unwrap(), "auth-service");
        assert_eq!(headers.get(X_REQUEST_ID).unwrap(), "req-42");
        assert_eq!(headers.get(X_USER_ID).unwrap(), "user-7");
        assert_eq!(headers.get(X_COUNTRY_CODE).unwrap(), "DE");
        assert!(headers.get(hyper::header::HOST).is_none());
    }

    #[tokio::test]
    async fn test_idempotent_retries_reselect() {
        let registry = registry_with_healthy("auth-service");
        // Second instance so re-selection has somewhere to go.
        let stored = registry.register(
            RegisterRequest {
                name: "auth-service".to_string(),
                host: "10.0.0.2".to_string(),
                port: 8081,
                version: None,
                tags: Vec::new(),
            }
            .into_instance(),
        );
        registry.update_health(&stored.id, HealthStatus::Healthy);

        let client = Arc::new(RecordingClient::new(true));
        let proxy = router(registry, client.clone(), 2);

        let err = proxy
            .forward(
                "auth-service",
                client_request(Method::GET, "/api/v1/auth-service/profile"),
            )
            .await
            .unwrap_err();

        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);

        let requests = client.requests.lock();
        let hosts: Vec<String> = requests
            .iter()
            .map(|r| r.uri().authority().unwrap().to_string())
            .collect();
        assert!(hosts.contains(&"10.0.0.1:8081".to_string()));
        assert!(hosts.contains(&"10.0.0.2:8081".to_string()));
    }

    #[tokio::test]
    async fn test_non_idempotent_methods_never_retry() {
        let registry = registry_with_healthy("auth-service");
        let client = Arc::new(RecordingClient::new(true));
        let proxy = router(registry, client.clone(), 3);

        let err = proxy
            .forward(
                "auth-service",
                client_request(Method::POST, "/api/v1/auth-service/login"),
            )
            .await
            .unwrap_err();

        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_hop_by_hop_headers_dropped() {
        let registry = registry_with_healthy("auth-service");
        let client = Arc::new(RecordingClient::new(false));
        let proxy = router(registry, client.clone(), 0);

        let mut req = client_request(Method::GET, "/api/v1/auth-service/profile");
        req.headers_mut().insert(
            HeaderName::from_static("connection"),
            HeaderValue::from_static("keep-alive"),
        );
        req.headers_mut().insert(
            HeaderName::from_static("te"),
            HeaderValue::from_static("trailers"),
        );
        proxy.forward("auth-service", req).await.unwrap();

        let requests = client.requests.lock();
        let headers = requests[0].headers();
        assert!(headers.get("connection").is_none());
        assert!(headers.get("te").is_none());
    }
}
