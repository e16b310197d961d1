use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use eyre::Result;
use http_body_util::BodyExt;
use hyper::{Request, Response, Version, header, header::HeaderValue};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use rustls_native_certs::load_native_certs;
use tokio::time::timeout;

use crate::ports::http_client::{HttpClient, HttpClientError, HttpClientResult};

/// Hyper-based HTTP client (HTTP/1.1 with ALPN-negotiated h2 over TLS).
///
/// Carries both kinds of outbound traffic the gateway produces: proxied
/// requests and health probes. Retries and circuit breaking are the
/// caller's concern, not this adapter's.
pub struct HttpClientAdapter {
    client: Client<HttpsConnector<HttpConnector>, AxumBody>,
}

impl HttpClientAdapter {
    pub fn new() -> Result<Self> {
        // Install default crypto provider for rustls if not already set
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false); // Allow HTTPS URLs

        let mut root_cert_store = rustls::RootCertStore::empty();
        let native_certs = load_native_certs();
        for cert in native_certs.certs {
            if root_cert_store.add(cert).is_err() {
                tracing::warn!("failed to add native certificate to rustls RootCertStore");
            }
        }
        if !native_certs.errors.is_empty() {
            tracing::warn!(
                "some native certificates failed to load: {:?}",
                native_certs.errors
            );
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new()).build::<_, AxumBody>(https_connector);
        Ok(Self { client })
    }

    /// Ensure the Host header matches the rewritten upstream authority.
    fn set_host_header(req: &mut Request<AxumBody>) -> HttpClientResult<()> {
        let authority = req
            .uri()
            .authority()
            .ok_or_else(|| {
                HttpClientError::InvalidRequest(format!("upstream URI has no host: {}", req.uri()))
            })?
            .to_string();
        let value = HeaderValue::from_str(&authority)
            .map_err(|e| HttpClientError::InvalidRequest(format!("invalid host header: {e}")))?;
        req.headers_mut().insert(header::HOST, value);
        Ok(())
    }
}

impl Default for HttpClientAdapter {
    fn default() -> Self {
        Self::new().expect("Failed to create HTTP client")
    }
}

#[async_trait]
impl HttpClient for HttpClientAdapter {
    async fn send_request(
        &self,
        mut req: Request<AxumBody>,
    ) -> HttpClientResult<Response<AxumBody>> {
        Self::set_host_header(&mut req)?;

        let upstream = format!(
            "{}://{}",
            req.uri().scheme_str().unwrap_or("http"),
            req.uri()
                .authority()
                .map_or_else(|| "unknown".to_string(), |a| a.to_string())
        );
        let method = req.method().to_string();
        let path = req.uri().path().to_string();

        let span = tracing::info_span!(
            "upstream_request",
            upstream.url = %upstream,
            http.method = %method,
            http.path = %path,
            http.status_code = tracing::field::Empty,
        );
        let _enter = span.enter();

        let (mut parts, body) = req.into_parts();
        // ALPN negotiates the actual version; hyper requires a concrete
        // request version to serialize.
        parts.version = Version::HTTP_11;
        let outgoing = Request::from_parts(parts, body);

        match self.client.clone().request(outgoing).await {
            Ok(response) => {
                tracing::Span::current().record("http.status_code", response.status().as_u16());

                let (mut parts, hyper_body) = response.into_parts();
                // The body is re-framed on the way back out.
                parts.headers.remove(header::TRANSFER_ENCODING);
                Ok(Response::from_parts(parts, AxumBody::new(hyper_body)))
            }
            Err(e) => {
                tracing::debug!(upstream = %upstream, error = %e, "upstream request failed");
                Err(HttpClientError::ConnectionError(format!(
                    "request to {method} {upstream}{path} failed: {e}"
                )))
            }
        }
    }

    async fn health_check(&self, url: &str, probe_timeout: Duration) -> HttpClientResult<bool> {
        let request = Request::builder()
            .method("GET")
            .uri(url)
            .version(Version::HTTP_11)
            .body(AxumBody::empty())
            .map_err(|e| HttpClientError::InvalidRequest(e.to_string()))?;

        match timeout(probe_timeout, self.client.clone().request(request)).await {
            Ok(Ok(response)) => {
                let is_healthy = response.status().is_success();
                // Drain the body so the connection can be reused.
                let _ = response.into_body().collect().await;
                Ok(is_healthy)
            }
            Ok(Err(err)) => {
                tracing::debug!(url = %url, error = %err, "health probe connection error");
                Ok(false)
            }
            Err(_) => Err(HttpClientError::Timeout(probe_timeout)),
        }
    }
}
