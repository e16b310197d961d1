//! Cross-cutting request middleware: request ids, bearer-token auth and
//! CORS.
//!
//! Ordering on the router is CORS first, then request-id assignment, then
//! auth, so even rejected requests carry an id and CORS headers.

use axum::{
    body::Body as AxumBody,
    extract::{Request, State},
    http::{HeaderName, HeaderValue, header},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::Instrument;
use uuid::Uuid;

use crate::{config::models::AuthConfig, core::error::GatewayError};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Per-request data threaded through extensions; the proxy router turns
/// it into upstream forwarding headers.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub request_id: String,
    pub user_id: Option<String>,
    pub country: Option<String>,
}

/// Claims accepted on inbound bearer tokens.
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthClaims {
    /// Subject, forwarded upstream as `X-User-ID`.
    pub sub: String,
    /// Optional ISO country code, forwarded as `X-Country-Code`.
    #[serde(default)]
    pub country: Option<String>,
    pub exp: usize,
}

/// Assign (or adopt) a request id and echo it on the response.
pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let ctx = req
        .extensions()
        .get::<RequestContext>()
        .cloned()
        .unwrap_or_default();
    req.extensions_mut().insert(RequestContext {
        request_id: request_id.clone(),
        ..ctx
    });

    let span = crate::tracing_setup::create_request_span(
        req.method().as_str(),
        req.uri().path(),
        &request_id,
    );

    async move {
        let mut response = next.run(req).await;
        tracing::Span::current().record("http.status_code", response.status().as_u16());
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response
                .headers_mut()
                .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
        }
        response
    }
    .instrument(span)
    .await
}

/// Validate the bearer token on proxied routes and stash its claims in
/// the request context. Admin endpoints are mounted before this layer
/// and stay open.
pub async fn auth_middleware(
    State(auth): State<AuthConfig>,
    mut req: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    if !auth.enabled {
        return Ok(next.run(req).await);
    }

    let token = bearer_token(&req)
        .ok_or_else(|| GatewayError::Unauthorized("missing bearer token".to_string()))?;
    let claims = validate_token(&token, &auth.secret)?;

    let mut ctx = req
        .extensions()
        .get::<RequestContext>()
        .cloned()
        .unwrap_or_default();
    ctx.user_id = Some(claims.sub);
    ctx.country = claims.country;
    req.extensions_mut().insert(ctx);

    Ok(next.run(req).await)
}

fn bearer_token(req: &Request<AxumBody>) -> Option<String> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

fn validate_token(token: &str, secret: &str) -> Result<AuthClaims, GatewayError> {
    let validation = Validation::new(Algorithm::HS256);
    decode::<AuthClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| {
        tracing::debug!(error = %e, "rejected bearer token");
        GatewayError::Unauthorized("invalid bearer token".to_string())
    })
}

/// Permissive CORS for browser clients of the gateway.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}
