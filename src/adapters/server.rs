//! HTTP surface of the gateway: admin API, proxied routes and the
//! WebSocket entry point, assembled into one axum router.
//!
//! Admin endpoints (`/health`, `/ready`, `/registry/...`) are mounted
//! outside the auth layer; only `/api/v1/...` and `/ws/...` require a
//! bearer token when auth is enabled.

use std::{net::SocketAddr, sync::Arc};

use axum::{
    Json, Router,
    extract::{OriginalUri, Path, Request, State, ws::WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{any, delete, get},
};
use eyre::{Result, WrapErr};
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

use crate::{
    adapters::{
        middleware::{auth_middleware, cors_layer, request_id_middleware},
        proxy::ProxyRouter,
        websocket,
    },
    config::models::{AuthConfig, GatewayConfig},
    core::{
        error::GatewayError,
        instance::{RegisterRequest, ServiceInstance},
        load_balancer::LoadBalancer,
        registry::ServiceRegistry,
    },
};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ServiceRegistry>,
    pub balancer: Arc<LoadBalancer>,
    pub proxy: Arc<ProxyRouter>,
    pub config: Arc<GatewayConfig>,
}

/// Assemble the full router. Extracted from `serve` so integration tests
/// can drive it with `tower::ServiceExt::oneshot`.
pub fn build_router(state: AppState) -> Router {
    let auth = state
        .config
        .auth
        .clone()
        .unwrap_or_else(|| AuthConfig {
            enabled: false,
            secret: String::new(),
        });

    let proxied = Router::new()
        .route("/api/v1/{service}", any(proxy_service_root))
        .route("/api/v1/{service}/{*rest}", any(proxy_service_path))
        .route("/ws/{service}", get(ws_service_root))
        .route("/ws/{service}/{*rest}", get(ws_service_path))
        .route_layer(axum::middleware::from_fn_with_state(auth, auth_middleware));

    let admin = Router::new()
        .route("/health", get(gateway_health))
        .route("/ready", get(gateway_ready))
        .route(
            "/registry/services",
            get(list_services).post(register_service),
        )
        .route("/registry/services/{id}", delete(deregister_service));

    Router::new()
        .merge(admin)
        .merge(proxied)
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(cors_layer())
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Turn a caught handler panic into the structured JSON error envelope.
/// The panic payload goes to the log, not to the client.
fn handle_panic(err: Box<dyn std::any::Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s
    } else {
        "unknown panic payload"
    };
    tracing::error!(panic = %detail, "request handler panicked");
    GatewayError::Internal("request handler panicked".to_string()).into_response()
}

/// Bind and serve until `shutdown` resolves.
pub async fn serve(state: AppState, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
    let addr: SocketAddr = state
        .config
        .listen_addr
        .parse()
        .wrap_err_with(|| format!("invalid listen address '{}'", state.config.listen_addr))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "gateway listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .wrap_err("server error")?;
    Ok(())
}

/// Liveness of the gateway process itself; always 200 while serving,
/// independent of upstream health.
async fn gateway_health(State(state): State<AppState>) -> impl IntoResponse {
    let (healthy, total) = state.registry.counts();
    Json(serde_json::json!({
        "status": "healthy",
        "service": "junction",
        "instances": { "healthy": healthy, "total": total },
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// Ready when at least half of the registered instances are healthy.
/// An empty registry is ready: the gateway itself is serving, there is
/// just nothing to route to yet.
async fn gateway_ready(State(state): State<AppState>) -> Response {
    let (healthy, total) = state.registry.counts();
    let ready = total == 0 || healthy * 2 >= total;
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = Json(serde_json::json!({
        "ready": ready,
        "instances": { "healthy": healthy, "total": total },
    }));
    (status, body).into_response()
}

async fn list_services(State(state): State<AppState>) -> Json<serde_json::Value> {
    let mut services = state.registry.all();
    services.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
    let count = services.len();
    Json(serde_json::json!({ "services": services, "count": count }))
}

async fn register_service(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<ServiceInstance>), GatewayError> {
    if request.name.trim().is_empty() {
        return Err(GatewayError::Validation("name must not be empty".to_string()));
    }
    if request.host.trim().is_empty() {
        return Err(GatewayError::Validation("host must not be empty".to_string()));
    }
    if request.port == 0 {
        return Err(GatewayError::Validation("port must be non-zero".to_string()));
    }

    let instance = state.registry.register(request.into_instance());
    crate::metrics::set_registered_instances(state.registry.len());
    Ok((StatusCode::CREATED, Json(instance)))
}

async fn deregister_service(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, GatewayError> {
    if !state.registry.deregister(&id) {
        return Err(GatewayError::NotFound(format!("no instance with id '{id}'")));
    }
    crate::metrics::set_registered_instances(state.registry.len());
    Ok(Json(serde_json::json!({ "id": id, "deregistered": true })))
}

async fn proxy_service_root(
    State(state): State<AppState>,
    Path(service): Path<String>,
    req: Request,
) -> Result<Response, GatewayError> {
    state.proxy.forward(&service, req).await
}

async fn proxy_service_path(
    State(state): State<AppState>,
    Path((service, _rest)): Path<(String, String)>,
    req: Request,
) -> Result<Response, GatewayError> {
    state.proxy.forward(&service, req).await
}

async fn ws_service_root(
    State(state): State<AppState>,
    Path(service): Path<String>,
    OriginalUri(uri): OriginalUri,
    upgrade: WebSocketUpgrade,
) -> Result<Response, GatewayError> {
    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    websocket::proxy_upgrade(&state.balancer, &service, path, upgrade)
}

async fn ws_service_path(
    State(state): State<AppState>,
    Path((service, _rest)): Path<(String, String)>,
    OriginalUri(uri): OriginalUri,
    upgrade: WebSocketUpgrade,
) -> Result<Response, GatewayError> {
    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    websocket::proxy_upgrade(&state.balancer, &service, path, upgrade)
}
