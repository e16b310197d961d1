//! Client-visible error taxonomy for the gateway.
//!
//! Every error response carries a structured JSON body with a
//! machine-readable `error` slug, a human-readable `message` and an
//! uppercase `code`; the HTTP status is the primary signal for caller
//! retry/backoff decisions. 503 means no healthy candidate existed and no
//! connection was attempted; 502 means a candidate was resolved but the
//! upstream transport failed.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GatewayError {
    /// No healthy instance was registered for the requested service.
    #[error("no healthy instance available for service '{service}'")]
    ServiceUnavailable { service: String },

    /// An instance was resolved but the upstream transport failed
    /// (connection refused, DNS failure, timeout).
    #[error("upstream request to service '{service}' failed: {reason}")]
    BadGateway { service: String, reason: String },

    #[error("{0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Wire shape of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    pub code: String,
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::BadGateway { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn slug(&self) -> &'static str {
        match self {
            GatewayError::ServiceUnavailable { .. } => "service_unavailable",
            GatewayError::BadGateway { .. } => "bad_gateway",
            GatewayError::NotFound(_) => "not_found",
            GatewayError::Validation(_) => "validation_error",
            GatewayError::Unauthorized(_) => "unauthorized",
            GatewayError::Internal(_) => "internal_error",
        }
    }

    fn code(&self) -> &'static str {
        match self {
            GatewayError::ServiceUnavailable { .. } => "SERVICE_UNAVAILABLE",
            GatewayError::BadGateway { .. } => "BAD_GATEWAY",
            GatewayError::NotFound(_) => "NOT_FOUND",
            GatewayError::Validation(_) => "VALIDATION_ERROR",
            GatewayError::Unauthorized(_) => "UNAUTHORIZED",
            GatewayError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            error: self.slug().to_string(),
            message: self.to_string(),
            code: self.code().to_string(),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        match &self {
            GatewayError::ServiceUnavailable { service } => {
                tracing::warn!(service = %service, "no healthy instance, rejecting request");
            }
            GatewayError::BadGateway { service, reason } => {
                tracing::error!(service = %service, reason = %reason, "upstream transport failure");
            }
            _ => {}
        }
        (self.status(), Json(self.body())).into_response()
    }
}
