//! Response envelope and error mapping.
//!
//! # Responsibilities
//! - Wrap every reply in `{status_code, status_msg[, data]}`
//! - Map [`GatewayError`] to an HTTP status
//!
//! # Design Decisions
//! - `status_code` is 0 on success and mirrors the HTTP status on error
//! - The unavailable class (breaker, discovery, connect) is 503; a call
//!   that reached the dependency and failed is 500

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GatewayError;

/// JSON body returned by every gateway endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub status_code: u16,
    pub status_msg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ApiResponse {
    pub fn success(data: Value) -> Self {
        Self {
            status_code: 0,
            status_msg: "success".to_string(),
            data: Some(data),
        }
    }

    pub fn error(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status_code: status.as_u16(),
            status_msg: message.into(),
            data: None,
        }
    }
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::UnknownService(_) => StatusCode::NOT_FOUND,
            GatewayError::RpcTimeout { .. } | GatewayError::RpcFailure { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            GatewayError::DiscoveryUnavailable(_)
            | GatewayError::NoInstancesAvailable { .. }
            | GatewayError::NoValidAddress { .. }
            | GatewayError::CircuitOpen { .. }
            | GatewayError::ConnectTimeout { .. }
            | GatewayError::ConnectFailed { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(ApiResponse::error(status, self.to_string()))).into_response()
    }
}
