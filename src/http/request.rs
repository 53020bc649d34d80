//! Request identification and payload extraction.
//!
//! # Responsibilities
//! - Name the request-id header shared by the inbound and outbound sides
//! - Read the request id set by the middleware stack
//! - Decode the JSON body into a call payload
//!
//! # Design Decisions
//! - Request ID is generated by tower-http before anything else runs
//! - An empty body is treated as JSON `null`, not an error

use axum::body::Bytes;
use axum::http::{HeaderMap, HeaderName};
use serde_json::Value;

use crate::error::GatewayError;

/// Header carrying the correlation id, inbound and outbound.
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// The request id assigned (or propagated) by the middleware stack.
pub fn request_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(&X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Parse a call payload from the raw request body.
pub fn parse_payload(body: &Bytes) -> Result<Value, GatewayError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body).map_err(|e| GatewayError::BadRequest(format!("invalid JSON body: {e}")))
}
