//! Connection abstraction for calls to a dependency.
//!
//! A [`Connector`] dials an address and yields a [`Connection`]: a cheap,
//! cloneable handle to one live channel. The cache owns the handle; callers
//! clone it for the duration of a single call.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// One outbound call.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcCall {
    pub method: String,
    pub payload: Value,
    pub request_id: Option<String>,
}

impl RpcCall {
    pub fn new(method: impl Into<String>, payload: Value) -> Self {
        Self {
            method: method.into(),
            payload,
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

/// Successful reply from a dependency.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcReply {
    pub payload: Value,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid address '{0}'")]
    InvalidAddress(String),

    #[error("connect failed: {0}")]
    Connect(#[from] std::io::Error),

    #[error("handshake failed: {0}")]
    Handshake(#[source] hyper::Error),

    #[error("http error: {0}")]
    Http(#[source] hyper::Error),

    #[error("connection closed: {0}")]
    Closed(String),

    /// The dependency answered with a non-success status.
    #[error("remote error {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("request of {size} bytes exceeds the {limit} byte message limit")]
    RequestTooLarge { size: usize, limit: usize },

    #[error("response exceeds the {limit} byte message limit")]
    ResponseTooLarge { limit: usize },

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl TransportError {
    /// Whether the failure says something about the dependency's health.
    /// An oversized request is the caller's fault and must not trip a
    /// breaker.
    pub fn is_dependency_failure(&self) -> bool {
        !matches!(self, TransportError::RequestTooLarge { .. })
    }
}

/// Live channel to one dependency instance.
#[async_trait]
pub trait Connection: Clone + Send + Sync + 'static {
    /// False once the underlying channel is known to be unusable.
    fn is_healthy(&self) -> bool;

    async fn call(&self, call: RpcCall) -> Result<RpcReply, TransportError>;
}

/// Dials addresses.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Connection: Connection;

    async fn connect(&self, address: &str) -> Result<Self::Connection, TransportError>;
}
