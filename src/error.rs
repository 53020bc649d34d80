//! Caller-facing error taxonomy.
//!
//! Everything that can go wrong between an inbound request and the
//! downstream reply ends up as a [`GatewayError`]. The HTTP mapping lives in
//! `http::response`.

use std::time::Duration;
use thiserror::Error;

use crate::discovery::StoreError;
use crate::transport::TransportError;

/// Errors surfaced by discovery, connection management and dispatch.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Coordination store could not be reached or answered with an error.
    #[error("discovery unavailable: {0}")]
    DiscoveryUnavailable(#[from] StoreError),

    /// Prefix scan returned no keys.
    #[error("no instances of '{service}' are registered")]
    NoInstancesAvailable { service: String },

    /// Every registered instance had an empty address.
    #[error("no registered instance of '{service}' has a valid address")]
    NoValidAddress { service: String },

    /// Circuit breaker rejected the call without contacting the dependency.
    #[error("circuit open for '{service}'")]
    CircuitOpen { service: String },

    /// Dial did not finish within the connect deadline.
    #[error("connecting to {address} timed out after {timeout:?}")]
    ConnectTimeout { address: String, timeout: Duration },

    /// Dial failed outright.
    #[error("connecting to {address} failed: {source}")]
    ConnectFailed {
        address: String,
        source: TransportError,
    },

    /// Downstream call exceeded its deadline.
    #[error("call '{method}' timed out after {timeout:?}")]
    RpcTimeout { method: String, timeout: Duration },

    /// Downstream call failed (transport or remote-reported).
    #[error("call '{method}' failed: {source}")]
    RpcFailure {
        method: String,
        source: TransportError,
    },

    /// No dependency with this name is configured.
    #[error("unknown service '{0}'")]
    UnknownService(String),

    /// Malformed input from the caller.
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl GatewayError {
    /// True for the "service unavailable" class: every failure to reach or
    /// complete a call against the dependency.
    pub fn is_unavailable(&self) -> bool {
        !matches!(
            self,
            GatewayError::UnknownService(_) | GatewayError::BadRequest(_)
        )
    }

    /// True when the downstream call itself failed (as opposed to never
    /// being attempted).
    pub fn is_call_failure(&self) -> bool {
        matches!(
            self,
            GatewayError::RpcTimeout { .. } | GatewayError::RpcFailure { .. }
        )
    }
}
