//! HTTP/2 (prior knowledge) transport.
//!
//! # Responsibilities
//! - Dial a dependency and complete the HTTP/2 handshake
//! - Keep the channel alive with PING frames, idle or not
//! - Carry calls as `POST /{method}` with JSON bodies
//! - Enforce the message size limit in both directions
//!
//! # Design Decisions
//! - One multiplexed connection per dependency; `SendRequest` clones are
//!   cheap and share it
//! - Health is the connection's own view: closed once the driver task ends
//!   (peer gone, GOAWAY, missed keepalive)
//! - Response bodies are collected through a length limit so an oversized
//!   reply is cut off at the limit instead of buffered

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::http::{header, uri::Authority, Request, StatusCode};
use hyper::body::Incoming;
use hyper::client::conn::http2::{self, SendRequest};
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use serde_json::Value;
use std::time::Duration;
use tokio::net::TcpStream;

use crate::config::TransportConfig;
use crate::http::X_REQUEST_ID;
use crate::transport::connection::{Connection, Connector, RpcCall, RpcReply, TransportError};

/// Longest remote error message kept from a failed response.
const MAX_ERROR_MESSAGE: usize = 256;

/// HTTP/2 channel settings.
#[derive(Debug, Clone)]
pub struct H2Settings {
    pub keepalive_interval: Duration,
    pub keepalive_timeout: Duration,
    pub keepalive_while_idle: bool,
    pub max_message_bytes: usize,
}

impl From<&TransportConfig> for H2Settings {
    fn from(config: &TransportConfig) -> Self {
        Self {
            keepalive_interval: Duration::from_secs(config.keepalive_interval_secs),
            keepalive_timeout: Duration::from_secs(config.keepalive_timeout_secs),
            keepalive_while_idle: config.keepalive_while_idle,
            max_message_bytes: config.max_message_bytes,
        }
    }
}

impl Default for H2Settings {
    fn default() -> Self {
        Self::from(&TransportConfig::default())
    }
}

/// Dials plaintext HTTP/2 connections.
#[derive(Debug, Clone, Default)]
pub struct H2Connector {
    settings: H2Settings,
}

impl H2Connector {
    pub fn new(settings: H2Settings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Connector for H2Connector {
    type Connection = H2Connection;

    async fn connect(&self, address: &str) -> Result<H2Connection, TransportError> {
        let authority: Authority = address
            .parse()
            .map_err(|_| TransportError::InvalidAddress(address.to_string()))?;

        let stream = TcpStream::connect(authority.as_str()).await?;
        stream.set_nodelay(true)?;

        let (sender, connection) = http2::Builder::new(TokioExecutor::new())
            .timer(TokioTimer::new())
            .keep_alive_interval(self.settings.keepalive_interval)
            .keep_alive_timeout(self.settings.keepalive_timeout)
            .keep_alive_while_idle(self.settings.keepalive_while_idle)
            .handshake(TokioIo::new(stream))
            .await
            .map_err(TransportError::Handshake)?;

        let peer = authority.to_string();
        tokio::spawn(async move {
            match connection.await {
                Ok(()) => tracing::debug!(address = %peer, "HTTP/2 connection closed"),
                Err(e) => tracing::debug!(address = %peer, error = %e, "HTTP/2 connection failed"),
            }
        });

        tracing::debug!(address = %authority, "HTTP/2 connection established");
        Ok(H2Connection {
            sender,
            authority,
            max_message_bytes: self.settings.max_message_bytes,
        })
    }
}

/// Handle to one HTTP/2 connection.
#[derive(Clone)]
pub struct H2Connection {
    sender: SendRequest<Body>,
    authority: Authority,
    max_message_bytes: usize,
}

impl H2Connection {
    pub fn address(&self) -> &str {
        self.authority.as_str()
    }

    fn build_request(&self, call: &RpcCall) -> Result<Request<Body>, TransportError> {
        let body = serde_json::to_vec(&call.payload)?;
        if body.len() > self.max_message_bytes {
            return Err(TransportError::RequestTooLarge {
                size: body.len(),
                limit: self.max_message_bytes,
            });
        }

        let uri = format!(
            "http://{}/{}",
            self.authority,
            call.method.trim_start_matches('/')
        );
        let mut builder = Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::CONTENT_LENGTH, body.len());
        if let Some(id) = &call.request_id {
            builder = builder.header(X_REQUEST_ID, id);
        }

        builder
            .body(Body::from(body))
            .map_err(|e| TransportError::InvalidAddress(format!("{}: {e}", self.authority)))
    }
}

impl std::fmt::Debug for H2Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("H2Connection")
            .field("authority", &self.authority)
            .field("closed", &self.sender.is_closed())
            .finish()
    }
}

#[async_trait]
impl Connection for H2Connection {
    fn is_healthy(&self) -> bool {
        !self.sender.is_closed()
    }

    async fn call(&self, call: RpcCall) -> Result<RpcReply, TransportError> {
        let request = self.build_request(&call)?;

        let mut sender = self.sender.clone();
        sender.ready().await.map_err(TransportError::Http)?;
        let response = sender.send_request(request).await.map_err(TransportError::Http)?;

        let status = response.status();
        let declared = response
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        if declared.is_some_and(|len| len > self.max_message_bytes) {
            return Err(TransportError::ResponseTooLarge {
                limit: self.max_message_bytes,
            });
        }

        let bytes = read_limited(response.into_body(), self.max_message_bytes).await?;

        if !status.is_success() {
            return Err(TransportError::Remote {
                status: status.as_u16(),
                message: error_message(status, &bytes),
            });
        }

        let payload = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)?
        };
        Ok(RpcReply { payload })
    }
}

/// Collect a body, failing as soon as it grows past `limit`.
async fn read_limited(body: Incoming, limit: usize) -> Result<Bytes, TransportError> {
    axum::body::to_bytes(Body::new(body), limit)
        .await
        .map_err(|e| match e.into_inner().downcast::<hyper::Error>() {
            Ok(e) => TransportError::Http(*e),
            Err(_) => TransportError::ResponseTooLarge { limit },
        })
}

fn error_message(status: StatusCode, body: &[u8]) -> String {
    // Prefer the conventional `status_msg` / `message` fields of a JSON error body.
    let from_json = serde_json::from_slice::<Value>(body).ok().and_then(|v| {
        ["status_msg", "message", "error"]
            .iter()
            .find_map(|field| v.get(field).and_then(Value::as_str).map(str::to_string))
    });

    let message = match from_json {
        Some(message) => message,
        None if body.is_empty() => status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string(),
        None => String::from_utf8_lossy(body).into_owned(),
    };
    message.chars().take(MAX_ERROR_MESSAGE).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportConfig;

    #[test]
    fn test_settings_from_config() {
        let settings = H2Settings::from(&TransportConfig::default());
        assert_eq!(settings.keepalive_interval, Duration::from_secs(10));
        assert_eq!(settings.keepalive_timeout, Duration::from_secs(1));
        assert!(settings.keepalive_while_idle);
        assert_eq!(settings.max_message_bytes, 4 * 1024 * 1024);
    }

    #[test]
    fn test_error_message_extraction() {
        let json = br#"{"status_code":13,"status_msg":"user not found"}"#;
        assert_eq!(error_message(StatusCode::NOT_FOUND, json), "user not found");
        assert_eq!(
            error_message(StatusCode::INTERNAL_SERVER_ERROR, b""),
            "Internal Server Error"
        );
        assert_eq!(error_message(StatusCode::BAD_GATEWAY, b"upstream down"), "upstream down");

        let long = vec![b'x'; 1000];
        assert_eq!(error_message(StatusCode::BAD_GATEWAY, &long).len(), MAX_ERROR_MESSAGE);
    }

    #[tokio::test]
    async fn test_invalid_address_rejected() {
        let err = H2Connector::default().connect("not an address").await.unwrap_err();
        assert!(matches!(err, TransportError::InvalidAddress(_)));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop to get a port nobody listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = H2Connector::default().connect(&address).await.unwrap_err();
        assert!(matches!(err, TransportError::Connect(_)));
    }
}
