//! Shared utilities for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;

use discovery_gateway::config::{DependencyConfig, GatewayConfig, StoreBackend};
use discovery_gateway::transport::{Connection, Connector, RpcCall, RpcReply, TransportError};

/// Control handle for a mock dependency served over HTTP/2.
#[derive(Debug, Default)]
pub struct Downstream {
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl Downstream {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

struct DownstreamState {
    control: Arc<Downstream>,
    name: String,
}

/// Start a dependency that speaks HTTP/2 prior knowledge on an ephemeral
/// port. Every method echoes the payload with the serving instance and the
/// propagated request id, or fails with 500 while `set_failing(true)`.
pub async fn start_downstream(name: &str) -> (SocketAddr, Arc<Downstream>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let control = Arc::new(Downstream::default());

    let state = Arc::new(DownstreamState {
        control: control.clone(),
        name: name.to_string(),
    });
    let app = Router::new()
        .route("/{method}", post(downstream_handler))
        .with_state(state);

    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    (addr, control)
}

async fn downstream_handler(
    State(state): State<Arc<DownstreamState>>,
    Path(method): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Response {
    state.control.calls.fetch_add(1, Ordering::SeqCst);

    if state.control.failing.load(Ordering::SeqCst) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"status_code": 13, "status_msg": format!("{method} failed")})),
        )
            .into_response();
    }

    let request_id = headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    Json(json!({
        "method": method,
        "served_by": state.name,
        "request_id": request_id,
        "echo": payload,
    }))
    .into_response()
}

/// Gateway config on an ephemeral port with a memory store.
pub fn gateway_config(dependencies: &[&str]) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.store.backend = StoreBackend::Memory;
    config.registration.service_name = "gateway".to_string();
    config.registration.advertise_address = "127.0.0.1:18080".to_string();
    config.watch.reconnect_delay_ms = 10;
    config.dependencies = dependencies
        .iter()
        .map(|name| DependencyConfig {
            name: name.to_string(),
            watch: true,
        })
        .collect();
    config
}

/// In-process connector whose calls succeed or fail on command.
#[derive(Debug, Clone, Default)]
pub struct ScriptedConnector {
    fail_calls: Arc<AtomicBool>,
    dials: Arc<AtomicUsize>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedConnector {
    pub fn set_failing(&self, failing: bool) {
        self.fail_calls.store(failing, Ordering::SeqCst);
    }

    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    type Connection = ScriptedConnection;

    async fn connect(&self, address: &str) -> Result<ScriptedConnection, TransportError> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        Ok(ScriptedConnection {
            address: address.to_string(),
            script: self.clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ScriptedConnection {
    address: String,
    script: ScriptedConnector,
}

#[async_trait]
impl Connection for ScriptedConnection {
    fn is_healthy(&self) -> bool {
        true
    }

    async fn call(&self, call: RpcCall) -> Result<RpcReply, TransportError> {
        self.script.calls.fetch_add(1, Ordering::SeqCst);
        if self.script.fail_calls.load(Ordering::SeqCst) {
            return Err(TransportError::Remote {
                status: 500,
                message: format!("{} failed on {}", call.method, self.address),
            });
        }
        Ok(RpcReply {
            payload: json!({"address": self.address, "echo": call.payload}),
        })
    }
}
