//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with all handlers
//! - Wire up middleware (request ID, tracing, timeout, body limit)
//! - Bind server to listener and stop on the shutdown broadcast
//! - Dispatch calls to the dependency table
//! - Expose liveness and per-dependency status

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::GatewayConfig;
use crate::discovery::Registrar;
use crate::http::request::{parse_payload, request_id, X_REQUEST_ID};
use crate::http::response::ApiResponse;
use crate::observability::metrics;
use crate::routing::DependencyTable;
use crate::transport::{Connector, RpcCall};

/// Application state injected into handlers.
pub struct AppState<C: Connector> {
    pub dependencies: Arc<DependencyTable<C>>,
    pub registrar: Option<Arc<Registrar>>,
    pub started: Instant,
}

impl<C: Connector> Clone for AppState<C> {
    fn clone(&self) -> Self {
        Self {
            dependencies: self.dependencies.clone(),
            registrar: self.registrar.clone(),
            started: self.started,
        }
    }
}

/// HTTP front end of the gateway.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new<C: Connector>(config: &GatewayConfig, state: AppState<C>) -> Self {
        Self {
            router: Self::build_router(config, state),
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router<C: Connector>(config: &GatewayConfig, state: AppState<C>) -> Router {
        let middleware = ServiceBuilder::new()
            .layer(SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
            .layer(RequestBodyLimitLayer::new(config.listener.max_body_bytes))
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)));

        Router::new()
            .route("/api/{service}/{method}", post(dispatch_handler::<C>))
            .route("/health", get(health_handler::<C>))
            .route("/status", get(status_handler::<C>))
            .with_state(state)
            .layer(middleware)
    }

    /// Serve until the shutdown broadcast fires, then drain.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server draining");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// The router, for in-process testing.
    pub fn into_router(self) -> Router {
        self.router
    }
}

/// `POST /api/{service}/{method}`: forward one call to a dependency.
async fn dispatch_handler<C: Connector>(
    State(state): State<AppState<C>>,
    Path((service, method)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let start = Instant::now();
    let request_id = request_id(&headers);

    tracing::debug!(
        request_id = request_id.as_deref().unwrap_or("unknown"),
        service = %service,
        method = %method,
        "Dispatching call"
    );

    let result = match parse_payload(&body) {
        Ok(payload) => {
            let mut call = RpcCall::new(method, payload);
            if let Some(id) = request_id.clone() {
                call = call.with_request_id(id);
            }
            state.dependencies.dispatch(&service, call).await
        }
        Err(e) => Err(e),
    };

    match result {
        Ok(reply) => {
            metrics::record_request(&service, StatusCode::OK.as_u16(), start);
            (StatusCode::OK, Json(ApiResponse::success(reply.payload))).into_response()
        }
        Err(e) => {
            let status = e.status_code();
            if status.is_server_error() {
                tracing::warn!(
                    request_id = request_id.as_deref().unwrap_or("unknown"),
                    service = %service,
                    status = status.as_u16(),
                    error = %e,
                    "Call failed"
                );
            } else {
                tracing::debug!(
                    request_id = request_id.as_deref().unwrap_or("unknown"),
                    service = %service,
                    status = status.as_u16(),
                    error = %e,
                    "Call rejected"
                );
            }
            metrics::record_request(&service, status.as_u16(), start);
            e.into_response()
        }
    }
}

/// `GET /health`: liveness plus the current registration.
async fn health_handler<C: Connector>(State(state): State<AppState<C>>) -> impl IntoResponse {
    let registration = state
        .registrar
        .as_ref()
        .and_then(|registrar| registrar.current())
        .map(|instance| {
            json!({
                "service": instance.name,
                "address": instance.address,
                "lease_id": instance.lease_id,
                "ttl_secs": instance.ttl_secs,
            })
        });

    Json(json!({
        "status": "ok",
        "uptime_secs": state.started.elapsed().as_secs(),
        "registration": registration,
    }))
}

/// `GET /status`: breaker and cache state per dependency.
async fn status_handler<C: Connector>(State(state): State<AppState<C>>) -> impl IntoResponse {
    Json(json!({
        "dependencies": state.dependencies.snapshot().await,
    }))
}
