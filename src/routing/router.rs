//! Call-path entry point for one dependency.
//!
//! # Responsibilities
//! - Check out a connection from the cache
//! - Run the call under the call deadline
//! - Report the outcome back through the cache's bookkeeping path
//!
//! # Design Decisions
//! - No retries: one attempt per inbound call
//! - Timeout and remote failure are logged differently but count the same
//! - Oversized requests are rejected as caller errors and never counted

use std::sync::Arc;
use std::time::Duration;

use crate::backend::ConnectionCache;
use crate::error::GatewayError;
use crate::observability::metrics;
use crate::resilience::{with_deadline, DeadlineError};
use crate::transport::{Connection, Connector, RpcCall, RpcReply, TransportError};

/// Dispatches calls to one dependency.
pub struct Router<C: Connector> {
    cache: Arc<ConnectionCache<C>>,
    call_timeout: Duration,
}

impl<C: Connector> Router<C> {
    pub fn new(cache: Arc<ConnectionCache<C>>, call_timeout: Duration) -> Self {
        Self {
            cache,
            call_timeout,
        }
    }

    pub fn service(&self) -> &str {
        self.cache.service()
    }

    pub fn cache(&self) -> &Arc<ConnectionCache<C>> {
        &self.cache
    }

    /// Send `call` to the dependency.
    pub async fn dispatch(&self, call: RpcCall) -> Result<RpcReply, GatewayError> {
        let checkout = self.cache.get_or_create_connection().await?;
        let method = call.method.clone();
        let request_id = call.request_id.clone().unwrap_or_default();

        match with_deadline(self.call_timeout, checkout.connection.call(call)).await {
            Ok(reply) => {
                self.cache.record_call_success();
                tracing::debug!(
                    service = %self.service(),
                    method = %method,
                    request_id = %request_id,
                    address = %checkout.address,
                    "Call succeeded"
                );
                Ok(reply)
            }
            Err(DeadlineError::Elapsed(timeout)) => {
                tracing::warn!(
                    service = %self.service(),
                    method = %method,
                    request_id = %request_id,
                    address = %checkout.address,
                    timeout = ?timeout,
                    "Call deadline exceeded"
                );
                metrics::record_rpc_failure(self.service(), "timeout");
                self.cache.record_call_failure(&checkout.address).await;
                Err(GatewayError::RpcTimeout { method, timeout })
            }
            Err(DeadlineError::Failed(source)) if !source.is_dependency_failure() => {
                tracing::debug!(
                    service = %self.service(),
                    method = %method,
                    request_id = %request_id,
                    error = %source,
                    "Call rejected before sending"
                );
                Err(GatewayError::BadRequest(source.to_string()))
            }
            Err(DeadlineError::Failed(source)) => {
                let kind = match source {
                    TransportError::Remote { .. } => "remote",
                    _ => "transport",
                };
                tracing::warn!(
                    service = %self.service(),
                    method = %method,
                    request_id = %request_id,
                    address = %checkout.address,
                    error = %source,
                    "Call failed"
                );
                metrics::record_rpc_failure(self.service(), kind);
                self.cache.record_call_failure(&checkout.address).await;
                Err(GatewayError::RpcFailure { method, source })
            }
        }
    }
}

impl<C: Connector> std::fmt::Debug for Router<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("service", &self.service())
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::{instance_key, CoordinationStore, Discoverer, MemoryStore};
    use crate::resilience::{CircuitBreaker, CircuitState};
    use crate::transport::mock::{CallBehavior, MockConnector};
    use serde_json::json;

    async fn router() -> (MockConnector, Router<MockConnector>) {
        let store = MemoryStore::new();
        store
            .put(&instance_key("user-service", "10.0.0.5:9001"), "10.0.0.5:9001", None)
            .await
            .unwrap();
        let connector = MockConnector::new();
        let cache = Arc::new(ConnectionCache::new(
            "user-service",
            Arc::new(connector.clone()),
            Discoverer::new(Arc::new(store)),
            Arc::new(CircuitBreaker::new("user-service", 3, Duration::from_secs(30))),
            Duration::from_secs(5),
        ));
        (connector, Router::new(cache, Duration::from_secs(10)))
    }

    #[tokio::test]
    async fn test_successful_dispatch() {
        let (_, router) = router().await;
        let reply = router
            .dispatch(RpcCall::new("GetUser", json!({"id": 1})))
            .await
            .unwrap();
        assert_eq!(reply.payload, json!({"id": 1}));
    }

    #[tokio::test]
    async fn test_remote_failure_counts() {
        let (connector, router) = router().await;
        connector.set_calls(CallBehavior::Fail);

        let err = router.dispatch(RpcCall::new("GetUser", json!({}))).await.unwrap_err();
        assert!(matches!(err, GatewayError::RpcFailure { .. }));
        assert_eq!(router.cache().breaker().snapshot().failure_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_counts_like_failure() {
        let (connector, router) = router().await;
        connector.set_calls(CallBehavior::Hang);

        let err = router.dispatch(RpcCall::new("GetUser", json!({}))).await.unwrap_err();
        assert!(matches!(
            err,
            GatewayError::RpcTimeout { timeout, .. } if timeout == Duration::from_secs(10)
        ));
        assert_eq!(router.cache().breaker().snapshot().failure_count, 1);
    }

    #[tokio::test]
    async fn test_oversized_request_is_caller_error() {
        let (connector, router) = router().await;
        connector.set_calls(CallBehavior::Oversized);

        for _ in 0..3 {
            let err = router
                .dispatch(RpcCall::new("GetUser", json!({"blob": "xxxxxxxxxxxx"})))
                .await
                .unwrap_err();
            assert!(matches!(err, GatewayError::BadRequest(_)));
            assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
        }
        let breaker = router.cache().breaker().snapshot();
        assert_eq!(breaker.failure_count, 0);
        assert_eq!(breaker.state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_remote_failure_names_the_instance() {
        let (connector, router) = router().await;
        connector.set_calls(CallBehavior::Fail);

        let err = router.dispatch(RpcCall::new("GetUser", json!({}))).await.unwrap_err();
        assert!(err.to_string().contains("10.0.0.5:9001"), "{err}");
    }

    #[tokio::test]
    async fn test_no_internal_retry() {
        let (connector, router) = router().await;
        connector.set_calls(CallBehavior::Fail);

        let _ = router.dispatch(RpcCall::new("GetUser", json!({}))).await;
        assert_eq!(connector.dial_count(), 1);
        assert_eq!(router.cache().breaker().snapshot().failure_count, 1);
    }

    #[tokio::test]
    async fn test_three_failures_then_fail_fast() {
        let (connector, router) = router().await;
        connector.set_calls(CallBehavior::Fail);

        for _ in 0..3 {
            let err = router.dispatch(RpcCall::new("GetUser", json!({}))).await.unwrap_err();
            assert!(err.is_call_failure());
        }
        assert_eq!(router.cache().breaker().snapshot().state, CircuitState::Open);

        let err = router.dispatch(RpcCall::new("GetUser", json!({}))).await.unwrap_err();
        assert!(matches!(err, GatewayError::CircuitOpen { .. }));
        assert_eq!(connector.dial_count(), 1);
    }

    #[tokio::test]
    async fn test_success_resets_failure_streak() {
        let (connector, router) = router().await;
        connector.set_calls(CallBehavior::Fail);
        for _ in 0..2 {
            let _ = router.dispatch(RpcCall::new("GetUser", json!({}))).await;
        }

        connector.set_calls(CallBehavior::Echo);
        router.dispatch(RpcCall::new("GetUser", json!({}))).await.unwrap();
        assert_eq!(router.cache().breaker().snapshot().failure_count, 0);
    }
}
