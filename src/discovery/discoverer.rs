//! One-shot service resolution.
//!
//! # Responsibilities
//! - Prefix scan under `/services/{name}/`
//! - Pick the first instance (scan order) with a non-empty address
//!
//! # Design Decisions
//! - Single-instance selection, deterministic for a given store state
//! - Empty scan and all-empty values are distinct errors

use std::sync::Arc;

use crate::discovery::keys::service_prefix;
use crate::discovery::store::CoordinationStore;
use crate::error::GatewayError;

/// Resolves a service name to one address.
#[derive(Clone)]
pub struct Discoverer {
    store: Arc<dyn CoordinationStore>,
}

impl Discoverer {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self { store }
    }

    /// Resolve `service` to a single candidate address.
    pub async fn discover_service(&self, service: &str) -> Result<String, GatewayError> {
        let prefix = service_prefix(service);
        let kvs = self.store.get_prefix(&prefix).await.map_err(|e| {
            tracing::warn!(service = %service, error = %e, "Discovery scan failed");
            GatewayError::DiscoveryUnavailable(e)
        })?;

        if kvs.is_empty() {
            tracing::debug!(service = %service, "No instances registered");
            return Err(GatewayError::NoInstancesAvailable {
                service: service.to_string(),
            });
        }

        let candidates = kvs.len();
        match kvs.into_iter().find(|kv| !kv.value.is_empty()) {
            Some(kv) => {
                tracing::debug!(
                    service = %service,
                    address = %kv.value,
                    candidates,
                    "Service discovered"
                );
                Ok(kv.value)
            }
            None => {
                tracing::warn!(service = %service, candidates, "All registered instances have empty addresses");
                Err(GatewayError::NoValidAddress {
                    service: service.to_string(),
                })
            }
        }
    }
}

impl std::fmt::Debug for Discoverer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Discoverer").finish_non_exhaustive()
    }
}
