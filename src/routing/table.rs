//! Configured dependencies, by name.
//!
//! Each dependency gets its own breaker, connection cache, router and
//! (optionally) watch subscription. The table is built once at startup and
//! never changes shape afterwards.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::backend::ConnectionCache;
use crate::config::GatewayConfig;
use crate::discovery::{service_prefix, CoordinationStore, Discoverer, StoreError, WatchHandle, Watcher};
use crate::error::GatewayError;
use crate::resilience::CircuitBreaker;
use crate::routing::router::Router;
use crate::transport::{Connector, RpcCall, RpcReply};

/// Status of one dependency, as reported by `GET /status`.
#[derive(Debug, Clone, Serialize)]
pub struct DependencyStatus {
    pub name: String,
    pub circuit: &'static str,
    pub failure_count: u32,
    pub address: Option<String>,
    pub connected: bool,
    pub healthy: bool,
    pub connection_age_ms: Option<u64>,
    pub watching: bool,
}

struct Dependency<C: Connector> {
    router: Arc<Router<C>>,
    watch: bool,
}

/// Service name → router.
pub struct DependencyTable<C: Connector> {
    dependencies: BTreeMap<String, Dependency<C>>,
    watchers: Mutex<Vec<WatchHandle>>,
}

impl<C: Connector> DependencyTable<C> {
    pub fn build(
        config: &GatewayConfig,
        store: Arc<dyn CoordinationStore>,
        connector: Arc<C>,
    ) -> Self {
        let discoverer = Discoverer::new(store);
        let connect_timeout = Duration::from_secs(config.timeouts.connect_secs);
        let call_timeout = Duration::from_secs(config.timeouts.call_secs);

        let dependencies = config
            .dependencies
            .iter()
            .map(|dep| {
                let breaker = Arc::new(CircuitBreaker::new(
                    dep.name.clone(),
                    config.breaker.failure_threshold,
                    config.breaker.cooldown(),
                )
                .with_single_trial(config.breaker.half_open_single_trial));
                let cache = Arc::new(ConnectionCache::new(
                    dep.name.clone(),
                    connector.clone(),
                    discoverer.clone(),
                    breaker,
                    connect_timeout,
                ));
                tracing::debug!(service = %dep.name, watch = dep.watch, "Dependency configured");
                (
                    dep.name.clone(),
                    Dependency {
                        router: Arc::new(Router::new(cache, call_timeout)),
                        watch: dep.watch,
                    },
                )
            })
            .collect();

        Self {
            dependencies,
            watchers: Mutex::new(Vec::new()),
        }
    }

    /// Open a watch per dependency that asked for one. Events go straight
    /// into the dependency's cache.
    pub async fn start_watchers(&self, watcher: &Watcher) -> Result<(), StoreError> {
        for (name, dep) in self.dependencies.iter().filter(|(_, dep)| dep.watch) {
            let cache = dep.router.cache().clone();
            let handle = watcher
                .watch(service_prefix(name), move |event| {
                    let cache = cache.clone();
                    async move { cache.apply_watch_event(&event).await }
                })
                .await?;
            self.watchers.lock().expect("dependency table mutex poisoned").push(handle);
        }
        Ok(())
    }

    /// Stop every watch subscription and wait for the pumps to exit.
    pub async fn stop_watchers(&self) {
        let handles: Vec<WatchHandle> = self
            .watchers
            .lock()
            .expect("dependency table mutex poisoned")
            .drain(..)
            .collect();
        for handle in handles {
            handle.stop().await;
        }
    }

    pub fn get(&self, service: &str) -> Option<&Arc<Router<C>>> {
        self.dependencies.get(service).map(|dep| &dep.router)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.dependencies.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    pub async fn dispatch(&self, service: &str, call: RpcCall) -> Result<RpcReply, GatewayError> {
        let router = self
            .get(service)
            .ok_or_else(|| GatewayError::UnknownService(service.to_string()))?;
        router.dispatch(call).await
    }

    pub async fn snapshot(&self) -> Vec<DependencyStatus> {
        let watching = !self
            .watchers
            .lock()
            .expect("dependency table mutex poisoned")
            .is_empty();

        let mut statuses = Vec::with_capacity(self.dependencies.len());
        for (name, dep) in &self.dependencies {
            let cache = dep.router.cache();
            let breaker = cache.breaker().snapshot();
            let slot = cache.snapshot().await;
            statuses.push(DependencyStatus {
                name: name.clone(),
                circuit: breaker.state.as_str(),
                failure_count: breaker.failure_count,
                address: slot.address,
                connected: slot.connected,
                healthy: slot.healthy,
                connection_age_ms: slot.connection_age.map(|age| age.as_millis() as u64),
                watching: watching && dep.watch,
            });
        }
        statuses
    }
}

impl<C: Connector> std::fmt::Debug for DependencyTable<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyTable")
            .field("dependencies", &self.dependencies.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
