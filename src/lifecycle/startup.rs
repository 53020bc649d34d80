//! Startup orchestration.
//!
//! # Responsibilities
//! - Connect the configured coordination store
//! - Build the dependency table and open its watches
//! - Bind the listener, register this instance, start serving
//! - Tear everything down in reverse on shutdown
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal, including the first registration
//! - The listener is bound before registering so the advertised address is
//!   reachable by the time anyone can discover it
//! - Shutdown deregisters first so peers stop routing here before draining

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::config::{GatewayConfig, StoreBackend, StoreConfig};
use crate::discovery::{CoordinationStore, MemoryStore, Registrar, RegistrationError, StoreError, Watcher};
use crate::http::{AppState, HttpServer};
use crate::lifecycle::Shutdown;
use crate::routing::DependencyTable;
use crate::transport::Connector;

/// How long in-flight requests get to finish once shutdown starts.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("coordination store: {0}")]
    Store(#[source] StoreError),

    #[error("etcd backend requested but this build lacks the `etcd` feature")]
    EtcdUnsupported,

    #[error("opening dependency watches: {0}")]
    Watch(#[source] StoreError),

    #[error("binding {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },

    #[error("initial registration failed: {0}")]
    Registration(#[from] RegistrationError),
}

/// Open the store selected by configuration.
pub async fn connect_store(config: &StoreConfig) -> Result<Arc<dyn CoordinationStore>, StartupError> {
    match config.backend {
        StoreBackend::Memory => {
            tracing::warn!("Using in-process memory store; registrations are not shared");
            Ok(Arc::new(MemoryStore::new()))
        }
        #[cfg(feature = "etcd")]
        StoreBackend::Etcd => {
            let store = crate::discovery::EtcdStore::connect(config)
                .await
                .map_err(StartupError::Store)?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "etcd"))]
        StoreBackend::Etcd => Err(StartupError::EtcdUnsupported),
    }
}

/// A running gateway.
pub struct Gateway<C: Connector> {
    local_addr: SocketAddr,
    dependencies: Arc<DependencyTable<C>>,
    registrar: Option<Arc<Registrar>>,
    shutdown: Shutdown,
    server: JoinHandle<std::io::Result<()>>,
}

impl<C: Connector> Gateway<C> {
    /// Start every subsystem in order and begin serving.
    pub async fn start(
        config: &GatewayConfig,
        store: Arc<dyn CoordinationStore>,
        connector: Arc<C>,
    ) -> Result<Self, StartupError> {
        let dependencies = Arc::new(DependencyTable::build(config, store.clone(), connector));
        let watcher = Watcher::new(
            store.clone(),
            Duration::from_millis(config.watch.reconnect_delay_ms),
        );
        dependencies
            .start_watchers(&watcher)
            .await
            .map_err(StartupError::Watch)?;
        tracing::info!(dependencies = dependencies.len(), "Dependencies ready");

        let listener = match TcpListener::bind(&config.listener.bind_address).await {
            Ok(listener) => listener,
            Err(source) => {
                dependencies.stop_watchers().await;
                return Err(StartupError::Bind {
                    address: config.listener.bind_address.clone(),
                    source,
                });
            }
        };
        let local_addr = listener.local_addr().map_err(|source| StartupError::Bind {
            address: config.listener.bind_address.clone(),
            source,
        })?;

        let registrar = if config.registration.enabled {
            let registrar = Arc::new(Registrar::new(
                store,
                config.registration.retry_base_delay_ms,
                config.registration.retry_max_delay_ms,
            ));
            if let Err(e) = registrar
                .register(
                    &config.registration.service_name,
                    &config.registration.advertise_address,
                    config.registration.ttl_secs,
                )
                .await
            {
                tracing::error!(error = %e, "Initial registration failed");
                dependencies.stop_watchers().await;
                return Err(e.into());
            }
            Some(registrar)
        } else {
            tracing::info!("Self-registration disabled");
            None
        };

        let shutdown = Shutdown::new();
        let state = AppState {
            dependencies: dependencies.clone(),
            registrar: registrar.clone(),
            started: Instant::now(),
        };
        let server = HttpServer::new(config, state);
        let server = tokio::spawn(server.run(listener, shutdown.subscribe()));

        tracing::info!(address = %local_addr, "Gateway started");
        Ok(Self {
            local_addr,
            dependencies,
            registrar,
            shutdown,
            server,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn dependencies(&self) -> &Arc<DependencyTable<C>> {
        &self.dependencies
    }

    pub fn registrar(&self) -> Option<&Arc<Registrar>> {
        self.registrar.as_ref()
    }

    /// Deregister, drain the server, stop watches.
    pub async fn shutdown(self) {
        if let Some(registrar) = &self.registrar {
            if let Err(e) = registrar.deregister().await {
                tracing::warn!(error = %e, "Deregistration failed; lease will expire on its own");
            }
        }

        self.shutdown.trigger();
        match tokio::time::timeout(DRAIN_TIMEOUT, self.server).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => tracing::error!(error = %e, "HTTP server failed"),
            Ok(Err(e)) => tracing::error!(error = %e, "HTTP server task panicked"),
            Err(_) => tracing::warn!(timeout = ?DRAIN_TIMEOUT, "Drain timed out"),
        }

        self.dependencies.stop_watchers().await;
        tracing::info!("Shutdown complete");
    }
}
