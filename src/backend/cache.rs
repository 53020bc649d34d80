//! Lazily created, shared connection per dependency.
//!
//! # Responsibilities
//! - Hand out clones of one live connection handle
//! - Resolve and dial on a miss, gated by the circuit breaker
//! - Feed dial and call outcomes back into the breaker
//! - Apply topology corrections from the watcher
//!
//! # Locking
//! Two locks are involved: the slot lock here (async `RwLock`) and the
//! breaker's internal mutex. The order is always slot → breaker, never the
//! reverse. The breaker mutex is only taken inside synchronous breaker
//! calls, so it is never held across an await. The slot write lock *is*
//! held across discovery and the dial, which is what makes concurrent
//! misses collapse into a single dial.
//!
//! # Design Decisions
//! - Double-checked locking: shared fast path, exclusive re-check on miss
//! - A `Removed` event for the cached address clears it (next miss
//!   rediscovers); an `Added` event never replaces a healthy connection
//! - A failed call only drops the handle once the breaker has opened, so
//!   the dial success that follows cannot reset the failure streak

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::discovery::{Discoverer, StoreError, WatchEvent};
use crate::error::GatewayError;
use crate::observability::metrics;
use crate::resilience::{with_deadline, CircuitBreaker, DeadlineError};
use crate::transport::{Connection, Connector};

/// The cached handle plus bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub address: String,
    pub connection: T,
    pub connected_at: Instant,
    pub last_validated: Instant,
}

/// A handle checked out for one call.
#[derive(Debug, Clone)]
pub struct CachedConnection<T> {
    pub address: String,
    pub connection: T,
}

/// Point-in-time view of the cache, for status reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSnapshot {
    pub address: Option<String>,
    pub connected: bool,
    pub healthy: bool,
    pub connection_age: Option<Duration>,
    pub since_validated: Option<Duration>,
}

#[derive(Debug)]
struct Slot<T> {
    /// Last known address; survives the handle being dropped.
    address: Option<String>,
    entry: Option<CacheEntry<T>>,
}

impl<T: Connection> Slot<T> {
    fn healthy(&self) -> Option<&CacheEntry<T>> {
        self.entry.as_ref().filter(|entry| entry.connection.is_healthy())
    }
}

/// One dependency's connection cache.
pub struct ConnectionCache<C: Connector> {
    service: String,
    connector: Arc<C>,
    discoverer: Discoverer,
    breaker: Arc<CircuitBreaker>,
    connect_timeout: Duration,
    slot: RwLock<Slot<C::Connection>>,
}

impl<C: Connector> ConnectionCache<C> {
    pub fn new(
        service: impl Into<String>,
        connector: Arc<C>,
        discoverer: Discoverer,
        breaker: Arc<CircuitBreaker>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            service: service.into(),
            connector,
            discoverer,
            breaker,
            connect_timeout,
            slot: RwLock::new(Slot {
                address: None,
                entry: None,
            }),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Return the cached healthy connection, or resolve and dial one.
    pub async fn get_or_create_connection(
        &self,
    ) -> Result<CachedConnection<C::Connection>, GatewayError> {
        {
            let slot = self.slot.read().await;
            if let Some(entry) = slot.healthy() {
                return Ok(CachedConnection {
                    address: entry.address.clone(),
                    connection: entry.connection.clone(),
                });
            }
        }

        let mut slot = self.slot.write().await;

        // Another caller may have dialed while we waited for the lock.
        if let Some(entry) = slot.entry.as_mut() {
            if entry.connection.is_healthy() {
                entry.last_validated = Instant::now();
                return Ok(CachedConnection {
                    address: entry.address.clone(),
                    connection: entry.connection.clone(),
                });
            }
            tracing::info!(
                service = %self.service,
                address = %entry.address,
                "Cached connection unhealthy, replacing"
            );
            slot.entry = None;
        }

        if !self.breaker.can_execute() {
            metrics::record_dial(&self.service, "rejected");
            tracing::debug!(service = %self.service, "Circuit open, not dialing");
            return Err(GatewayError::CircuitOpen {
                service: self.service.clone(),
            });
        }

        let deadline = Instant::now() + self.connect_timeout;

        let address = match slot.address.clone() {
            Some(address) => address,
            None => match self.discover(deadline).await {
                Ok(address) => address,
                Err(e) => {
                    self.breaker.record_failure();
                    return Err(e);
                }
            },
        };

        let remaining = deadline.saturating_duration_since(Instant::now());
        match with_deadline(remaining, self.connector.connect(&address)).await {
            Ok(connection) => {
                self.breaker.record_success();
                metrics::record_dial(&self.service, "success");
                tracing::info!(service = %self.service, address = %address, "Connected to dependency");

                let now = Instant::now();
                slot.address = Some(address.clone());
                slot.entry = Some(CacheEntry {
                    address: address.clone(),
                    connection: connection.clone(),
                    connected_at: now,
                    last_validated: now,
                });
                Ok(CachedConnection { address, connection })
            }
            Err(DeadlineError::Elapsed(_)) => {
                self.breaker.record_failure();
                metrics::record_dial(&self.service, "timeout");
                tracing::warn!(
                    service = %self.service,
                    address = %address,
                    timeout = ?self.connect_timeout,
                    "Connect timed out"
                );
                slot.address = None;
                Err(GatewayError::ConnectTimeout {
                    address,
                    timeout: self.connect_timeout,
                })
            }
            Err(DeadlineError::Failed(source)) => {
                self.breaker.record_failure();
                metrics::record_dial(&self.service, "failed");
                tracing::warn!(
                    service = %self.service,
                    address = %address,
                    error = %source,
                    "Connect failed"
                );
                slot.address = None;
                Err(GatewayError::ConnectFailed { address, source })
            }
        }
    }

    async fn discover(&self, deadline: Instant) -> Result<String, GatewayError> {
        match tokio::time::timeout_at(deadline, self.discoverer.discover_service(&self.service)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(service = %self.service, "Discovery did not finish before the connect deadline");
                Err(GatewayError::DiscoveryUnavailable(StoreError::Unavailable(
                    "discovery timed out".to_string(),
                )))
            }
        }
    }

    /// A call on the cached connection succeeded.
    pub fn record_call_success(&self) {
        self.breaker.record_success();
    }

    /// A call on `address` failed. Drops the handle if the failure opened
    /// the circuit or the connection is broken; the address is kept.
    pub async fn record_call_failure(&self, address: &str) {
        let mut slot = self.slot.write().await;
        self.breaker.record_failure();

        let drop_entry = match slot.entry.as_ref() {
            Some(entry) if entry.address == address => {
                self.breaker.is_open() || !entry.connection.is_healthy()
            }
            _ => false,
        };
        if drop_entry {
            tracing::debug!(service = %self.service, address = %address, "Dropping cached connection after failure");
            slot.entry = None;
        }
    }

    /// Apply a topology change from the watcher.
    pub async fn apply_watch_event(&self, event: &WatchEvent) {
        let mut slot = self.slot.write().await;

        match event {
            WatchEvent::Removed(address) => {
                if slot.address.as_deref() == Some(address.as_str()) {
                    tracing::info!(
                        service = %self.service,
                        address = %address,
                        "Cached address removed, will rediscover"
                    );
                    slot.address = None;
                    slot.entry = None;
                }
            }
            WatchEvent::Added(address) => {
                if slot.healthy().is_some() {
                    tracing::debug!(
                        service = %self.service,
                        address = %address,
                        "Instance added, keeping healthy cached connection"
                    );
                    return;
                }
                if slot.address.as_deref() != Some(address.as_str()) {
                    tracing::info!(service = %self.service, address = %address, "Adopting newly added address");
                }
                slot.address = Some(address.clone());
                slot.entry = None;
            }
        }
    }

    pub async fn snapshot(&self) -> CacheSnapshot {
        let slot = self.slot.read().await;
        CacheSnapshot {
            address: slot.address.clone(),
            connected: slot.entry.is_some(),
            healthy: slot.healthy().is_some(),
            connection_age: slot.entry.as_ref().map(|entry| entry.connected_at.elapsed()),
            since_validated: slot.entry.as_ref().map(|entry| entry.last_validated.elapsed()),
        }
    }
}

impl<C: Connector> std::fmt::Debug for ConnectionCache<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionCache")
            .field("service", &self.service)
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}
