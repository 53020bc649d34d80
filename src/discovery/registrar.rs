//! Self-registration with an expiring lease.
//!
//! # Responsibilities
//! - Grant a lease and write `/services/{name}/{address}` bound to it
//! - Keep the lease alive from a background task
//! - Revoke the lease on deregistration so the key disappears at once
//!
//! # Data Flow
//! ```text
//! register()
//!     → grant_lease(ttl) → put(key, address, lease) → keep_alive(lease)
//!     → spawn renewal task (every ttl/3)
//!
//! renewal task, lease lost or keep-alive broken:
//!     → grant a new lease, rewrite the same key, reopen keep-alive
//!       (jittered backoff between attempts, until stopped)
//!     → best-effort revoke of the old lease
//!
//! deregister()
//!     → stop renewal task → revoke_lease(current)
//! ```
//!
//! # Design Decisions
//! - Only the initial registration can fail the caller; after that the
//!   renewal task recovers on its own and never gives up
//! - Each keep-alive round is bounded by the TTL so a hung store cannot
//!   stall renewal past expiry unnoticed

use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::discovery::keys::instance_key;
use crate::discovery::store::{CoordinationStore, LeaseId, LeaseRenewer, StoreError};
use crate::observability::metrics;
use crate::resilience::Backoff;

/// The registration this process currently holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInstance {
    pub name: String,
    pub address: String,
    pub lease_id: LeaseId,
    pub ttl_secs: i64,
}

impl ServiceInstance {
    pub fn key(&self) -> String {
        instance_key(&self.name, &self.address)
    }
}

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("already registered as {0}")]
    AlreadyRegistered(String),

    #[error("invalid lease TTL {0}")]
    InvalidTtl(i64),

    #[error(transparent)]
    Store(#[from] StoreError),
}

struct RenewalTask {
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Registers this process under a service prefix.
pub struct Registrar {
    store: Arc<dyn CoordinationStore>,
    retry_base_ms: u64,
    retry_max_ms: u64,
    current: Arc<Mutex<Option<ServiceInstance>>>,
    renewal: Mutex<Option<RenewalTask>>,
}

impl Registrar {
    pub fn new(store: Arc<dyn CoordinationStore>, retry_base_ms: u64, retry_max_ms: u64) -> Self {
        Self {
            store,
            retry_base_ms,
            retry_max_ms,
            current: Arc::new(Mutex::new(None)),
            renewal: Mutex::new(None),
        }
    }

    /// Register `address` under `name` and start keeping the lease alive.
    pub async fn register(
        &self,
        name: &str,
        address: &str,
        ttl_secs: i64,
    ) -> Result<ServiceInstance, RegistrationError> {
        if ttl_secs <= 0 {
            return Err(RegistrationError::InvalidTtl(ttl_secs));
        }
        if let Some(existing) = self.current() {
            return Err(RegistrationError::AlreadyRegistered(existing.key()));
        }

        let (instance, renewer) = establish(self.store.as_ref(), name, address, ttl_secs).await?;
        tracing::info!(
            service = %name,
            address = %address,
            lease_id = instance.lease_id,
            ttl = ttl_secs,
            "Registered service instance"
        );

        *self.current.lock().expect("registrar mutex poisoned") = Some(instance.clone());

        let (stop_tx, stop_rx) = oneshot::channel();
        let renewal = RenewalLoop {
            store: self.store.clone(),
            current: self.current.clone(),
            name: name.to_string(),
            address: address.to_string(),
            ttl_secs,
            retry_base_ms: self.retry_base_ms,
            retry_max_ms: self.retry_max_ms,
        };
        let handle = tokio::spawn(renewal.run(renewer, stop_rx));
        *self.renewal.lock().expect("registrar mutex poisoned") = Some(RenewalTask { stop_tx, handle });

        Ok(instance)
    }

    /// Stop renewing and revoke the lease. A no-op when not registered.
    pub async fn deregister(&self) -> Result<(), RegistrationError> {
        let task = self.renewal.lock().expect("registrar mutex poisoned").take();
        if let Some(task) = task {
            let _ = task.stop_tx.send(());
            if let Err(e) = task.handle.await {
                tracing::warn!(error = %e, "Lease renewal task ended abnormally");
            }
        }

        let Some(instance) = self.current.lock().expect("registrar mutex poisoned").take() else {
            tracing::debug!("Deregister called without an active registration");
            return Ok(());
        };

        match self.store.revoke_lease(instance.lease_id).await {
            Ok(()) | Err(StoreError::LeaseNotFound(_)) => {
                tracing::info!(
                    service = %instance.name,
                    address = %instance.address,
                    lease_id = instance.lease_id,
                    "Deregistered service instance"
                );
                Ok(())
            }
            Err(e) => {
                tracing::warn!(lease_id = instance.lease_id, error = %e, "Lease revoke failed");
                Err(e.into())
            }
        }
    }

    /// Current registration, if any.
    pub fn current(&self) -> Option<ServiceInstance> {
        self.current.lock().expect("registrar mutex poisoned").clone()
    }
}

impl std::fmt::Debug for Registrar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registrar")
            .field("current", &self.current())
            .finish_non_exhaustive()
    }
}

/// Grant, write and open keep-alive. Cleans up the lease if a later step fails.
async fn establish(
    store: &dyn CoordinationStore,
    name: &str,
    address: &str,
    ttl_secs: i64,
) -> Result<(ServiceInstance, Box<dyn LeaseRenewer>), StoreError> {
    let lease_id = store.grant_lease(ttl_secs).await?;
    let key = instance_key(name, address);

    let renewer = match store.put(&key, address, Some(lease_id)).await {
        Ok(()) => store.keep_alive(lease_id).await,
        Err(e) => Err(e),
    };
    let renewer = match renewer {
        Ok(renewer) => renewer,
        Err(e) => {
            let _ = store.revoke_lease(lease_id).await;
            return Err(e);
        }
    };

    let instance = ServiceInstance {
        name: name.to_string(),
        address: address.to_string(),
        lease_id,
        ttl_secs,
    };
    Ok((instance, renewer))
}

fn renewal_period(ttl_secs: i64) -> Duration {
    Duration::from_secs((ttl_secs / 3).max(1) as u64)
}

struct RenewalLoop {
    store: Arc<dyn CoordinationStore>,
    current: Arc<Mutex<Option<ServiceInstance>>>,
    name: String,
    address: String,
    ttl_secs: i64,
    retry_base_ms: u64,
    retry_max_ms: u64,
}

impl RenewalLoop {
    async fn run(self, mut renewer: Box<dyn LeaseRenewer>, mut stop_rx: oneshot::Receiver<()>) {
        let period = renewal_period(self.ttl_secs);
        let ttl = Duration::from_secs(self.ttl_secs as u64);
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            tokio::select! {
                _ = &mut stop_rx => break,
                _ = ticker.tick() => {}
            }

            let outcome = tokio::time::timeout(ttl, renewer.renew()).await;
            match outcome {
                Ok(Ok(Some(remaining))) => {
                    tracing::trace!(service = %self.name, ttl = remaining, "Lease renewed");
                    metrics::record_lease_renewal(&self.name, "ok");
                    continue;
                }
                Ok(Ok(None)) => {
                    tracing::warn!(service = %self.name, "Lease lost, re-registering");
                    metrics::record_lease_renewal(&self.name, "lost");
                }
                Ok(Err(e)) => {
                    tracing::warn!(service = %self.name, error = %e, "Lease keep-alive failed, re-registering");
                    metrics::record_lease_renewal(&self.name, "error");
                }
                Err(_) => {
                    tracing::warn!(service = %self.name, timeout = ?ttl, "Lease keep-alive timed out, re-registering");
                    metrics::record_lease_renewal(&self.name, "timeout");
                }
            }

            match self.reregister(&mut stop_rx).await {
                Some(next) => {
                    renewer = next;
                    ticker.reset();
                }
                None => break,
            }
        }

        tracing::debug!(service = %self.name, "Lease renewal stopped");
    }

    /// Establish a fresh lease for the same key. Returns `None` if stopped
    /// before succeeding.
    async fn reregister(&self, stop_rx: &mut oneshot::Receiver<()>) -> Option<Box<dyn LeaseRenewer>> {
        let mut backoff = Backoff::new(self.retry_base_ms, self.retry_max_ms);
        let ttl = Duration::from_secs(self.ttl_secs as u64);

        loop {
            let establishing = establish(self.store.as_ref(), &self.name, &self.address, self.ttl_secs);
            tokio::pin!(establishing);
            let attempt = tokio::select! {
                result = &mut establishing => result,
                _ = &mut *stop_rx => {
                    // A lease granted by the interrupted attempt would keep the key alive.
                    if let Ok(Ok((orphan, _))) = tokio::time::timeout(ttl, establishing).await {
                        tracing::debug!(lease_id = orphan.lease_id, "Revoking lease from interrupted re-registration");
                        let _ = self.store.revoke_lease(orphan.lease_id).await;
                    }
                    return None;
                }
            };

            match attempt {
                Ok((instance, renewer)) => {
                    let previous = self
                        .current
                        .lock()
                        .expect("registrar mutex poisoned")
                        .replace(instance.clone());
                    tracing::info!(
                        service = %self.name,
                        address = %self.address,
                        lease_id = instance.lease_id,
                        attempts = backoff.attempts() + 1,
                        "Re-registered service instance"
                    );
                    metrics::record_lease_renewal(&self.name, "reregistered");

                    // The key now belongs to the new lease.
                    if let Some(old) = previous.filter(|old| old.lease_id != instance.lease_id) {
                        let _ = self.store.revoke_lease(old.lease_id).await;
                    }
                    return Some(renewer);
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        service = %self.name,
                        error = %e,
                        attempt = backoff.attempts(),
                        delay = ?delay,
                        "Re-registration failed"
                    );
                    tokio::select! {
                        _ = &mut *stop_rx => return None,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}
