//! Coordination store abstraction.
//!
//! # Responsibilities
//! - Leases: grant, keep alive, revoke
//! - Key writes bound to a lease, prefix scans, prefix watches
//!
//! # Design Decisions
//! - Object-safe (`Arc<dyn CoordinationStore>`) so each component owns an
//!   explicit handle instead of reaching for a global client
//! - Scans return keys in key order
//! - Delete events carry no value; consumers recover identity from the key

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use thiserror::Error;

/// Server-assigned lease handle.
pub type LeaseId = i64;

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by a coordination store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Store unreachable or refused the connection.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Lease expired or was revoked.
    #[error("lease {0} not found")]
    LeaseNotFound(LeaseId),

    /// Watch subscription ended on the store side.
    #[error("watch closed: {0}")]
    WatchClosed(String),

    /// Any other store-side failure.
    #[error("store error: {0}")]
    Backend(String),
}

/// One key and its value from a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawEventKind {
    /// Key created or updated.
    Put,
    /// Key deleted (explicitly or by lease expiry).
    Delete,
}

/// Change notification as delivered by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub kind: RawEventKind,
    pub key: String,
    /// Present for `Put`, absent for `Delete`.
    pub value: Option<String>,
}

impl RawEvent {
    pub fn put(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: RawEventKind::Put,
            key: key.into(),
            value: Some(value.into()),
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            kind: RawEventKind::Delete,
            key: key.into(),
            value: None,
        }
    }
}

/// Stream of change notifications for a prefix. Dropping it ends the
/// subscription.
pub type WatchStream = BoxStream<'static, StoreResult<RawEvent>>;

/// Renews a single lease.
#[async_trait]
pub trait LeaseRenewer: Send {
    /// Send one keep-alive. `Ok(Some(ttl))` while the lease lives,
    /// `Ok(None)` once the store reports it gone.
    async fn renew(&mut self) -> StoreResult<Option<i64>>;
}

/// Distributed key-value store with leases and prefix watches.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Grant a lease that expires after `ttl_secs` without renewal.
    async fn grant_lease(&self, ttl_secs: i64) -> StoreResult<LeaseId>;

    /// Open a keep-alive channel for `lease`.
    async fn keep_alive(&self, lease: LeaseId) -> StoreResult<Box<dyn LeaseRenewer>>;

    /// Revoke `lease`, deleting every key attached to it.
    async fn revoke_lease(&self, lease: LeaseId) -> StoreResult<()>;

    /// Write `key = value`, optionally bound to `lease`.
    async fn put(&self, key: &str, value: &str, lease: Option<LeaseId>) -> StoreResult<()>;

    /// All keys starting with `prefix`, in key order.
    async fn get_prefix(&self, prefix: &str) -> StoreResult<Vec<KeyValue>>;

    /// Subscribe to changes of keys starting with `prefix`.
    async fn watch_prefix(&self, prefix: &str) -> StoreResult<WatchStream>;
}
