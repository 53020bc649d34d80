//! In-process coordination store.
//!
//! Implements the same lease and watch semantics as etcd for a single
//! process: keys bound to a lease disappear when it expires or is revoked,
//! and every change is broadcast to matching watchers.
//!
//! Expiry is evaluated lazily at the start of every operation, so an
//! expired lease is observed (and its Delete events emitted) the next time
//! anyone touches the store.

use async_trait::async_trait;
use futures_util::StreamExt;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::discovery::store::{
    CoordinationStore, KeyValue, LeaseId, LeaseRenewer, RawEvent, StoreError, StoreResult,
    WatchStream,
};

const EVENT_BUFFER: usize = 1024;

#[derive(Debug)]
struct Lease {
    ttl: Duration,
    deadline: Instant,
    keys: HashSet<String>,
}

#[derive(Debug)]
struct Entry {
    value: String,
    lease: Option<LeaseId>,
}

#[derive(Debug, Default)]
struct State {
    next_lease: LeaseId,
    leases: HashMap<LeaseId, Lease>,
    data: BTreeMap<String, Entry>,
}

impl State {
    /// Drop expired leases and their keys, returning the resulting events.
    fn purge_expired(&mut self, now: Instant) -> Vec<RawEvent> {
        let expired: Vec<LeaseId> = self
            .leases
            .iter()
            .filter(|(_, lease)| lease.deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        let mut events = Vec::new();
        for id in expired {
            tracing::debug!(lease_id = id, "Lease expired");
            events.extend(self.remove_lease(id));
        }
        events
    }

    fn remove_lease(&mut self, id: LeaseId) -> Vec<RawEvent> {
        let Some(lease) = self.leases.remove(&id) else {
            return Vec::new();
        };
        let mut keys: Vec<String> = lease.keys.into_iter().collect();
        keys.sort();
        keys.into_iter()
            .filter(|key| self.data.remove(key).is_some())
            .map(RawEvent::delete)
            .collect()
    }
}

#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
    events: broadcast::Sender<RawEvent>,
    available: AtomicBool,
}

impl Shared {
    fn check_available(&self) -> StoreResult<()> {
        if self.available.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store marked unavailable".to_string()))
        }
    }

    /// Run `f` against the state after expiring stale leases, then publish
    /// every resulting event once the lock is released.
    fn with_state<T>(&self, f: impl FnOnce(&mut State, &mut Vec<RawEvent>) -> StoreResult<T>) -> StoreResult<T> {
        self.check_available()?;
        let (result, events) = {
            let mut state = self.state.lock().expect("memory store mutex poisoned");
            let mut events = state.purge_expired(Instant::now());
            let result = f(&mut state, &mut events);
            (result, events)
        };
        for event in events {
            // No receivers is fine.
            let _ = self.events.send(event);
        }
        result
    }
}

/// In-memory [`CoordinationStore`].
#[derive(Debug, Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    next_lease: 1,
                    ..State::default()
                }),
                events,
                available: AtomicBool::new(true),
            }),
        }
    }

    /// Simulate an outage: while unavailable every operation fails with
    /// [`StoreError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.shared.available.store(available, Ordering::Relaxed);
    }

    /// Force lease expiry evaluation now.
    pub fn expire_leases(&self) {
        let _ = self.shared.with_state(|_, _| Ok(()));
    }

    /// Number of live leases.
    pub fn lease_count(&self) -> usize {
        self.expire_leases();
        self.shared
            .state
            .lock()
            .expect("memory store mutex poisoned")
            .leases
            .len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn grant_lease(&self, ttl_secs: i64) -> StoreResult<LeaseId> {
        if ttl_secs <= 0 {
            return Err(StoreError::Backend(format!("invalid lease TTL {ttl_secs}")));
        }
        self.shared.with_state(|state, _| {
            let id = state.next_lease;
            state.next_lease += 1;
            let ttl = Duration::from_secs(ttl_secs as u64);
            state.leases.insert(
                id,
                Lease {
                    ttl,
                    deadline: Instant::now() + ttl,
                    keys: HashSet::new(),
                },
            );
            Ok(id)
        })
    }

    async fn keep_alive(&self, lease: LeaseId) -> StoreResult<Box<dyn LeaseRenewer>> {
        self.shared.with_state(|state, _| {
            if state.leases.contains_key(&lease) {
                Ok(())
            } else {
                Err(StoreError::LeaseNotFound(lease))
            }
        })?;
        Ok(Box::new(MemoryRenewer {
            shared: self.shared.clone(),
            lease,
        }))
    }

    async fn revoke_lease(&self, lease: LeaseId) -> StoreResult<()> {
        self.shared.with_state(|state, events| {
            if !state.leases.contains_key(&lease) {
                return Err(StoreError::LeaseNotFound(lease));
            }
            events.extend(state.remove_lease(lease));
            Ok(())
        })
    }

    async fn put(&self, key: &str, value: &str, lease: Option<LeaseId>) -> StoreResult<()> {
        self.shared.with_state(|state, events| {
            if let Some(id) = lease {
                let attached = state
                    .leases
                    .get_mut(&id)
                    .ok_or(StoreError::LeaseNotFound(id))?;
                attached.keys.insert(key.to_string());
            }

            let previous = state.data.insert(
                key.to_string(),
                Entry {
                    value: value.to_string(),
                    lease,
                },
            );
            // A rebound key no longer belongs to its old lease.
            if let Some(old) = previous.and_then(|entry| entry.lease) {
                if Some(old) != lease {
                    if let Some(old_lease) = state.leases.get_mut(&old) {
                        old_lease.keys.remove(key);
                    }
                }
            }

            events.push(RawEvent::put(key, value));
            Ok(())
        })
    }

    async fn get_prefix(&self, prefix: &str) -> StoreResult<Vec<KeyValue>> {
        self.shared.with_state(|state, _| {
            Ok(state
                .data
                .range(prefix.to_string()..)
                .take_while(|(key, _)| key.starts_with(prefix))
                .map(|(key, entry)| KeyValue {
                    key: key.clone(),
                    value: entry.value.clone(),
                })
                .collect())
        })
    }

    async fn watch_prefix(&self, prefix: &str) -> StoreResult<WatchStream> {
        self.shared.check_available()?;
        let rx = self.shared.events.subscribe();
        let prefix = prefix.to_string();

        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            match rx.recv().await {
                Ok(event) => Some((Ok(event), rx)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Memory store watcher lagged, events dropped");
                    let err = StoreError::WatchClosed(format!("lagged by {skipped} events"));
                    Some((Err(err), rx))
                }
                Err(broadcast::error::RecvError::Closed) => None,
            }
        })
        .filter(move |item| {
            let keep = match item {
                Ok(event) => event.key.starts_with(&prefix),
                Err(_) => true,
            };
            futures_util::future::ready(keep)
        });

        Ok(stream.boxed())
    }
}

struct MemoryRenewer {
    shared: Arc<Shared>,
    lease: LeaseId,
}

#[async_trait]
impl LeaseRenewer for MemoryRenewer {
    async fn renew(&mut self) -> StoreResult<Option<i64>> {
        let lease = self.lease;
        self.shared.with_state(|state, _| {
            Ok(state.leases.get_mut(&lease).map(|entry| {
                entry.deadline = Instant::now() + entry.ttl;
                entry.ttl.as_secs() as i64
            }))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::store::RawEventKind;

    #[tokio::test]
    async fn test_prefix_scan_in_key_order() {
        let store = MemoryStore::new();
        store.put("/services/a/2", "2", None).await.unwrap();
        store.put("/services/a/1", "1", None).await.unwrap();
        store.put("/services/ab/3", "3", None).await.unwrap();
        store.put("/services/b/4", "4", None).await.unwrap();

        let kvs = store.get_prefix("/services/a/").await.unwrap();
        let keys: Vec<_> = kvs.iter().map(|kv| kv.key.as_str()).collect();
        assert_eq!(keys, vec!["/services/a/1", "/services/a/2"]);
    }

    #[tokio::test]
    async fn test_revoke_removes_attached_keys() {
        let store = MemoryStore::new();
        let lease = store.grant_lease(10).await.unwrap();
        store.put("/services/a/x", "x", Some(lease)).await.unwrap();
        store.put("/services/a/y", "y", None).await.unwrap();

        store.revoke_lease(lease).await.unwrap();
        let kvs = store.get_prefix("/services/a/").await.unwrap();
        assert_eq!(kvs.len(), 1);
        assert_eq!(kvs[0].value, "y");

        assert!(matches!(
            store.revoke_lease(lease).await,
            Err(StoreError::LeaseNotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lease_expires_without_renewal() {
        let store = MemoryStore::new();
        let lease = store.grant_lease(10).await.unwrap();
        store.put("/services/a/x", "x", Some(lease)).await.unwrap();

        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(store.get_prefix("/services/a/").await.unwrap().len(), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(store.get_prefix("/services/a/").await.unwrap().is_empty());
        assert_eq!(store.lease_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_renewal_extends_deadline() {
        let store = MemoryStore::new();
        let lease = store.grant_lease(10).await.unwrap();
        store.put("/services/a/x", "x", Some(lease)).await.unwrap();
        let mut renewer = store.keep_alive(lease).await.unwrap();

        for _ in 0..5 {
            tokio::time::advance(Duration::from_secs(5)).await;
            assert_eq!(renewer.renew().await.unwrap(), Some(10));
        }
        assert_eq!(store.get_prefix("/services/a/").await.unwrap().len(), 1);

        store.revoke_lease(lease).await.unwrap();
        assert_eq!(renewer.renew().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_rebinding_key_detaches_old_lease() {
        let store = MemoryStore::new();
        let old = store.grant_lease(10).await.unwrap();
        let new = store.grant_lease(10).await.unwrap();
        store.put("/services/a/x", "x", Some(old)).await.unwrap();
        store.put("/services/a/x", "x", Some(new)).await.unwrap();

        store.revoke_lease(old).await.unwrap();
        assert_eq!(store.get_prefix("/services/a/").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_watch_sees_puts_and_deletes_under_prefix() {
        let store = MemoryStore::new();
        let mut watch = store.watch_prefix("/services/a/").await.unwrap();

        let lease = store.grant_lease(10).await.unwrap();
        store.put("/services/b/ignored", "z", None).await.unwrap();
        store.put("/services/a/x", "x", Some(lease)).await.unwrap();
        store.revoke_lease(lease).await.unwrap();

        let first = watch.next().await.unwrap().unwrap();
        assert_eq!(first, RawEvent::put("/services/a/x", "x"));

        let second = watch.next().await.unwrap().unwrap();
        assert_eq!(second.kind, RawEventKind::Delete);
        assert_eq!(second.key, "/services/a/x");
        assert_eq!(second.value, None);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_every_operation() {
        let store = MemoryStore::new();
        store.set_available(false);
        assert!(matches!(
            store.get_prefix("/").await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.grant_lease(10).await.is_err());
        assert!(store.watch_prefix("/").await.is_err());

        store.set_available(true);
        assert!(store.get_prefix("/").await.is_ok());
    }
}
