//! Prefix watch → address events.
//!
//! # Responsibilities
//! - Keep a subscription open on a service prefix
//! - Translate raw store notifications into `Added` / `Removed` events
//! - Deliver events to a callback, in order, one at a time
//!
//! # Design Decisions
//! - `Added` takes the address from the value; `Removed` takes it from the
//!   last key segment, because deletions carry no value
//! - The first subscription is opened before `watch()` returns; later
//!   breaks are re-opened after `reconnect_delay`
//! - The pump task is owned by a [`WatchHandle`]: stopped explicitly on
//!   shutdown and aborted if the handle is dropped

use futures_util::StreamExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::discovery::keys::address_from_key;
use crate::discovery::store::{CoordinationStore, RawEvent, RawEventKind, StoreResult, WatchStream};
use crate::observability::metrics;

/// Topology change for one address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Added(String),
    Removed(String),
}

impl WatchEvent {
    /// Translate a raw notification. Returns `None` for notifications that
    /// carry no usable address.
    pub fn from_raw(raw: &RawEvent) -> Option<Self> {
        match raw.kind {
            RawEventKind::Put => raw
                .value
                .as_deref()
                .filter(|value| !value.is_empty())
                .map(|value| WatchEvent::Added(value.to_string())),
            RawEventKind::Delete => {
                address_from_key(&raw.key).map(|address| WatchEvent::Removed(address.to_string()))
            }
        }
    }

    pub fn address(&self) -> &str {
        match self {
            WatchEvent::Added(address) | WatchEvent::Removed(address) => address,
        }
    }

    pub fn is_added(&self) -> bool {
        matches!(self, WatchEvent::Added(_))
    }

    fn kind(&self) -> &'static str {
        if self.is_added() {
            "added"
        } else {
            "removed"
        }
    }
}

/// Opens prefix subscriptions against a store.
#[derive(Clone)]
pub struct Watcher {
    store: Arc<dyn CoordinationStore>,
    reconnect_delay: Duration,
}

impl Watcher {
    pub fn new(store: Arc<dyn CoordinationStore>, reconnect_delay: Duration) -> Self {
        Self {
            store,
            reconnect_delay,
        }
    }

    /// Subscribe to `prefix` and feed every translated event to `callback`.
    pub async fn watch<F, Fut>(&self, prefix: impl Into<String>, callback: F) -> StoreResult<WatchHandle>
    where
        F: Fn(WatchEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let prefix = prefix.into();
        let stream = self.store.watch_prefix(&prefix).await?;
        tracing::info!(prefix = %prefix, "Watch established");

        let (stop_tx, stop_rx) = oneshot::channel();
        let pump = WatchPump {
            store: self.store.clone(),
            prefix,
            reconnect_delay: self.reconnect_delay,
            callback,
        };
        let task = tokio::spawn(pump.run(stream, stop_rx));

        Ok(WatchHandle {
            stop_tx: Some(stop_tx),
            task: Some(task),
        })
    }
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("reconnect_delay", &self.reconnect_delay)
            .finish_non_exhaustive()
    }
}

struct WatchPump<F> {
    store: Arc<dyn CoordinationStore>,
    prefix: String,
    reconnect_delay: Duration,
    callback: F,
}

impl<F, Fut> WatchPump<F>
where
    F: Fn(WatchEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn run(self, mut stream: WatchStream, mut stop_rx: oneshot::Receiver<()>) {
        let service = self.prefix.trim_end_matches('/').rsplit('/').next().unwrap_or_default().to_string();

        loop {
            let item = tokio::select! {
                _ = &mut stop_rx => break,
                item = stream.next() => item,
            };

            match item {
                Some(Ok(raw)) => match WatchEvent::from_raw(&raw) {
                    Some(event) => {
                        tracing::debug!(prefix = %self.prefix, event = ?event, "Watch event");
                        metrics::record_watch_event(&service, event.kind());
                        (self.callback)(event).await;
                    }
                    None => {
                        tracing::debug!(key = %raw.key, "Ignoring watch event without address");
                    }
                },
                Some(Err(e)) => {
                    tracing::warn!(prefix = %self.prefix, error = %e, "Watch stream failed, reconnecting");
                    match self.reopen(&mut stop_rx).await {
                        Some(next) => stream = next,
                        None => break,
                    }
                }
                None => {
                    tracing::warn!(prefix = %self.prefix, "Watch stream ended, reconnecting");
                    match self.reopen(&mut stop_rx).await {
                        Some(next) => stream = next,
                        None => break,
                    }
                }
            }
        }

        tracing::info!(prefix = %self.prefix, "Watch stopped");
    }

    /// Re-open the subscription until it succeeds or a stop arrives.
    async fn reopen(&self, stop_rx: &mut oneshot::Receiver<()>) -> Option<WatchStream> {
        loop {
            tokio::select! {
                _ = &mut *stop_rx => return None,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }

            match self.store.watch_prefix(&self.prefix).await {
                Ok(stream) => {
                    tracing::info!(prefix = %self.prefix, "Watch re-established");
                    return Some(stream);
                }
                Err(e) => {
                    tracing::warn!(prefix = %self.prefix, error = %e, "Watch reconnect failed");
                }
            }
        }
    }
}

/// Owner of a running watch subscription.
#[derive(Debug)]
pub struct WatchHandle {
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl WatchHandle {
    /// Stop the subscription and wait for the pump to exit.
    pub async fn stop(mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Watch task ended abnormally");
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |task| task.is_finished())
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::keys::{instance_key, service_prefix};
    use crate::discovery::memory::MemoryStore;
    use tokio::sync::mpsc;

    #[test]
    fn test_added_uses_value_removed_uses_key() {
        let put = RawEvent::put("/services/user-service/ignored-key", "10.0.0.5:9001");
        assert_eq!(
            WatchEvent::from_raw(&put),
            Some(WatchEvent::Added("10.0.0.5:9001".into()))
        );

        let delete = RawEvent::delete("/services/user-service/10.0.0.5:9001");
        assert_eq!(
            WatchEvent::from_raw(&delete),
            Some(WatchEvent::Removed("10.0.0.5:9001".into()))
        );
    }

    #[test]
    fn test_events_without_address_are_dropped() {
        assert_eq!(WatchEvent::from_raw(&RawEvent::put("/services/a/x", "")), None);
        assert_eq!(WatchEvent::from_raw(&RawEvent::delete("/services/a/")), None);
    }

    async fn collecting_watch(store: &MemoryStore) -> (WatchHandle, mpsc::UnboundedReceiver<WatchEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let watcher = Watcher::new(Arc::new(store.clone()), Duration::from_millis(10));
        let handle = watcher
            .watch(service_prefix("user-service"), move |event| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(event);
                }
            })
            .await
            .unwrap();
        (handle, rx)
    }

    #[tokio::test]
    async fn test_watch_delivers_added_then_removed() {
        let store = MemoryStore::new();
        let (handle, mut rx) = collecting_watch(&store).await;

        let lease = store.grant_lease(10).await.unwrap();
        store
            .put(&instance_key("user-service", "10.0.0.5:9001"), "10.0.0.5:9001", Some(lease))
            .await
            .unwrap();
        store.revoke_lease(lease).await.unwrap();

        assert_eq!(rx.recv().await, Some(WatchEvent::Added("10.0.0.5:9001".into())));
        assert_eq!(rx.recv().await, Some(WatchEvent::Removed("10.0.0.5:9001".into())));

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_stop_ends_subscription() {
        let store = MemoryStore::new();
        let (handle, mut rx) = collecting_watch(&store).await;
        handle.stop().await;

        store
            .put(&instance_key("user-service", "10.0.0.5:9001"), "10.0.0.5:9001", None)
            .await
            .unwrap();
        // The callback (and its sender) was dropped with the pump.
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_resubscribes_after_stream_error() {
        let store = MemoryStore::new();
        let gate = Arc::new(tokio::sync::Notify::new());
        let first = Arc::new(std::sync::atomic::AtomicBool::new(true));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let watcher = Watcher::new(Arc::new(store.clone()), Duration::from_millis(10));
        let handle = {
            let gate = gate.clone();
            watcher
                .watch(service_prefix("user-service"), move |event| {
                    let tx = tx.clone();
                    let gate = gate.clone();
                    let first = first.clone();
                    async move {
                        if first.swap(false, std::sync::atomic::Ordering::SeqCst) {
                            gate.notified().await;
                        }
                        let _ = tx.send(event);
                    }
                })
                .await
                .unwrap()
        };

        // Hold the pump in its first callback while the event buffer overflows.
        store
            .put(&instance_key("user-service", "10.0.0.1:9000"), "10.0.0.1:9000", None)
            .await
            .unwrap();
        for i in 0..1100 {
            let address = format!("10.1.{}.{}:9000", i / 256, i % 256);
            store.put(&instance_key("order-service", &address), &address, None).await.unwrap();
        }

        // The first reconnect attempts hit an unavailable store.
        store.set_available(false);
        gate.notify_one();
        tokio::time::sleep(Duration::from_millis(50)).await;
        store.set_available(true);

        let mut seen = false;
        for _ in 0..50 {
            store
                .put(&instance_key("user-service", "10.0.0.2:9000"), "10.0.0.2:9000", None)
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            while let Ok(event) = rx.try_recv() {
                if event == WatchEvent::Added("10.0.0.2:9000".into()) {
                    seen = true;
                }
            }
            if seen {
                break;
            }
        }
        assert!(seen);
        assert!(!handle.is_finished());

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_initial_subscription_failure_is_reported() {
        let store = MemoryStore::new();
        store.set_available(false);
        let watcher = Watcher::new(Arc::new(store), Duration::from_millis(10));
        let result = watcher.watch("/services/user-service/", |_| async {}).await;
        assert!(result.is_err());
    }
}
