//! etcd v3 coordination store.
//!
//! Handles connection (with backoff), leases, keep-alive streams and
//! prefix watches against a real etcd cluster.

use async_trait::async_trait;
use etcd_client::{
    Client, EventType, GetOptions, LeaseKeepAliveStream, LeaseKeeper, PutOptions, WatchOptions,
};
use futures_util::StreamExt;
use tokio::sync::mpsc;

use crate::config::StoreConfig;
use crate::discovery::store::{
    CoordinationStore, KeyValue, LeaseId, LeaseRenewer, RawEvent, StoreError, StoreResult,
    WatchStream,
};
use crate::resilience::Backoff;

const WATCH_BUFFER: usize = 256;

impl From<etcd_client::Error> for StoreError {
    fn from(err: etcd_client::Error) -> Self {
        match err {
            etcd_client::Error::TransportError(e) => StoreError::Unavailable(e.to_string()),
            etcd_client::Error::IoError(e) => StoreError::Unavailable(e.to_string()),
            other => StoreError::Backend(other.to_string()),
        }
    }
}

/// etcd-backed [`CoordinationStore`].
#[derive(Clone)]
pub struct EtcdStore {
    client: Client,
}

impl EtcdStore {
    /// Connect with jittered exponential backoff.
    pub async fn connect(config: &StoreConfig) -> StoreResult<Self> {
        let mut backoff = Backoff::new(config.connect_base_delay_ms, config.connect_max_delay_ms);

        loop {
            match Client::connect(&config.endpoints, None).await {
                Ok(client) => {
                    tracing::info!(endpoints = ?config.endpoints, "Connected to etcd");
                    return Ok(Self { client });
                }
                Err(e) if backoff.attempts() + 1 < config.connect_attempts => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        error = %e,
                        attempt = backoff.attempts(),
                        delay = ?delay,
                        "etcd connection failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "etcd connection failed, giving up");
                    return Err(e.into());
                }
            }
        }
    }
}

impl std::fmt::Debug for EtcdStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EtcdStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl CoordinationStore for EtcdStore {
    async fn grant_lease(&self, ttl_secs: i64) -> StoreResult<LeaseId> {
        let resp = self.client.clone().lease_grant(ttl_secs, None).await?;
        tracing::debug!(lease_id = resp.id(), ttl = resp.ttl(), "Lease granted");
        Ok(resp.id())
    }

    async fn keep_alive(&self, lease: LeaseId) -> StoreResult<Box<dyn LeaseRenewer>> {
        let (keeper, stream) = self.client.clone().lease_keep_alive(lease).await?;
        Ok(Box::new(EtcdRenewer { keeper, stream }))
    }

    async fn revoke_lease(&self, lease: LeaseId) -> StoreResult<()> {
        self.client.clone().lease_revoke(lease).await?;
        Ok(())
    }

    async fn put(&self, key: &str, value: &str, lease: Option<LeaseId>) -> StoreResult<()> {
        let options = lease.map(|id| PutOptions::new().with_lease(id));
        self.client.clone().put(key, value, options).await?;
        Ok(())
    }

    async fn get_prefix(&self, prefix: &str) -> StoreResult<Vec<KeyValue>> {
        let resp = self
            .client
            .clone()
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await?;

        resp.kvs()
            .iter()
            .map(|kv| -> StoreResult<KeyValue> {
                Ok(KeyValue {
                    key: kv.key_str()?.to_string(),
                    value: kv.value_str()?.to_string(),
                })
            })
            .collect()
    }

    async fn watch_prefix(&self, prefix: &str) -> StoreResult<WatchStream> {
        let mut stream = self
            .client
            .clone()
            .watch(prefix, Some(WatchOptions::new().with_prefix()))
            .await?;
        let (tx, rx) = mpsc::channel::<StoreResult<RawEvent>>(WATCH_BUFFER);
        let prefix = prefix.to_string();

        // The etcd stream is dropped (and the watch cancelled) when the
        // consumer drops its end.
        tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    _ = tx.closed() => break,
                    message = stream.message() => message,
                };

                let resp = match message {
                    Ok(Some(resp)) => resp,
                    Ok(None) => {
                        let _ = tx.send(Err(StoreError::WatchClosed("stream ended".into()))).await;
                        break;
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e.into())).await;
                        break;
                    }
                };

                if resp.canceled() {
                    tracing::warn!(prefix = %prefix, "etcd watch canceled");
                    let _ = tx.send(Err(StoreError::WatchClosed("canceled by server".into()))).await;
                    break;
                }

                for event in resp.events() {
                    let Some(kv) = event.kv() else { continue };
                    let raw = match (event.event_type(), kv.key_str()) {
                        (EventType::Put, Ok(key)) => match kv.value_str() {
                            Ok(value) => RawEvent::put(key, value),
                            Err(e) => {
                                tracing::warn!(key = %key, error = %e, "Non-UTF-8 value in watch event");
                                continue;
                            }
                        },
                        (EventType::Delete, Ok(key)) => RawEvent::delete(key),
                        (_, Err(e)) => {
                            tracing::warn!(error = %e, "Non-UTF-8 key in watch event");
                            continue;
                        }
                    };
                    if tx.send(Ok(raw)).await.is_err() {
                        return;
                    }
                }
            }
        });

        let events = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(events.boxed())
    }
}

struct EtcdRenewer {
    keeper: LeaseKeeper,
    stream: LeaseKeepAliveStream,
}

#[async_trait]
impl LeaseRenewer for EtcdRenewer {
    async fn renew(&mut self) -> StoreResult<Option<i64>> {
        self.keeper.keep_alive().await?;
        match self.stream.message().await? {
            Some(resp) if resp.ttl() > 0 => Ok(Some(resp.ttl())),
            _ => Ok(None),
        }
    }
}
