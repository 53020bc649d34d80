//! Service discovery subsystem.
//!
//! # Data Flow
//! ```text
//! Process start:
//!     → registrar.rs (lease + key, background renewal)
//!     → watcher.rs (prefix subscription per dependency)
//!
//! Cache miss on the call path:
//!     → discoverer.rs (prefix scan → first non-empty address)
//!
//! All of them talk to one explicit store handle:
//!     → store.rs (trait) → memory.rs | etcd.rs
//! ```
//!
//! # Key Schema
//! `/services/{service}/{address}` → `address`, see [`keys`].

pub mod discoverer;
#[cfg(feature = "etcd")]
pub mod etcd;
pub mod keys;
pub mod memory;
pub mod registrar;
pub mod store;
pub mod watcher;

pub use discoverer::Discoverer;
#[cfg(feature = "etcd")]
pub use etcd::EtcdStore;
pub use keys::{address_from_key, instance_key, service_prefix};
pub use memory::MemoryStore;
pub use registrar::{Registrar, RegistrationError, ServiceInstance};
pub use store::{CoordinationStore, KeyValue, LeaseId, RawEvent, RawEventKind, StoreError};
pub use watcher::{WatchEvent, WatchHandle, Watcher};
