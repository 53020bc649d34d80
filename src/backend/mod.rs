//! Per-dependency connection management.
//!
//! # Data Flow
//! ```text
//! Router::dispatch
//!     → cache.rs fast path (shared lock, healthy handle)
//!     → cache.rs slow path (exclusive lock)
//!         → CircuitBreaker::can_execute
//!         → Discoverer::discover_service (if no address cached)
//!         → Connector::connect (connect deadline)
//!
//! Watcher events
//!     → cache.rs apply_watch_event (Removed clears, Added fills gaps)
//! ```

pub mod cache;

pub use cache::{CacheEntry, CacheSnapshot, CachedConnection, ConnectionCache};
