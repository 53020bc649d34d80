//! Discovery gateway library.
//!
//! Self-registration, dependency discovery and breaker-guarded dispatch
//! over a coordination store (etcd, or an in-process store for development).

pub mod backend;
pub mod config;
pub mod discovery;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod routing;
pub mod transport;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use http::HttpServer;
pub use lifecycle::{Gateway, Shutdown};
