//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! POST /api/{service}/{method}
//!     → table.rs (service name → Router, or UnknownService)
//!     → router.rs (checkout connection, call under deadline)
//!     → RpcReply | GatewayError
//! ```
//!
//! # Design Decisions
//! - Table built once at startup, immutable at runtime
//! - One router per dependency; dependencies share nothing but the store
//! - Exactly one attempt per inbound call

pub mod router;
pub mod table;

pub use router::Router;
pub use table::{DependencyStatus, DependencyTable};
