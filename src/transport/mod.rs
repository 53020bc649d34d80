//! Outbound transport to dependencies.
//!
//! # Data Flow
//! ```text
//! ConnectionCache miss
//!     → Connector::connect(address)       (h2.rs: TCP + HTTP/2 handshake)
//!     → Connection handle stored in cache
//!
//! Router::dispatch
//!     → Connection::call(RpcCall)         (POST /{method}, JSON, 4 MiB cap)
//!     → RpcReply | TransportError
//! ```

pub mod connection;
pub mod h2;
#[cfg(test)]
pub(crate) mod mock;

pub use connection::{Connection, Connector, RpcCall, RpcReply, TransportError};
pub use h2::{H2Connection, H2Connector, H2Settings};
