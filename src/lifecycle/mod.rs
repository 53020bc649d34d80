//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Store → Dependencies + watches → Bind → Register (fatal) → Serve
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Deregister → Stop accepting → Drain → Stop watches
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: store first, listeners last
//! - Shutdown has timeout: forced exit after the drain deadline

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::wait_for_signal;
pub use startup::{connect_store, Gateway, StartupError};
