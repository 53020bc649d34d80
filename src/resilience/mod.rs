//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to a dependency:
//!     → circuit_breaker.rs (fail fast while open)
//!     → timeouts.rs (bounded dial / bounded call)
//!     → outcome fed back to circuit_breaker.rs
//!
//! Coordination store connects and re-registration:
//!     → backoff.rs (jittered exponential delay between attempts)
//! ```
//!
//! # Design Decisions
//! - Every external call has a deadline
//! - Downstream calls are never retried here; failures feed the breaker
//! - Circuit breaker prevents cascading failures

pub mod backoff;
pub mod circuit_breaker;
pub mod timeouts;

pub use backoff::{calculate_backoff, Backoff};
pub use circuit_breaker::{BreakerState, CircuitBreaker, CircuitState};
pub use timeouts::{with_deadline, DeadlineError};
