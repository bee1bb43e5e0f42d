//! Capacity broker subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound request
//!     → pool.rs (acquire: fast path scan, else race one wait per backend)
//!     → backend.rs (capacity counter: try_reserve / reserve)
//!     → lease.rs (RAII reservation handed to the relay)
//!     → Lease dropped or released → slot returned, one waiter woken
//! ```
//!
//! # Design Decisions
//! - Backends are fixed for the process lifetime; only the counters change
//! - The capacity counter is a semaphore; a lease owns exactly one permit
//! - The ranking scan holds a short lock and never spans an await
//! - No FIFO ordering across waiters on different backends

pub mod backend;
pub mod lease;
pub mod pool;

pub use backend::{Backend, BackendSnapshot};
pub use lease::Lease;
pub use pool::Pool;

/// Errors raised while building the pool. Always fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// No backends, or a zero per-backend concurrency limit.
    #[error("pool misconfigured: {0}")]
    Misconfigured(String),

    /// A backend URL that cannot be parsed or is not http(s).
    #[error("invalid backend url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Errors returned by [`Pool::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    /// The caller's cancel signal fired before a slot was obtained.
    #[error("acquisition cancelled")]
    Cancelled,

    /// The pool was closed at shutdown.
    #[error("backend pool is closed")]
    Closed,
}
