//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Load config → Validate → Build pool → Bind listener → Serve
//!
//! Shutdown (shutdown.rs):
//!     Signal received → root token cancelled
//!         → pending acquisitions and copy loops cancelled
//!         → server drains → pool closed → exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
