//! Ollama request router library.
//!
//! Fronts a fixed pool of inference servers, leases one concurrency slot per
//! request on the least-loaded server, and streams the response back.

pub mod broker;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod relay;

pub use broker::{Lease, Pool};
pub use config::RouterConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use relay::Relay;
