//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML) + CLI overrides
//!     → loader.rs (parse & deserialize, apply overrides)
//!     → validation.rs (semantic checks)
//!     → RouterConfig (validated, immutable)
//!     → Pool / Relay / HttpServer built from it once at startup
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; the backend list never changes at runtime
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, read_config, resolve_config, ConfigError, ConfigOverrides};
pub use schema::{
    CorsConfig, ListenerConfig, ObservabilityConfig, OllamaConfig, RouterConfig, UpstreamConfig,
};
pub use validation::{validate_config, ValidationError};
