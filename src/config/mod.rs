//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! tunnel.toml
//!     → environment.rs (base document, then one overlay per active profile)
//!     → environment.rs bind (merged tables → TunnelConfig)
//!     → validation.rs (semantic checks)
//!     → TunnelConfig (validated, immutable)
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod environment;
pub mod loader;
pub mod schema;
pub mod validation;

pub use environment::{
    ConfigDataLoader, ConfigEnvironment, ConfigSourceListener, FileSystemResourceLoader,
    PropertySource, ResourceLoader,
};
pub use loader::{load_config, ConfigError};
pub use schema::{
    ClientConfig, JwtConfig, ObservabilityConfig, SecurityConfig, ServerConfig, TunnelConfig,
};
pub use validation::{validate_config, ValidationError};
