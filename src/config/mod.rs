//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! defaults
//!     → loader.rs (optional TOML file)
//!     → loader.rs (GATEWAY_* / GROUPWARE_* environment)
//!     → command line flags (main.rs)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → shared via Arc to the server and plugins
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{apply_env, load_config, load_file, ConfigError};
pub use schema::{
    GatewayConfig, GroupwareConfig, ListenerConfig, ObservabilityConfig, OidcConfig, PluginSelection,
    PluginsConfig, TimeoutConfig,
};
pub use validation::{validate_config, ValidationError};
