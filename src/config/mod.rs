//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML) + environment
//!     → loader.rs (parse, apply env overrides)
//!     → validation.rs (semantic checks)
//!     → loader.rs (resolve webhook secrets from env)
//!     → GuardConfig (validated, immutable)
//!     → SecurityGateway::from_config at process start
//! ```
//!
//! # Design Decisions
//! - Loaded once; request traffic can never change it
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Secrets come only from the environment and are never serialized

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    ChannelConfig, EvictionConfig, FieldConfig, FormConfig, GuardConfig, ListenerConfig,
    LogFormat, ObservabilityConfig, WebhookConfig,
};
pub use validation::{validate_config, ValidationError};
