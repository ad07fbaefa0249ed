//! Configuration for the Switchyard runtime.
//!
//! Layered loading (defaults, profile file, main file, environment,
//! programmatic overrides) is handled by [`ConfigLoader`]; the resulting
//! [`SwitchyardConfig`] is checked by [`validate_config`].

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    LogFormat, LogLevel, LogOutput, LogRotation, LoggingConfig, RuntimeConfig, SpanEventConfig,
    SwitchyardConfig,
};
pub use validation::validate_config;
