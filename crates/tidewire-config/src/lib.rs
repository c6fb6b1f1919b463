//! Tidewire configuration system.
//!
//! TOML-based configuration for the realtime client and the CLI. Every
//! section uses serde defaults so a file only needs the keys it changes,
//! typically just `realtime.url` and `realtime.api_key`.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use tidewire_config::load_config;
//!
//! let config = load_config().expect("failed to load config");
//! println!("{}", config.realtime.url);
//! ```

pub mod schema;
pub mod toml_loader;
pub mod validation;

pub use schema::{LogLevel, LoggingConfig, RealtimeConfig, TidewireConfig, CONFIG_SCHEMA_VERSION};
pub use toml_loader::{
    create_default_config, default_config_path, load_default, load_from_path, CONFIG_PATH_ENV,
};

use tidewire_common::ConfigError;

/// Load config from the platform default path and validate it.
///
/// Unlike [`load_from_path`], which only warns about invalid values, this
/// rejects a config that would not produce a working client.
pub fn load_config() -> Result<TidewireConfig, ConfigError> {
    let config = toml_loader::load_default()?;
    validation::validate(&config)?;
    Ok(config)
}

/// Serialize a config back to TOML.
pub fn config_to_toml(config: &TidewireConfig) -> Result<String, ConfigError> {
    toml::to_string_pretty(config)
        .map_err(|e| ConfigError::ParseError(format!("failed to serialize config: {e}")))
}
