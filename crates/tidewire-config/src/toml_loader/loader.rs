//! Core TOML config loading: read from path or platform default.

use crate::schema::TidewireConfig;
use crate::validation;
use std::path::Path;
use tidewire_common::ConfigError;
use tracing::{info, warn};

use super::paths::{create_default_config, default_config_path};

/// Load config from a specific TOML file path.
///
/// Missing keys fall back to serde defaults. A config that parses but
/// fails validation is returned anyway with a warning logged.
pub fn load_from_path(path: &Path) -> Result<TidewireConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::FileNotFound(path.to_path_buf())
        } else {
            ConfigError::ParseError(format!("failed to read {}: {e}", path.display()))
        }
    })?;

    let config: TidewireConfig = toml::from_str(&content)
        .map_err(|e| ConfigError::ParseError(format!("failed to parse TOML: {e}")))?;

    if let Err(e) = validation::validate(&config) {
        warn!("config validation warning: {e}");
    }

    info!("loaded config from {}", path.display());
    Ok(config)
}

/// Load config from the platform-specific default path.
///
/// On Linux: `~/.config/tidewire/config.toml`, unless `TIDEWIRE_CONFIG` is set.
///
/// If the file does not exist, creates a commented template and returns defaults.
pub fn load_default() -> Result<TidewireConfig, ConfigError> {
    let path = default_config_path()?;

    match load_from_path(&path) {
        Ok(config) => Ok(config),
        Err(ConfigError::FileNotFound(_)) => {
            info!("no config found at {}, creating default", path.display());
            create_default_config(&path)?;
            Ok(TidewireConfig::default())
        }
        Err(e) => Err(e),
    }
}
