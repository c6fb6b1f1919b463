//! Where the config file lives, and writing the starter file there.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tidewire_common::ConfigError;
use tracing::{debug, info};

use super::template::default_config_toml;

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "TIDEWIRE_CONFIG";

/// `$TIDEWIRE_CONFIG` when set, else `<config dir>/tidewire/config.toml`.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    resolve_config_path(std::env::var_os(CONFIG_PATH_ENV), dirs::config_dir())
}

pub(crate) fn resolve_config_path(
    explicit: Option<OsString>,
    config_dir: Option<PathBuf>,
) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit.filter(|p| !p.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    let base = config_dir.ok_or_else(|| {
        ConfigError::ParseError(format!(
            "no platform config directory; set {CONFIG_PATH_ENV}"
        ))
    })?;
    Ok(base.join("tidewire").join("config.toml"))
}

/// Write the commented starter config to `path`.
///
/// An existing file is left alone. The template goes to a sibling temp
/// file first and is renamed into place.
pub fn create_default_config(path: &Path) -> Result<(), ConfigError> {
    if path.exists() {
        debug!(path = %path.display(), "config already present, not overwriting");
        return Ok(());
    }
    let io_err = |what: &str, target: &Path, e: std::io::Error| {
        ConfigError::ParseError(format!("failed to {what} {}: {e}", target.display()))
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| io_err("create config directory", parent, e))?;
    }

    let staging = path.with_extension("toml.tmp");
    std::fs::write(&staging, default_config_toml())
        .map_err(|e| io_err("write", &staging, e))?;
    std::fs::rename(&staging, path).map_err(|e| {
        let _ = std::fs::remove_file(&staging);
        io_err("move config into", path, e)
    })?;

    info!(path = %path.display(), "created default config");
    Ok(())
}
