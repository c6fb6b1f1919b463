//! Full configuration validation.
//!
//! Each section has its own submodule; this orchestrator calls them all
//! and collects errors into a single `ConfigError`.

mod helpers;
mod realtime;


use crate::schema::TidewireConfig;
use tidewire_common::ConfigError;

/// Run all validations on a config, collecting all errors.
pub fn validate(config: &TidewireConfig) -> Result<(), ConfigError> {
    let mut errors: Vec<String> = Vec::new();

    realtime::validate_endpoint(&mut errors, config);
    realtime::validate_timing(&mut errors, config);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(errors.join("; ")))
    }
}
