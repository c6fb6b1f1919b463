//! Configuration schema types for tidewire.
//!
//! All structs use `serde(default)` so partial configs work correctly.

mod logging;
mod realtime;

pub use logging::*;
pub use realtime::*;

use serde::{Deserialize, Serialize};

/// Current config schema version.
pub const CONFIG_SCHEMA_VERSION: u32 = 1;

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TidewireConfig {
    pub realtime: RealtimeConfig,
    pub logging: LoggingConfig,
}
