//! Types shared by every tidewire crate.

pub mod errors;

pub use errors::{ConfigError, RealtimeError, TidewireError};

pub type Result<T> = std::result::Result<T, TidewireError>;
