use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("config parse error: {0}")]
    ParseError(String),

    #[error("config validation error: {0}")]
    ValidationError(String),
}

/// Errors returned by the realtime client and its channels.
///
/// Transport failures and heartbeat timeouts are recovered internally by
/// reconnecting, so they only show up here when a caller explicitly asks
/// for something that needs the socket.
#[derive(Debug, thiserror::Error)]
pub enum RealtimeError {
    #[error("not connected to the realtime server")]
    NotConnected,

    #[error("realtime client has been closed")]
    ClientClosed,

    #[error("channel {topic} is not subscribed")]
    NotSubscribed { topic: String },

    #[error("channel {topic} was removed from the client")]
    ChannelRemoved { topic: String },

    #[error("cannot register change filters on {topic} after it has joined")]
    FilterAfterJoin { topic: String },

    #[error("join rejected for {topic}: {reason}")]
    JoinRejected { topic: String, reason: String },

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("access token has expired")]
    TokenExpired,

    #[error("invalid access token: {0}")]
    InvalidToken(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("snapshot error: {0}")]
    Snapshot(String),

    #[error("operation cancelled")]
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum TidewireError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Realtime(#[from] RealtimeError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}
