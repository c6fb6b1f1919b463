//! Realtime connection configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for connecting to a realtime server.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Project base URL, e.g. `https://abc.example.co` or `http://localhost:54321`.
    pub url: String,
    /// Publishable API key sent as `apikey` on every request.
    pub api_key: String,
    /// Full WebSocket URL; overrides the one derived from `url`.
    pub websocket_url: Option<String>,
    /// Force `wss`/`https` (`true`) or `ws`/`http` (`false`) regardless of `url`.
    pub secure: Option<bool>,
    /// Static access token (JWT) used when no auth session supplies one.
    pub access_token: Option<String>,
    /// Heartbeat interval in milliseconds (default: 15000).
    pub heartbeat_interval_ms: u64,
    /// Fixed delay before every reconnect attempt in milliseconds (default: 7000).
    pub reconnect_delay_ms: u64,
    /// Socket open timeout in milliseconds (default: 10000).
    pub connect_timeout_ms: u64,
    /// Connect automatically when a channel subscribes while disconnected.
    pub connect_on_subscribe: bool,
    /// Disconnect once the last channel has been removed.
    pub disconnect_on_no_subscriptions: bool,
    /// Disconnect when the auth session reports the user signed out.
    pub disconnect_on_session_loss: bool,
}

impl std::fmt::Debug for RealtimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeConfig")
            .field("url", &self.url)
            .field("api_key", &"[REDACTED]")
            .field("websocket_url", &self.websocket_url)
            .field("secure", &self.secure)
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("heartbeat_interval_ms", &self.heartbeat_interval_ms)
            .field("reconnect_delay_ms", &self.reconnect_delay_ms)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("connect_on_subscribe", &self.connect_on_subscribe)
            .field(
                "disconnect_on_no_subscriptions",
                &self.disconnect_on_no_subscriptions,
            )
            .field("disconnect_on_session_loss", &self.disconnect_on_session_loss)
            .finish()
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            websocket_url: None,
            secure: None,
            access_token: None,
            heartbeat_interval_ms: 15_000,
            reconnect_delay_ms: 7_000,
            connect_timeout_ms: 10_000,
            connect_on_subscribe: true,
            disconnect_on_no_subscriptions: true,
            disconnect_on_session_loss: true,
        }
    }
}

impl RealtimeConfig {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
