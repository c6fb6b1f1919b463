//! Commented template written when no config file exists yet.

pub(crate) fn default_config_toml() -> String {
    r#"# tidewire configuration
# Every key is optional; the values below are the defaults.

[realtime]
# Project base URL. http:// maps to ws://, https:// maps to wss://.
url = ""
# Publishable API key.
api_key = ""
# websocket_url = "wss://abc.example.co/realtime/v1/websocket"
# secure = true
# access_token = ""
heartbeat_interval_ms = 15000
reconnect_delay_ms = 7000
connect_timeout_ms = 10000
connect_on_subscribe = true
disconnect_on_no_subscriptions = true
disconnect_on_session_loss = true

[logging]
# One of: trace, debug, info, warn, error
level = "info"
log_frames = false
"#
    .to_string()
}
