//! The `{topic, event, payload, ref}` message envelope.

use serde::{Deserialize, Serialize};

/// Topic used for connection-level messages such as heartbeats.
pub const PHOENIX_TOPIC: &str = "phoenix";

/// Prefix the server expects in front of every channel name.
pub const TOPIC_PREFIX: &str = "realtime:";

/// Event names used on the wire.
pub mod events {
    pub const JOIN: &str = "phx_join";
    pub const LEAVE: &str = "phx_leave";
    pub const REPLY: &str = "phx_reply";
    pub const CLOSE: &str = "phx_close";
    pub const ERROR: &str = "phx_error";
    pub const HEARTBEAT: &str = "heartbeat";
    pub const ACCESS_TOKEN: &str = "access_token";
    pub const SYSTEM: &str = "system";
    pub const BROADCAST: &str = "broadcast";
    pub const PRESENCE: &str = "presence";
    pub const PRESENCE_STATE: &str = "presence_state";
    pub const PRESENCE_DIFF: &str = "presence_diff";
    pub const POSTGRES_CHANGES: &str = "postgres_changes";
}

/// A Phoenix protocol message envelope (v1 JSON format).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(rename = "ref", default)]
    pub msg_ref: Option<String>,
}

impl Envelope {
    pub fn new(
        topic: impl Into<String>,
        event: impl Into<String>,
        payload: serde_json::Value,
        msg_ref: Option<u64>,
    ) -> Self {
        Self {
            topic: topic.into(),
            event: event.into(),
            payload,
            msg_ref: msg_ref.map(|r| r.to_string()),
        }
    }

    pub fn heartbeat(msg_ref: u64) -> Self {
        Self::new(
            PHOENIX_TOPIC,
            events::HEARTBEAT,
            serde_json::json!({}),
            Some(msg_ref),
        )
    }

    /// The correlation ref as a number, if present and numeric.
    pub fn ref_number(&self) -> Option<u64> {
        self.msg_ref.as_deref()?.parse().ok()
    }
}
