//! Maps an inbound envelope on a channel topic to the action it implies.

use serde_json::Value;

use tidewire_common::RealtimeError;

use crate::change::{decode_change, ChangeNotification};
use crate::presence::PresenceDiff;
use crate::protocol::{events, Envelope};

const TOKEN_EXPIRED_MARKER: &str = "access token has expired";

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ChannelAction {
    /// `phx_reply` to a join, leave, or push.
    Reply { ok: bool, response: Value },
    /// `system` status message from a server extension.
    System { ok: bool, message: String },
    /// The server rejected the token the channel joined with.
    TokenExpired { message: String },
    Closed,
    Errored { reason: String },
    Change(ChangeNotification),
    Broadcast { event: String, payload: Value },
    /// Full presence snapshot, sent after every join.
    PresenceState(PresenceDiff),
    Presence(PresenceDiff),
}

/// `Ok(None)` for events the client does not act on.
pub(crate) fn resolve(envelope: &Envelope) -> Result<Option<ChannelAction>, RealtimeError> {
    let payload = &envelope.payload;
    let action = match envelope.event.as_str() {
        events::REPLY => ChannelAction::Reply {
            ok: status_is_ok(payload),
            response: payload.get("response").cloned().unwrap_or(Value::Null),
        },
        events::SYSTEM => {
            let message = str_field(payload, "message");
            if message.to_ascii_lowercase().contains(TOKEN_EXPIRED_MARKER) {
                ChannelAction::TokenExpired { message }
            } else {
                ChannelAction::System {
                    ok: status_is_ok(payload),
                    message,
                }
            }
        }
        events::CLOSE => ChannelAction::Closed,
        events::ERROR => ChannelAction::Errored {
            reason: payload
                .get("reason")
                .and_then(Value::as_str)
                .map(str::to_owned)
                .unwrap_or_else(|| payload.to_string()),
        },
        events::POSTGRES_CHANGES => ChannelAction::Change(decode_change(payload)?),
        events::BROADCAST => {
            let event = payload
                .get("event")
                .and_then(Value::as_str)
                .ok_or_else(|| RealtimeError::Decode("broadcast without event".into()))?;
            ChannelAction::Broadcast {
                event: event.to_owned(),
                payload: payload.get("payload").cloned().unwrap_or(Value::Null),
            }
        }
        events::PRESENCE_STATE => {
            ChannelAction::PresenceState(PresenceDiff::from_state_payload(payload)?)
        }
        events::PRESENCE_DIFF => ChannelAction::Presence(PresenceDiff::from_diff_payload(payload)?),
        _ => return Ok(None),
    };
    Ok(Some(action))
}

fn status_is_ok(payload: &Value) -> bool {
    payload.get("status").and_then(Value::as_str) == Some("ok")
}

fn str_field(payload: &Value, key: &str) -> String {
    payload
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}
