//! Phoenix Channels v1 wire types: the message envelope and the join payload.

mod envelope;
mod join;

pub use envelope::{events, Envelope, PHOENIX_TOPIC, TOPIC_PREFIX};
pub use join::{
    BroadcastJoinConfig, ChangeFilter, JoinConfig, JoinPayload, PresenceJoinConfig, WILDCARD_EVENT,
};
