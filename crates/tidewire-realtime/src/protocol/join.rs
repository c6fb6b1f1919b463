//! Join payload and row-change filters.

use serde::{Deserialize, Serialize};

use crate::change::ChangeKind;

/// Event value that subscribes a filter to every change kind.
pub const WILDCARD_EVENT: &str = "*";

/// A row-change subscription sent in the join payload.
///
/// The server echoes accepted filters back with an `id`, and change pushes
/// name the ids they satisfy. Use [`ChangeFilter::matches`] to map those
/// server filters back onto locally registered ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeFilter {
    pub schema: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(rename = "filter", default, skip_serializing_if = "Option::is_none")]
    pub predicate: Option<String>,
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
}

impl ChangeFilter {
    /// Every change kind on every table of `schema`.
    pub fn new(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: None,
            predicate: None,
            event: WILDCARD_EVENT.to_string(),
            id: None,
        }
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Server-side row predicate, e.g. `id=eq.42`.
    pub fn predicate(mut self, predicate: impl Into<String>) -> Self {
        self.predicate = Some(predicate.into());
        self
    }

    /// Restrict to one change kind.
    pub fn on(mut self, kind: ChangeKind) -> Self {
        self.event = kind.as_str().to_string();
        self
    }

    pub fn is_wildcard(&self) -> bool {
        self.event == WILDCARD_EVENT
    }

    /// Lookup equality between this registered filter and one the server
    /// acknowledged.
    ///
    /// Asymmetric: a wildcard event here matches any event there, never the
    /// other way round. `id` is compared only when this filter carries one.
    pub fn matches(&self, acknowledged: &ChangeFilter) -> bool {
        self.schema == acknowledged.schema
            && self.table == acknowledged.table
            && self.predicate == acknowledged.predicate
            && (self.is_wildcard() || self.event == acknowledged.event)
            && self.id.map_or(true, |id| acknowledged.id == Some(id))
    }

    /// Whether a change of `kind` should reach callbacks registered with this filter.
    pub fn accepts(&self, kind: ChangeKind) -> bool {
        self.is_wildcard() || self.event.eq_ignore_ascii_case(kind.as_str())
    }
}

/// Broadcast settings for a channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastJoinConfig {
    /// Whether broadcasts are acknowledged by the server.
    pub ack: bool,
    /// Whether to receive your own broadcasts.
    #[serde(rename = "self")]
    pub receive_own: bool,
}

/// Presence settings for a channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceJoinConfig {
    /// The key used to identify this client in presence state.
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JoinConfig {
    pub broadcast: BroadcastJoinConfig,
    pub presence: PresenceJoinConfig,
    pub postgres_changes: Vec<ChangeFilter>,
    pub private: bool,
}

/// Payload of a `phx_join` envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JoinPayload {
    pub config: JoinConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

impl JoinPayload {
    pub(crate) fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({}))
    }
}
