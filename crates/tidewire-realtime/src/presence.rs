//! Presence state and diffs.
//!
//! The server sends presence as `{key: {metas: [{phx_ref, ...state}]}}`.
//! A key may carry several metas (one per connected device); the first
//! one is taken as the presence for that key.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};

use tidewire_common::RealtimeError;

/// One client's presence on a channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Presence {
    pub presence_ref: String,
    /// The tracked state with `phx_ref` removed.
    pub state: Map<String, Value>,
}

impl Presence {
    /// Decode the tracked state into a caller type.
    pub fn decode_state<T: DeserializeOwned>(&self) -> Result<T, RealtimeError> {
        serde_json::from_value(Value::Object(self.state.clone()))
            .map_err(|e| RealtimeError::Decode(format!("presence state: {e}")))
    }
}

/// Presences that joined and left in one server push.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresenceDiff {
    pub joins: HashMap<String, Presence>,
    pub leaves: HashMap<String, Presence>,
}

impl PresenceDiff {
    /// Decode a `presence_diff` payload.
    pub(crate) fn from_diff_payload(payload: &Value) -> Result<Self, RealtimeError> {
        #[derive(Deserialize)]
        struct Raw {
            #[serde(default)]
            joins: Map<String, Value>,
            #[serde(default)]
            leaves: Map<String, Value>,
        }

        let raw = Raw::deserialize(payload)
            .map_err(|e| RealtimeError::Decode(format!("presence_diff payload: {e}")))?;
        Ok(Self {
            joins: parse_presence_map(&raw.joins),
            leaves: parse_presence_map(&raw.leaves),
        })
    }

    /// Decode a `presence_state` payload; every entry counts as a join.
    pub(crate) fn from_state_payload(payload: &Value) -> Result<Self, RealtimeError> {
        let state = payload.as_object().ok_or_else(|| {
            RealtimeError::Decode("presence_state payload is not an object".into())
        })?;
        Ok(Self {
            joins: parse_presence_map(state),
            leaves: HashMap::new(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty() && self.leaves.is_empty()
    }
}

fn parse_presence_map(map: &Map<String, Value>) -> HashMap<String, Presence> {
    map.iter()
        .filter_map(|(key, entry)| {
            let meta = entry.get("metas")?.as_array()?.first()?.as_object()?;
            let mut state = meta.clone();
            let presence_ref = match state.remove("phx_ref") {
                Some(Value::String(r)) => r,
                Some(other) => other.to_string(),
                None => String::new(),
            };
            Some((key.clone(), Presence { presence_ref, state }))
        })
        .collect()
}

/// The presences currently known on a channel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresenceSet {
    entries: HashMap<String, Presence>,
}

impl PresenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Leaves are removed before joins are inserted, so a key that both
    /// leaves and joins in one diff ends up present with the joined state.
    pub fn apply(&mut self, diff: &PresenceDiff) {
        for key in diff.leaves.keys() {
            self.entries.remove(key);
        }
        for (key, presence) in &diff.joins {
            self.entries.insert(key.clone(), presence.clone());
        }
    }

    /// Replace everything with the joins of a full `presence_state`
    /// snapshot. Keys missing from the snapshot are gone.
    pub fn reset(&mut self, state: &PresenceDiff) {
        self.entries = state.joins.clone();
    }

    pub fn get(&self, key: &str) -> Option<&Presence> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Presence)> {
        self.entries.iter()
    }

    pub fn snapshot(&self) -> HashMap<String, Presence> {
        self.entries.clone()
    }
}
