//! Row-change events delivered for `postgres_changes` subscriptions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use tidewire_common::RealtimeError;

/// One row as a JSON object keyed by column name.
pub type Record = Map<String, Value>;

/// Kind of row change a filter can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
    Select,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Select => "SELECT",
        }
    }
}

impl std::str::FromStr for ChangeKind {
    type Err = RealtimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INSERT" => Ok(Self::Insert),
            "UPDATE" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            "SELECT" => Ok(Self::Select),
            other => Err(RealtimeError::Decode(format!("unknown change kind: {other}"))),
        }
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

/// A decoded row change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum ChangeEvent {
    Insert {
        schema: String,
        table: String,
        #[serde(default)]
        columns: Vec<Column>,
        commit_timestamp: DateTime<Utc>,
        record: Record,
    },
    Update {
        schema: String,
        table: String,
        #[serde(default)]
        columns: Vec<Column>,
        commit_timestamp: DateTime<Utc>,
        record: Record,
        #[serde(default)]
        old_record: Record,
    },
    Delete {
        schema: String,
        table: String,
        #[serde(default)]
        columns: Vec<Column>,
        commit_timestamp: DateTime<Utc>,
        old_record: Record,
    },
    Select {
        schema: String,
        table: String,
        #[serde(default)]
        columns: Vec<Column>,
        commit_timestamp: DateTime<Utc>,
        record: Record,
    },
}

impl ChangeEvent {
    pub fn kind(&self) -> ChangeKind {
        match self {
            Self::Insert { .. } => ChangeKind::Insert,
            Self::Update { .. } => ChangeKind::Update,
            Self::Delete { .. } => ChangeKind::Delete,
            Self::Select { .. } => ChangeKind::Select,
        }
    }

    pub fn schema(&self) -> &str {
        match self {
            Self::Insert { schema, .. }
            | Self::Update { schema, .. }
            | Self::Delete { schema, .. }
            | Self::Select { schema, .. } => schema,
        }
    }

    pub fn table(&self) -> &str {
        match self {
            Self::Insert { table, .. }
            | Self::Update { table, .. }
            | Self::Delete { table, .. }
            | Self::Select { table, .. } => table,
        }
    }

    pub fn columns(&self) -> &[Column] {
        match self {
            Self::Insert { columns, .. }
            | Self::Update { columns, .. }
            | Self::Delete { columns, .. }
            | Self::Select { columns, .. } => columns,
        }
    }

    pub fn commit_timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Insert {
                commit_timestamp, ..
            }
            | Self::Update {
                commit_timestamp, ..
            }
            | Self::Delete {
                commit_timestamp, ..
            }
            | Self::Select {
                commit_timestamp, ..
            } => *commit_timestamp,
        }
    }

    /// The new row; `None` for deletes.
    pub fn record(&self) -> Option<&Record> {
        match self {
            Self::Insert { record, .. }
            | Self::Update { record, .. }
            | Self::Select { record, .. } => Some(record),
            Self::Delete { .. } => None,
        }
    }

    /// The previous row for updates and deletes. Only primary key columns
    /// are present unless the table uses full replica identity.
    pub fn old_record(&self) -> Option<&Record> {
        match self {
            Self::Update { old_record, .. } | Self::Delete { old_record, .. } => Some(old_record),
            Self::Insert { .. } | Self::Select { .. } => None,
        }
    }
}

/// The `postgres_changes` push payload: the server filter ids the change
/// satisfied and the change itself.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChangeNotification {
    #[serde(default)]
    pub ids: Vec<u64>,
    #[serde(rename = "data")]
    pub event: ChangeEvent,
}

pub(crate) fn decode_change(payload: &Value) -> Result<ChangeNotification, RealtimeError> {
    ChangeNotification::deserialize(payload)
        .map_err(|e| RealtimeError::Decode(format!("postgres_changes payload: {e}")))
}
