//! A row list kept in sync with a table: seeded from a snapshot, then
//! patched by every change that arrives on the channel.

use std::pin::Pin;
use std::sync::Arc;

use futures_util::{stream, Stream, StreamExt};
use serde_json::Value;

use tidewire_common::RealtimeError;

use super::stream::ChangeFeed;
use crate::change::ChangeEvent;
use crate::protocol::ChangeFilter;
use crate::snapshot::{Row, SnapshotSource};

/// Yields the full row list once seeded and again after every change.
pub type ListFeed = Pin<Box<dyn Stream<Item = Result<Vec<Row>, RealtimeError>> + Send>>;

enum State {
    Seed {
        changes: ChangeFeed,
        source: Arc<dyn SnapshotSource>,
        filter: ChangeFilter,
        primary_key: Vec<String>,
    },
    Live {
        changes: ChangeFeed,
        rows: Vec<Row>,
        primary_key: Vec<String>,
    },
    Done,
}

pub(crate) fn list_feed(
    mut changes: ChangeFeed,
    filter: ChangeFilter,
    primary_key: Vec<String>,
    source: Arc<dyn SnapshotSource>,
) -> ListFeed {
    // Changes that land while the snapshot loads are applied on top of it.
    changes.activate();
    let seed = State::Seed {
        changes,
        source,
        filter,
        primary_key,
    };

    Box::pin(stream::unfold(seed, |state| async move {
        match state {
            State::Seed {
                changes,
                source,
                filter,
                primary_key,
            } => match source.select_all(&filter).await {
                Ok(rows) => Some((
                    Ok(rows.clone()),
                    State::Live {
                        changes,
                        rows,
                        primary_key,
                    },
                )),
                Err(e) => Some((Err(e), State::Done)),
            },
            State::Live {
                mut changes,
                mut rows,
                primary_key,
            } => {
                let event = changes.next().await?;
                apply_change(&mut rows, &primary_key, &event);
                Some((
                    Ok(rows.clone()),
                    State::Live {
                        changes,
                        rows,
                        primary_key,
                    },
                ))
            }
            State::Done => None,
        }
    }))
}

fn key_of(row: &Row, primary_key: &[String]) -> Option<Vec<Value>> {
    primary_key.iter().map(|col| row.get(col).cloned()).collect()
}

fn position(rows: &[Row], primary_key: &[String], key: &[Value]) -> Option<usize> {
    rows.iter()
        .position(|row| key_of(row, primary_key).as_deref() == Some(key))
}

fn upsert(rows: &mut Vec<Row>, primary_key: &[String], key: Option<Vec<Value>>, row: &Row) {
    match key.and_then(|k| position(rows, primary_key, &k)) {
        Some(i) => rows[i] = row.clone(),
        None => rows.push(row.clone()),
    }
}

pub(crate) fn apply_change(rows: &mut Vec<Row>, primary_key: &[String], event: &ChangeEvent) {
    match event {
        ChangeEvent::Insert { record, .. } | ChangeEvent::Select { record, .. } => {
            upsert(rows, primary_key, key_of(record, primary_key), record);
        }
        ChangeEvent::Update {
            record, old_record, ..
        } => {
            // The primary key itself may have changed.
            let key = key_of(old_record, primary_key).or_else(|| key_of(record, primary_key));
            upsert(rows, primary_key, key, record);
        }
        ChangeEvent::Delete { old_record, .. } => {
            if let Some(i) = key_of(old_record, primary_key)
                .and_then(|k| position(rows, primary_key, &k))
            {
                rows.remove(i);
            }
        }
    }
}
