//! Seam to the row-store query builder used to seed list feeds.

use async_trait::async_trait;

use tidewire_common::RealtimeError;

use crate::change::Record;
use crate::protocol::ChangeFilter;

pub type Row = Record;

/// Loads the current rows a change filter covers.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Every row in `filter.schema`/`filter.table` satisfying `filter.predicate`.
    async fn select_all(&self, filter: &ChangeFilter) -> Result<Vec<Row>, RealtimeError>;
}
