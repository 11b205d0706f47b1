// Tier store: one ordered collection of records per tier.
// Writes go through a bulk scope; dropping a scope without `end()` discards it.

pub mod aggregation;
mod memory;
pub mod retention;
mod sqlite;

pub use memory::MemoryTierStore;
pub use sqlite::SqliteTierStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::ops::Bound;
use std::sync::Arc;

use crate::models::TierRecord;
use crate::tier::Tier;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt {tier} record: {reason}")]
    Corrupt { tier: Tier, reason: String },
    #[error("store lock poisoned")]
    LockPoisoned,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Timestamp bounds plus an optional field name.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordFilter {
    pub start: Bound<DateTime<Utc>>,
    pub end: Bound<DateTime<Utc>>,
    pub field_name: Option<String>,
}

impl RecordFilter {
    /// `[from, to)`
    pub fn half_open(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            start: Bound::Included(from),
            end: Bound::Excluded(to),
            field_name: None,
        }
    }

    /// `[from, to]`
    pub fn closed(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            start: Bound::Included(from),
            end: Bound::Included(to),
            field_name: None,
        }
    }

    /// Everything strictly older than `cutoff`.
    pub fn older_than(cutoff: DateTime<Utc>) -> Self {
        Self {
            start: Bound::Unbounded,
            end: Bound::Excluded(cutoff),
            field_name: None,
        }
    }

    pub fn for_field(mut self, field_name: Option<String>) -> Self {
        self.field_name = field_name;
        self
    }

    pub fn matches(&self, record: &TierRecord) -> bool {
        let ts = record.timestamp();
        let after_start = match self.start {
            Bound::Included(s) => ts >= s,
            Bound::Excluded(s) => ts > s,
            Bound::Unbounded => true,
        };
        let before_end = match self.end {
            Bound::Included(e) => ts <= e,
            Bound::Excluded(e) => ts < e,
            Bound::Unbounded => true,
        };
        let field_ok = self
            .field_name
            .as_deref()
            .is_none_or(|f| f == record.field_name());
        after_start && before_end && field_ok
    }
}

/// Result order by timestamp (ties by field name).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// A scoped write boundary. Reads inside the scope see its own pending writes.
#[async_trait]
pub trait BulkScope: Send {
    async fn find(
        &mut self,
        tier: Tier,
        filter: &RecordFilter,
        order: SortOrder,
    ) -> Result<Vec<TierRecord>, StoreError>;

    async fn insert(&mut self, tier: Tier, records: &[TierRecord]) -> Result<(), StoreError>;

    /// Deletes matching records, returns how many were removed.
    async fn find_delete(&mut self, tier: Tier, filter: &RecordFilter) -> Result<u64, StoreError>;

    /// Makes the scope's writes durable and releases it.
    async fn end(self: Box<Self>) -> Result<(), StoreError>;
}

#[async_trait]
pub trait TierStore: Send + Sync {
    async fn find(
        &self,
        tier: Tier,
        filter: &RecordFilter,
        order: SortOrder,
    ) -> Result<Vec<TierRecord>, StoreError>;

    /// Opens a bulk scope. Only one scope is open at a time; others wait.
    async fn start_bulk(&self) -> Result<Box<dyn BulkScope + '_>, StoreError>;

    /// Reclaims space after pruning. No-op for stores that do not need it.
    async fn vacuum(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

pub type SharedStore = Arc<dyn TierStore>;
