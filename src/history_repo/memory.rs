// In-memory tier store. A bulk scope works on a staged copy of all tiers and
// swaps it in on `end()`; dropping the scope discards the copy.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{BulkScope, RecordFilter, SortOrder, StoreError, TierStore};
use crate::models::TierRecord;
use crate::tier::Tier;

type Tiers = BTreeMap<Tier, Vec<TierRecord>>;

#[derive(Default)]
pub struct MemoryTierStore {
    tiers: Arc<RwLock<Tiers>>,
    bulk_lock: Arc<Mutex<()>>,
}

impl MemoryTierStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records held in `tier`.
    pub fn len(&self, tier: Tier) -> Result<usize, StoreError> {
        let tiers = self.tiers.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(tiers.get(&tier).map_or(0, Vec::len))
    }
}

fn select(tiers: &Tiers, tier: Tier, filter: &RecordFilter, order: SortOrder) -> Vec<TierRecord> {
    let mut out: Vec<TierRecord> = tiers
        .get(&tier)
        .map(|records| {
            records
                .iter()
                .filter(|r| filter.matches(r))
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    out.sort_by(|a, b| {
        a.timestamp()
            .cmp(&b.timestamp())
            .then_with(|| a.field_name().cmp(b.field_name()))
    });
    if order == SortOrder::Descending {
        out.reverse();
    }
    out
}

#[async_trait]
impl TierStore for MemoryTierStore {
    async fn find(
        &self,
        tier: Tier,
        filter: &RecordFilter,
        order: SortOrder,
    ) -> Result<Vec<TierRecord>, StoreError> {
        let tiers = self.tiers.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(select(&tiers, tier, filter, order))
    }

    async fn start_bulk(&self) -> Result<Box<dyn BulkScope + '_>, StoreError> {
        let guard = self.bulk_lock.clone().lock_owned().await;
        let staged = self
            .tiers
            .read()
            .map_err(|_| StoreError::LockPoisoned)?
            .clone();
        Ok(Box::new(MemoryBulk {
            target: self.tiers.clone(),
            staged,
            _guard: guard,
        }))
    }
}

struct MemoryBulk {
    target: Arc<RwLock<Tiers>>,
    staged: Tiers,
    _guard: OwnedMutexGuard<()>,
}

#[async_trait]
impl BulkScope for MemoryBulk {
    async fn find(
        &mut self,
        tier: Tier,
        filter: &RecordFilter,
        order: SortOrder,
    ) -> Result<Vec<TierRecord>, StoreError> {
        Ok(select(&self.staged, tier, filter, order))
    }

    async fn insert(&mut self, tier: Tier, records: &[TierRecord]) -> Result<(), StoreError> {
        self.staged
            .entry(tier)
            .or_default()
            .extend_from_slice(records);
        Ok(())
    }

    async fn find_delete(&mut self, tier: Tier, filter: &RecordFilter) -> Result<u64, StoreError> {
        let Some(records) = self.staged.get_mut(&tier) else {
            return Ok(0);
        };
        let before = records.len();
        records.retain(|r| !filter.matches(r));
        Ok((before - records.len()) as u64)
    }

    async fn end(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryBulk {
            target,
            staged,
            _guard,
        } = *self;
        let mut tiers = target.write().map_err(|_| StoreError::LockPoisoned)?;
        *tiers = staged;
        Ok(())
    }
}
