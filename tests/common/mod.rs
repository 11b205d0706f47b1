// Shared test helpers
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sensor_history::history_repo::{
    BulkScope, MemoryTierStore, RecordFilter, SortOrder, StoreError, TierStore,
};
use sensor_history::models::*;
use sensor_history::readout::{ReadoutReport, ReadoutRequest};
use sensor_history::sysinfo_repo::SampleSource;
use sensor_history::tier::Tier;
use std::sync::Mutex;

pub fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
}

pub fn raw(name: &str, timestamp: DateTime<Utc>, magnitude: f64, unit: &str) -> TierRecord {
    TierRecord::Raw(HistoricRecord {
        field_name: name.into(),
        timestamp,
        qos: FieldQoS::AUTOMATIC_READOUT,
        magnitude,
        nr_decimals: 2,
        unit: unit.into(),
    })
}

pub fn momentary(name: &str, timestamp: DateTime<Utc>, magnitude: f64, unit: &str) -> Field {
    Field::quantity(
        name,
        timestamp,
        magnitude,
        1,
        unit,
        FieldKind::MOMENTARY,
        FieldQoS::AUTOMATIC_READOUT,
    )
}

pub fn peaks(rec: &TierRecord) -> &HistoricRecordWithPeaks {
    match rec {
        TierRecord::WithPeaks(p) => p,
        TierRecord::Raw(r) => panic!("expected a record with peaks, got raw {}", r.field_name),
    }
}

pub async fn all(store: &dyn TierStore, tier: Tier) -> Vec<TierRecord> {
    store
        .find(
            tier,
            &RecordFilter {
                start: std::ops::Bound::Unbounded,
                end: std::ops::Bound::Unbounded,
                field_name: None,
            },
            SortOrder::Ascending,
        )
        .await
        .unwrap()
}

pub async fn insert(store: &dyn TierStore, tier: Tier, records: &[TierRecord]) {
    let mut bulk = store.start_bulk().await.unwrap();
    bulk.insert(tier, records).await.unwrap();
    bulk.end().await.unwrap();
}

/// One record per minute in `[from, from + count min)`.
pub fn minute_series(
    name: &str,
    from: DateTime<Utc>,
    count: i64,
    value: impl Fn(i64) -> f64,
) -> Vec<TierRecord> {
    (0..count)
        .map(|i| raw(name, from + chrono::TimeDelta::minutes(i), value(i), "°C"))
        .collect()
}

/// Fixed fields returned on every sample.
pub struct StaticSource(pub Vec<Field>);

#[async_trait]
impl SampleSource for StaticSource {
    async fn sample(&self, timestamp: DateTime<Utc>) -> anyhow::Result<Vec<Field>> {
        Ok(self
            .0
            .iter()
            .cloned()
            .map(|mut f| {
                f.timestamp = timestamp;
                f
            })
            .collect())
    }
}

/// Memory store that fails reads or inserts on chosen tiers.
#[derive(Default)]
pub struct FailingStore {
    pub inner: MemoryTierStore,
    pub fail_find: Option<Tier>,
    pub fail_insert: Option<Tier>,
}

fn injected(tier: Tier) -> StoreError {
    StoreError::Unavailable(format!("injected failure on {tier}"))
}

#[async_trait]
impl TierStore for FailingStore {
    async fn find(
        &self,
        tier: Tier,
        filter: &RecordFilter,
        order: SortOrder,
    ) -> Result<Vec<TierRecord>, StoreError> {
        if self.fail_find == Some(tier) {
            return Err(injected(tier));
        }
        self.inner.find(tier, filter, order).await
    }

    async fn start_bulk(&self) -> Result<Box<dyn BulkScope + '_>, StoreError> {
        let inner = self.inner.start_bulk().await?;
        Ok(Box::new(FailingBulk {
            inner,
            fail_insert: self.fail_insert,
        }))
    }
}

struct FailingBulk<'a> {
    inner: Box<dyn BulkScope + 'a>,
    fail_insert: Option<Tier>,
}

#[async_trait]
impl BulkScope for FailingBulk<'_> {
    async fn find(
        &mut self,
        tier: Tier,
        filter: &RecordFilter,
        order: SortOrder,
    ) -> Result<Vec<TierRecord>, StoreError> {
        self.inner.find(tier, filter, order).await
    }

    async fn insert(&mut self, tier: Tier, records: &[TierRecord]) -> Result<(), StoreError> {
        if self.fail_insert == Some(tier) {
            return Err(injected(tier));
        }
        self.inner.insert(tier, records).await
    }

    async fn find_delete(&mut self, tier: Tier, filter: &RecordFilter) -> Result<u64, StoreError> {
        self.inner.find_delete(tier, filter).await
    }

    async fn end(self: Box<Self>) -> Result<(), StoreError> {
        self.inner.end().await
    }
}

/// Readout request that records every report. Reports cancellation once
/// `cancel_after` reports have been received.
pub struct RecordingRequest {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub kinds: FieldKind,
    pub field_name: Option<String>,
    pub cancel_after: Option<usize>,
    pub reports: Mutex<Vec<ReadoutReport>>,
}

impl RecordingRequest {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            from,
            to,
            kinds: FieldKind::HISTORICAL,
            field_name: None,
            cancel_after: None,
            reports: Mutex::new(Vec::new()),
        }
    }

    pub fn reports(&self) -> Vec<ReadoutReport> {
        self.reports.lock().unwrap().clone()
    }

    /// All reported fields in report order.
    pub fn fields(&self) -> Vec<Field> {
        self.reports()
            .into_iter()
            .flat_map(|r| match r {
                ReadoutReport::Fields { fields, .. } => fields,
                ReadoutReport::Errors { .. } => Vec::new(),
            })
            .collect()
    }
}

#[async_trait]
impl ReadoutRequest for RecordingRequest {
    fn from(&self) -> DateTime<Utc> {
        self.from
    }

    fn to(&self) -> DateTime<Utc> {
        self.to
    }

    fn is_kind_included(&self, kind: FieldKind) -> bool {
        self.kinds.intersects(kind)
    }

    fn field_name(&self) -> Option<&str> {
        self.field_name.as_deref()
    }

    async fn report_fields(&self, done: bool, fields: Vec<Field>) {
        self.reports
            .lock()
            .unwrap()
            .push(ReadoutReport::Fields { done, fields });
    }

    async fn report_errors(&self, done: bool, errors: Vec<ThingError>) {
        self.reports
            .lock()
            .unwrap()
            .push(ReadoutReport::Errors { done, errors });
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_after
            .is_some_and(|n| self.reports.lock().unwrap().len() >= n)
    }
}
