// Persisted history records: one per field per tier per timestamp.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::FieldQoS;

/// A plain record (minute tier): one sampled value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricRecord {
    pub field_name: String,
    pub timestamp: DateTime<Utc>,
    pub qos: FieldQoS,
    pub magnitude: f64,
    pub nr_decimals: u8,
    pub unit: String,
}

/// Extreme value observed inside an aggregation window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Peak {
    pub magnitude: f64,
    pub nr_decimals: u8,
    pub unit: String,
    pub timestamp: DateTime<Utc>,
}

impl Peak {
    pub fn of(record: &HistoricRecord) -> Self {
        Self {
            magnitude: record.magnitude,
            nr_decimals: record.nr_decimals,
            unit: record.unit.clone(),
            timestamp: record.timestamp,
        }
    }
}

/// Aggregated record (quarter tier and coarser). `magnitude` is the mean of
/// `nr_records` finer records; `nr_samples` counts the raw samples underneath.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricRecordWithPeaks {
    #[serde(flatten)]
    pub record: HistoricRecord,
    pub min: Peak,
    pub max: Peak,
    pub nr_records: u32,
    pub nr_samples: u64,
}

/// A record as stored in some tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "camelCase")]
pub enum TierRecord {
    Raw(HistoricRecord),
    WithPeaks(HistoricRecordWithPeaks),
}

impl TierRecord {
    pub fn record(&self) -> &HistoricRecord {
        match self {
            TierRecord::Raw(r) => r,
            TierRecord::WithPeaks(p) => &p.record,
        }
    }

    pub fn field_name(&self) -> &str {
        &self.record().field_name
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.record().timestamp
    }

    /// `(min, max)` when the record carries peaks.
    pub fn peaks(&self) -> Option<(&Peak, &Peak)> {
        match self {
            TierRecord::Raw(_) => None,
            TierRecord::WithPeaks(p) => Some((&p.min, &p.max)),
        }
    }

    /// Raw samples represented by this record (1 for a minute record).
    pub fn nr_samples(&self) -> u64 {
        match self {
            TierRecord::Raw(_) => 1,
            TierRecord::WithPeaks(p) => p.nr_samples,
        }
    }
}

impl From<HistoricRecord> for TierRecord {
    fn from(r: HistoricRecord) -> Self {
        TierRecord::Raw(r)
    }
}

impl From<HistoricRecordWithPeaks> for TierRecord {
    fn from(r: HistoricRecordWithPeaks) -> Self {
        TierRecord::WithPeaks(r)
    }
}
