// Sensor field values: what a sample source produces and what readouts report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::BitOr;

use super::FieldQoS;

/// Category flags of a field. A readout request selects fields by these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldKind(u8);

impl FieldKind {
    pub const MOMENTARY: Self = Self(1);
    pub const IDENTITY: Self = Self(2);
    pub const STATUS: Self = Self(4);
    pub const COMPUTED: Self = Self(8);
    pub const PEAK: Self = Self(16);
    pub const HISTORICAL: Self = Self(32);
    pub const ALL: Self = Self(63);

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & Self::ALL.0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Parses a comma-separated list such as `momentary,historical,peak`.
    pub fn parse_list(s: &str) -> Option<Self> {
        let mut out = Self(0);
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            out = out
                | match part.to_ascii_lowercase().as_str() {
                    "momentary" => Self::MOMENTARY,
                    "identity" => Self::IDENTITY,
                    "status" => Self::STATUS,
                    "computed" => Self::COMPUTED,
                    "peak" => Self::PEAK,
                    "historical" => Self::HISTORICAL,
                    "all" => Self::ALL,
                    _ => return None,
                };
        }
        Some(out)
    }
}

impl BitOr for FieldKind {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Typed payload of a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FieldValue {
    #[serde(rename_all = "camelCase")]
    Quantity {
        magnitude: f64,
        nr_decimals: u8,
        unit: String,
    },
    Int {
        value: i64,
    },
    Bool {
        value: bool,
    },
    String {
        value: String,
    },
    DateTime {
        value: DateTime<Utc>,
    },
}

/// One named, timestamped sensor value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub value: FieldValue,
    pub kind: FieldKind,
    pub qos: FieldQoS,
}

impl Field {
    pub fn quantity(
        name: impl Into<String>,
        timestamp: DateTime<Utc>,
        magnitude: f64,
        nr_decimals: u8,
        unit: impl Into<String>,
        kind: FieldKind,
        qos: FieldQoS,
    ) -> Self {
        Self {
            name: name.into(),
            timestamp,
            value: FieldValue::Quantity {
                magnitude,
                nr_decimals,
                unit: unit.into(),
            },
            kind,
            qos,
        }
    }

    pub fn int(
        name: impl Into<String>,
        timestamp: DateTime<Utc>,
        value: i64,
        kind: FieldKind,
        qos: FieldQoS,
    ) -> Self {
        Self {
            name: name.into(),
            timestamp,
            value: FieldValue::Int { value },
            kind,
            qos,
        }
    }

    pub fn string(
        name: impl Into<String>,
        timestamp: DateTime<Utc>,
        value: impl Into<String>,
        kind: FieldKind,
        qos: FieldQoS,
    ) -> Self {
        Self {
            name: name.into(),
            timestamp,
            value: FieldValue::String {
                value: value.into(),
            },
            kind,
            qos,
        }
    }
}

/// Error reported to a readout requester, tagged with the failing entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThingError {
    pub node_id: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}
