// Quality-of-service flags attached to every field value and historic record.
// Bit layout matches the sensor-data flag set used by peers (14 defined flags).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

/// Bit-flag set describing how a value was obtained and validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldQoS(u32);

impl FieldQoS {
    pub const NONE: Self = Self(0);
    pub const MISSING: Self = Self(1);
    pub const IN_PROGRESS: Self = Self(2);
    pub const AUTOMATIC_ESTIMATE: Self = Self(4);
    pub const MANUAL_ESTIMATE: Self = Self(8);
    pub const MANUAL_READOUT: Self = Self(16);
    pub const AUTOMATIC_READOUT: Self = Self(32);
    pub const TIME_OFFSET: Self = Self(64);
    pub const WARNING: Self = Self(128);
    pub const ERROR: Self = Self(256);
    pub const SIGNED: Self = Self(512);
    pub const INVOICED: Self = Self(1024);
    pub const END_OF_SERIES: Self = Self(2048);
    pub const POWER_FAILURE: Self = Self(4096);
    pub const INVOICE_CONFIRMED: Self = Self(8192);

    /// Ranked flags: lower numeric value is the more conservative quality.
    pub const COMPARABLE_MASK: u32 = 0b10_1110_0011_1111;
    /// Provenance flags: true for the merge if true for either side.
    pub const TRANSFERABLE_MASK: u32 = 0b01_0001_1100_0000;

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Merge two QoS values when their records are combined into one aggregate.
    ///
    /// The comparable part is the numeric minimum of both comparable parts, so the
    /// aggregate never claims better quality than its worst contributor. Transferable
    /// flags are unioned. Bits outside both masks are dropped.
    pub fn calc_min(self, other: Self) -> Self {
        let q1 = self.0;
        let q2 = other.0;
        let mut result = (q1 & Self::COMPARABLE_MASK).min(q2 & Self::COMPARABLE_MASK);
        result |= q1 & Self::TRANSFERABLE_MASK;
        result |= q2 & Self::TRANSFERABLE_MASK;
        Self(result)
    }
}

impl BitOr for FieldQoS {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for FieldQoS {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for FieldQoS {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl fmt::Display for FieldQoS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}
