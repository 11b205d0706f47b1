// Domain models: field values, QoS flags and tier records

mod field;
mod qos;
mod record;

pub use field::{Field, FieldKind, FieldValue, ThingError};
pub use qos::FieldQoS;
pub use record::{HistoricRecord, HistoricRecordWithPeaks, Peak, TierRecord};
