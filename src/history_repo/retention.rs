// Retention: bound each tier to a fixed number of records per field.

use chrono::{DateTime, TimeZone, Utc};
use tracing::debug;

use super::{BulkScope, RecordFilter, StoreError};
use crate::tier::Tier;

/// Oldest timestamp `tier` keeps after the prune of tick `tp`.
pub fn cutoff<Tz: TimeZone>(tier: Tier, tp: &DateTime<Tz>, count: u32) -> Option<DateTime<Utc>> {
    tier.spec()
        .retention_cutoff(tp, count)
        .map(|t| t.with_timezone(&Utc))
}

/// Deletes records of `tier` older than `cutoff` inside the caller's bulk scope.
pub async fn enforce(
    bulk: &mut dyn BulkScope,
    tier: Tier,
    cutoff: DateTime<Utc>,
) -> Result<u64, StoreError> {
    let pruned = bulk
        .find_delete(tier, &RecordFilter::older_than(cutoff))
        .await?;
    if pruned > 0 {
        debug!(tier = %tier, pruned, cutoff = %cutoff, "retention pruned records");
    }
    Ok(pruned)
}
