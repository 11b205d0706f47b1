// Rollup: one coarser-tier record per field from a window of finer records.
// Pure logic; reading the window and writing the result stays with the caller.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::models::{HistoricRecordWithPeaks, Peak, TierRecord};
use crate::units;

/// Timestamp given to an aggregate: the middle of `[from, to)`.
pub fn window_midpoint(from: DateTime<Utc>, to: DateTime<Utc>) -> DateTime<Utc> {
    from + (to - from) / 2
}

/// Aggregates `records` (already restricted to `[window_from, window_to)`) into
/// one record per field name.
///
/// - Peaks: a candidate replaces the current minimum only when the current one
///   compares strictly greater, and the maximum only when it compares strictly
///   less, so on ties the first record seen keeps the peak.
/// - Mean: records whose unit cannot be converted into the accumulator's unit
///   are left out of the mean and of `nr_records`, but still count for peaks
///   and `nr_samples`.
/// - Decimals: the smallest precision among the records that entered the mean.
/// - QoS: merged with [`FieldQoS::calc_min`](crate::models::FieldQoS::calc_min).
pub fn aggregate(
    records: &[TierRecord],
    window_from: DateTime<Utc>,
    window_to: DateTime<Utc>,
) -> BTreeMap<String, HistoricRecordWithPeaks> {
    let midpoint = window_midpoint(window_from, window_to);
    let mut by_name: BTreeMap<String, HistoricRecordWithPeaks> = BTreeMap::new();

    for rec in records {
        let source = rec.record();
        let (min, max) = match rec.peaks() {
            Some((min, max)) => (min.clone(), max.clone()),
            None => (Peak::of(source), Peak::of(source)),
        };

        let Some(stat) = by_name.get_mut(&source.field_name) else {
            let mut seeded = source.clone();
            seeded.timestamp = midpoint;
            by_name.insert(
                source.field_name.clone(),
                HistoricRecordWithPeaks {
                    record: seeded,
                    min,
                    max,
                    nr_records: 1,
                    nr_samples: rec.nr_samples(),
                },
            );
            continue;
        };

        if units::compare(stat.min.magnitude, &stat.min.unit, min.magnitude, &min.unit)
            == Ordering::Greater
        {
            stat.min = min;
        }
        if units::compare(stat.max.magnitude, &stat.max.unit, max.magnitude, &max.unit)
            == Ordering::Less
        {
            stat.max = max;
        }
        stat.nr_samples += rec.nr_samples();

        let sum = if stat.record.unit == source.unit {
            Some(stat.record.magnitude + source.magnitude)
        } else {
            units::add(
                stat.record.magnitude,
                &stat.record.unit,
                source.magnitude,
                &source.unit,
            )
        };
        if let Some(sum) = sum {
            stat.record.magnitude = sum;
            stat.record.nr_decimals = stat.record.nr_decimals.min(source.nr_decimals);
            stat.nr_records += 1;
        }

        stat.record.qos = stat.record.qos.calc_min(source.qos);
    }

    for stat in by_name.values_mut() {
        if stat.nr_records > 1 {
            stat.record.magnitude /= f64::from(stat.nr_records);
        }
    }

    by_name
}
