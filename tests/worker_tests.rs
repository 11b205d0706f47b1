// History writer and service lifecycle tests

mod common;

use chrono::{
    FixedOffset, MappedLocalTime, NaiveDate, NaiveDateTime, TimeDelta, TimeZone, Timelike, Utc,
};
use common::{FailingStore, StaticSource, all, at, momentary};
use sensor_history::aggregation_worker::CascadePolicy;
use sensor_history::history_repo::{MemoryTierStore, SharedStore};
use sensor_history::models::{Field, FieldKind, FieldQoS};
use sensor_history::service::{HistoryService, ServiceConfig};
use sensor_history::tier::{RetentionPolicy, Tier};
use sensor_history::worker::{minute_records, save_history, truncate_to_minute};
use std::sync::Arc;

#[test]
fn only_momentary_quantities_are_recorded() {
    let ts = at(2024, 5, 6, 10, 0);
    let fields = vec![
        momentary("Temperature", ts, 21.5, "°C"),
        Field::int("Uptime", ts, 42, FieldKind::MOMENTARY, FieldQoS::AUTOMATIC_READOUT),
        Field::quantity(
            "Setpoint",
            ts,
            20.0,
            1,
            "°C",
            FieldKind::STATUS,
            FieldQoS::AUTOMATIC_READOUT,
        ),
        Field::string(
            "Host Name",
            ts,
            "box",
            FieldKind::IDENTITY,
            FieldQoS::AUTOMATIC_READOUT,
        ),
    ];

    let records = minute_records(&fields);
    assert_eq!(records.len(), 1);
    let r = records[0].record();
    assert_eq!(r.field_name, "Temperature");
    assert_eq!(r.magnitude, 21.5);
    assert_eq!(r.nr_decimals, 1);
    assert_eq!(r.unit, "°C");
    assert_eq!(r.timestamp, ts);
}

#[test]
fn tick_time_is_truncated_to_the_minute() {
    let zone = FixedOffset::east_opt(3600).unwrap();
    let t = zone
        .with_ymd_and_hms(2024, 5, 6, 10, 7, 42)
        .unwrap()
        + TimeDelta::milliseconds(345);
    let tp = truncate_to_minute(&t).unwrap();
    assert_eq!(tp, zone.with_ymd_and_hms(2024, 5, 6, 10, 7, 0).unwrap());
}

/// Central European time around the 2024-10-27 fall-back: at 01:00 UTC the
/// clocks go from 03:00 +02:00 back to 02:00 +01:00.
#[derive(Debug, Clone, Copy)]
struct FallBackZone;

fn summer() -> FixedOffset {
    FixedOffset::east_opt(2 * 3600).unwrap()
}

fn winter() -> FixedOffset {
    FixedOffset::east_opt(3600).unwrap()
}

fn fall_back_utc() -> NaiveDateTime {
    at(2024, 10, 27, 1, 0).naive_utc()
}

impl TimeZone for FallBackZone {
    type Offset = FixedOffset;

    fn from_offset(_: &FixedOffset) -> Self {
        FallBackZone
    }

    fn offset_from_local_date(&self, local: &NaiveDate) -> MappedLocalTime<FixedOffset> {
        self.offset_from_local_datetime(&local.and_hms_opt(12, 0, 0).unwrap())
    }

    fn offset_from_local_datetime(&self, local: &NaiveDateTime) -> MappedLocalTime<FixedOffset> {
        let repeated_from = fall_back_utc() + TimeDelta::hours(1);
        let repeated_to = fall_back_utc() + TimeDelta::hours(2);
        if *local < repeated_from {
            MappedLocalTime::Single(summer())
        } else if *local < repeated_to {
            MappedLocalTime::Ambiguous(summer(), winter())
        } else {
            MappedLocalTime::Single(winter())
        }
    }

    fn offset_from_utc_date(&self, utc: &NaiveDate) -> FixedOffset {
        self.offset_from_utc_datetime(&utc.and_hms_opt(0, 0, 0).unwrap())
    }

    fn offset_from_utc_datetime(&self, utc: &NaiveDateTime) -> FixedOffset {
        if *utc < fall_back_utc() { summer() } else { winter() }
    }
}

#[test]
fn repeated_local_hour_still_produces_ticks() {
    let first = (at(2024, 10, 27, 0, 30) + TimeDelta::seconds(17)).with_timezone(&FallBackZone);
    let second = (at(2024, 10, 27, 1, 30) + TimeDelta::seconds(17)).with_timezone(&FallBackZone);
    // Both read 02:30:17 on the wall clock.
    assert_eq!(first.naive_local(), second.naive_local());
    assert!(first.with_second(0).is_none());

    let tp1 = truncate_to_minute(&first).unwrap();
    let tp2 = truncate_to_minute(&second).unwrap();
    assert_eq!(tp1.with_timezone(&Utc), at(2024, 10, 27, 0, 30));
    assert_eq!(tp2.with_timezone(&Utc), at(2024, 10, 27, 1, 30));
    assert_eq!(tp1.offset(), &summer());
    assert_eq!(tp2.offset(), &winter());
    // The second pass is a new minute, not a repeat of the first.
    assert!(tp2 > tp1);
    assert_eq!((tp1.hour(), tp1.minute(), tp1.second()), (2, 30, 0));
}

#[tokio::test]
async fn minute_tier_never_exceeds_its_retention() {
    let store = MemoryTierStore::new();
    let policy = CascadePolicy {
        retention: RetentionPolicy::default().with(Tier::Minute, 20),
        ..CascadePolicy::default()
    };
    let t0 = at(2024, 5, 6, 10, 1);

    for i in 0..20 {
        let tp = t0 + TimeDelta::minutes(i);
        let fields = vec![momentary("T", tp, i as f64, "°C")];
        let report = save_history(&store, &fields, &tp, &policy).await.unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(report.pruned, 0);
    }
    assert_eq!(store.len(Tier::Minute).unwrap(), 20);

    // The 21st record pushes exactly the oldest one out.
    let tp = t0 + TimeDelta::minutes(20);
    let fields = vec![momentary("T", tp, 20.0, "°C")];
    let report = save_history(&store, &fields, &tp, &policy).await.unwrap();
    assert_eq!(report.pruned, 1);
    let left = all(&store, Tier::Minute).await;
    assert_eq!(left.len(), 20);
    assert_eq!(left[0].timestamp(), t0 + TimeDelta::minutes(1));
}

#[tokio::test]
async fn quarter_tick_writes_minutes_then_rolls_up() {
    let store = MemoryTierStore::new();
    let policy = CascadePolicy::default();
    let t0 = at(2024, 5, 6, 10, 0);
    for i in 0..=15 {
        let tp = t0 + TimeDelta::minutes(i);
        let fields = vec![momentary("T", tp, 1.0, "°C")];
        let report = save_history(&store, &fields, &tp, &policy).await.unwrap();
        let expected = match i {
            0 => 2,
            15 => 1,
            _ => 0,
        };
        assert_eq!(report.rollups.len(), expected, "tick {i}");
    }
    let quarters = all(&store, Tier::Quarter).await;
    assert_eq!(quarters.len(), 1);
    // The record written at 10:15 belongs to the next window.
    assert_eq!(quarters[0].record().magnitude, 1.0);
    assert_eq!(common::peaks(&quarters[0]).nr_samples, 15);
}

#[tokio::test]
async fn minute_write_failure_is_reported_for_the_minute_tier() {
    let store = FailingStore {
        fail_insert: Some(Tier::Minute),
        ..FailingStore::default()
    };
    let tp = at(2024, 5, 6, 10, 15);
    let fields = vec![momentary("T", tp, 1.0, "°C")];
    let err = save_history(&store, &fields, &tp, &CascadePolicy::default())
        .await
        .unwrap_err();
    assert_eq!(err.tier, Tier::Minute);
    assert!(all(&store.inner, Tier::Quarter).await.is_empty());
}

fn service_config() -> ServiceConfig {
    ServiceConfig {
        device_id: "sensor-1".into(),
        policy: CascadePolicy::default(),
        field_batch_size: 50,
        vacuum_schedule: None,
        vacuum_interval_secs: 86_400,
    }
}

#[tokio::test(start_paused = true)]
async fn service_start_samples_and_stop_joins_worker() {
    let memory = Arc::new(MemoryTierStore::new());
    let store: SharedStore = memory.clone();
    let source = Arc::new(StaticSource(vec![momentary("T", Utc::now(), 5.0, "°C")]));
    let service = HistoryService::new(store, source, service_config());

    assert!(service.latest_fields().is_empty());
    assert!(service.start().await);
    assert!(!service.start().await);
    assert!(service.is_running().await);
    assert_eq!(service.latest_fields().len(), 1);

    // Paused clock: the first minute tick fires when the runtime idles.
    tokio::time::sleep(std::time::Duration::from_secs(61)).await;
    assert!(memory.len(Tier::Minute).unwrap() >= 1);

    assert!(service.stop().await);
    assert!(!service.stop().await);
    assert!(!service.is_running().await);
}
