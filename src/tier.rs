// The six fixed resolutions as one descriptor table. Rollup, retention and
// readout all walk this table instead of carrying per-tier code.

use chrono::{DateTime, Datelike, Days, Months, TimeDelta, TimeZone, Timelike, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Minute,
    Quarter,
    Hour,
    Day,
    Week,
    Month,
}

impl Tier {
    /// Finest first.
    pub const ALL: [Tier; 6] = [
        Tier::Minute,
        Tier::Quarter,
        Tier::Hour,
        Tier::Day,
        Tier::Week,
        Tier::Month,
    ];

    pub fn spec(self) -> &'static TierSpec {
        &TIERS[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.spec().name
    }

    pub fn has_peaks(self) -> bool {
        self.spec().has_peaks
    }

    /// Next tier in readout order.
    pub fn coarser(self) -> Option<Tier> {
        Tier::ALL.get(self as usize + 1).copied()
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Time span of one record of a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Minutes(u32),
    Days(u32),
    Months(u32),
}

impl Step {
    /// `t` moved back by `times` steps, in wall-clock terms of `t`'s zone.
    pub fn back<Tz: TimeZone>(self, t: &DateTime<Tz>, times: u32) -> Option<DateTime<Tz>> {
        match self {
            Step::Minutes(n) => {
                let delta = TimeDelta::try_minutes(i64::from(n) * i64::from(times))?;
                t.clone().checked_sub_signed(delta)
            }
            Step::Days(n) => t
                .clone()
                .checked_sub_days(Days::new(u64::from(n) * u64::from(times))),
            Step::Months(n) => t.clone().checked_sub_months(Months::new(n.checked_mul(times)?)),
        }
    }
}

/// Calendar condition on the tick time that makes a tier's rollup due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    EveryTick,
    MinuteMultiple(u32),
    TopOfHour,
    Midnight,
    WeekStart,
    FirstOfMonth,
}

impl Trigger {
    pub fn is_due<Tz: TimeZone>(self, tp: &DateTime<Tz>, week_start: Weekday) -> bool {
        let midnight = tp.hour() == 0 && tp.minute() == 0;
        match self {
            Trigger::EveryTick => true,
            Trigger::MinuteMultiple(n) => tp.minute() % n == 0,
            Trigger::TopOfHour => tp.minute() == 0,
            Trigger::Midnight => midnight,
            Trigger::WeekStart => midnight && tp.weekday() == week_start,
            Trigger::FirstOfMonth => midnight && tp.day() == 1,
        }
    }
}

#[derive(Debug)]
pub struct TierSpec {
    pub tier: Tier,
    pub name: &'static str,
    /// Backing collection (SQLite table name).
    pub table: &'static str,
    pub has_peaks: bool,
    /// Tier whose records are rolled up into this one.
    pub source: Option<Tier>,
    pub step: Step,
    pub trigger: Trigger,
    /// Nominal length of one step, for coverage checks.
    pub nominal_minutes: i64,
    /// Longest input window of this tier's rollup, DST included.
    pub max_window_minutes: i64,
}

const DAY_MINUTES: i64 = 24 * 60;

pub static TIERS: [TierSpec; 6] = [
    TierSpec {
        tier: Tier::Minute,
        name: "minute",
        table: "history_per_minute",
        has_peaks: false,
        source: None,
        step: Step::Minutes(1),
        trigger: Trigger::EveryTick,
        nominal_minutes: 1,
        max_window_minutes: 0,
    },
    TierSpec {
        tier: Tier::Quarter,
        name: "quarter",
        table: "history_per_quarter",
        has_peaks: true,
        source: Some(Tier::Minute),
        step: Step::Minutes(15),
        trigger: Trigger::MinuteMultiple(15),
        nominal_minutes: 15,
        max_window_minutes: 15,
    },
    TierSpec {
        tier: Tier::Hour,
        name: "hour",
        table: "history_per_hour",
        has_peaks: true,
        source: Some(Tier::Quarter),
        step: Step::Minutes(60),
        trigger: Trigger::TopOfHour,
        nominal_minutes: 60,
        max_window_minutes: 60,
    },
    TierSpec {
        tier: Tier::Day,
        name: "day",
        table: "history_per_day",
        has_peaks: true,
        source: Some(Tier::Hour),
        step: Step::Days(1),
        trigger: Trigger::Midnight,
        nominal_minutes: DAY_MINUTES,
        max_window_minutes: DAY_MINUTES + 60,
    },
    TierSpec {
        tier: Tier::Week,
        name: "week",
        table: "history_per_week",
        has_peaks: true,
        source: Some(Tier::Day),
        step: Step::Days(7),
        trigger: Trigger::WeekStart,
        nominal_minutes: 7 * DAY_MINUTES,
        max_window_minutes: 7 * DAY_MINUTES + 60,
    },
    TierSpec {
        tier: Tier::Month,
        name: "month",
        table: "history_per_month",
        has_peaks: true,
        source: Some(Tier::Day),
        step: Step::Months(1),
        trigger: Trigger::FirstOfMonth,
        nominal_minutes: 28 * DAY_MINUTES,
        max_window_minutes: 31 * DAY_MINUTES + 60,
    },
];

impl TierSpec {
    /// Input window `[tp - one step, tp)` of the rollup fired at `tp`.
    pub fn window<Tz: TimeZone>(&self, tp: &DateTime<Tz>) -> Option<(DateTime<Tz>, DateTime<Tz>)> {
        Some((self.step.back(tp, 1)?, tp.clone()))
    }

    /// Records strictly older than this are pruned at tick `tp`, leaving at most
    /// `count` records per field. The minute tier's newest window is the one
    /// starting at `tp`; every other tier's newest window ends at `tp`.
    pub fn retention_cutoff<Tz: TimeZone>(
        &self,
        tp: &DateTime<Tz>,
        count: u32,
    ) -> Option<DateTime<Tz>> {
        let newest_end = match self.tier {
            Tier::Minute => tp.clone().checked_add_signed(TimeDelta::try_minutes(1)?)?,
            _ => tp.clone(),
        };
        self.step.back(&newest_end, count)
    }

    /// How far back, in minutes before a tick, `count` records of this tier reach
    /// once the tick's prune has run.
    pub fn retained_span_minutes(&self, count: u32) -> i64 {
        let lead = match self.tier {
            Tier::Minute => self.nominal_minutes,
            _ => 0,
        };
        i64::from(count) * self.nominal_minutes - lead
    }
}

/// Records kept per field in each tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    counts: [u32; 6],
}

/// A rollup whose input window reaches past its source tier's retention.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "{source_tier} retention ({retained_minutes} min) does not cover the {target} rollup window ({window_minutes} min)"
)]
pub struct CoverageGap {
    pub source_tier: Tier,
    pub target: Tier,
    pub retained_minutes: i64,
    pub window_minutes: i64,
}

impl RetentionPolicy {
    pub const fn uniform(count: u32) -> Self {
        Self { counts: [count; 6] }
    }

    pub fn with(mut self, tier: Tier, count: u32) -> Self {
        self.counts[tier as usize] = count;
        self
    }

    pub fn count(&self, tier: Tier) -> u32 {
        self.counts[tier as usize]
    }

    /// Every rollup must still find its whole input window in the source tier,
    /// otherwise a tick lost to a failure can never be recomputed.
    pub fn check_coverage(&self) -> Result<(), CoverageGap> {
        for spec in TIERS.iter() {
            let Some(source) = spec.source else {
                continue;
            };
            let retained = source.spec().retained_span_minutes(self.count(source));
            if retained < spec.max_window_minutes {
                return Err(CoverageGap {
                    source_tier: source,
                    target: spec.tier,
                    retained_minutes: retained,
                    window_minutes: spec.max_window_minutes,
                });
            }
        }
        Ok(())
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::uniform(250)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn table_is_indexed_by_tier() {
        for (i, tier) in Tier::ALL.iter().enumerate() {
            assert_eq!(TIERS[i].tier, *tier);
        }
        assert_eq!(Tier::Week.coarser(), Some(Tier::Month));
        assert_eq!(Tier::Month.coarser(), None);
    }

    #[test]
    fn month_window_follows_calendar() {
        let (from, to) = Tier::Month.spec().window(&at(2024, 3, 1, 0, 0)).unwrap();
        assert_eq!(from, at(2024, 2, 1, 0, 0));
        assert_eq!(to, at(2024, 3, 1, 0, 0));
    }

    #[test]
    fn triggers_nest_on_calendar_boundaries() {
        let monday_midnight = at(2024, 1, 1, 0, 0);
        assert!(Trigger::WeekStart.is_due(&monday_midnight, Weekday::Mon));
        assert!(Trigger::FirstOfMonth.is_due(&monday_midnight, Weekday::Mon));
        assert!(!Trigger::Midnight.is_due(&at(2024, 1, 1, 0, 15), Weekday::Mon));
        assert!(Trigger::MinuteMultiple(15).is_due(&at(2024, 1, 1, 3, 45), Weekday::Mon));
        assert!(!Trigger::TopOfHour.is_due(&at(2024, 1, 1, 3, 45), Weekday::Mon));
    }

    #[test]
    fn minute_cutoff_keeps_exactly_count_minutes() {
        let tp = at(2024, 1, 1, 10, 0);
        let cutoff = Tier::Minute.spec().retention_cutoff(&tp, 250).unwrap();
        assert_eq!(cutoff, tp - TimeDelta::minutes(249));
    }

    #[test]
    fn default_policy_covers_every_rollup() {
        assert!(RetentionPolicy::default().check_coverage().is_ok());
        let gap = RetentionPolicy::default()
            .with(Tier::Day, 5)
            .check_coverage()
            .unwrap_err();
        assert_eq!(gap.source_tier, Tier::Day);
        assert_eq!(gap.target, Tier::Week);
    }
}
