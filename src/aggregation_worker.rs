// Cascade: on each minute tick decide from the calendar which rollups are due
// (quarter, hour, day, week, month, in that order) and run each one in its own
// bulk scope. VACUUM runs on a configurable schedule (cron expression or fixed interval).

use chrono::{DateTime, TimeZone, Utc, Weekday};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use crate::history_repo::aggregation;
use crate::history_repo::retention;
use crate::history_repo::{RecordFilter, SortOrder, StoreError, TierStore};
use crate::models::TierRecord;
use crate::tier::{RetentionPolicy, TIERS, Tier};

/// Retention and calendar settings driving the cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CascadePolicy {
    pub retention: RetentionPolicy,
    pub week_start: Weekday,
}

impl Default for CascadePolicy {
    fn default() -> Self {
        Self {
            retention: RetentionPolicy::default(),
            week_start: Weekday::Mon,
        }
    }
}

/// One tier's work for a tick, with all times resolved to UTC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedStep {
    pub tier: Tier,
    /// Rollup input window `[from, to)`; `None` for the minute tier.
    pub window: Option<(DateTime<Utc>, DateTime<Utc>)>,
    pub cutoff: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub tier: Tier,
    pub inserted: usize,
    pub pruned: u64,
}

#[derive(Debug, thiserror::Error)]
#[error("{tier} rollup failed: {source}")]
pub struct CascadeError {
    pub tier: Tier,
    pub source: StoreError,
}

/// Steps due at tick `tp`, finest first. Calendar checks and window arithmetic
/// use `tp`'s own time zone.
pub fn plan_tick<Tz: TimeZone>(tp: &DateTime<Tz>, policy: &CascadePolicy) -> Vec<PlannedStep> {
    let mut steps = Vec::new();
    for spec in TIERS.iter() {
        if !spec.trigger.is_due(tp, policy.week_start) {
            continue;
        }
        let Some(cutoff) = retention::cutoff(spec.tier, tp, policy.retention.count(spec.tier))
        else {
            warn!(tier = %spec.tier, "retention cutoff out of range; step skipped");
            continue;
        };
        let window = match spec.source {
            None => None,
            Some(_) => match spec.window(tp) {
                Some((from, to)) => Some((from.with_timezone(&Utc), to.with_timezone(&Utc))),
                None => {
                    warn!(tier = %spec.tier, "rollup window out of range; step skipped");
                    continue;
                }
            },
        };
        steps.push(PlannedStep {
            tier: spec.tier,
            window,
            cutoff,
        });
    }
    steps
}

/// Plans tick `tp` and runs its rollups. Planning happens before the returned
/// future is polled, so `Tz` never crosses an await.
pub fn run_cascade<'a, Tz: TimeZone>(
    store: &'a dyn TierStore,
    tp: &DateTime<Tz>,
    policy: &CascadePolicy,
) -> impl Future<Output = Result<Vec<StepReport>, CascadeError>> + Send + use<'a, Tz> {
    let plan = plan_tick(tp, policy);
    async move { run_plan(store, &plan).await }
}

/// Runs the rollup steps of `plan` in order. The first failing step aborts
/// the rest of the tick; steps already ended stay written.
pub async fn run_plan(
    store: &dyn TierStore,
    plan: &[PlannedStep],
) -> Result<Vec<StepReport>, CascadeError> {
    let mut reports = Vec::new();
    for step in plan.iter().filter(|s| s.window.is_some()) {
        let report = rollup_step(store, step)
            .await
            .map_err(|source| CascadeError {
                tier: step.tier,
                source,
            })?;
        reports.push(report);
    }
    Ok(reports)
}

/// Read the source window, aggregate, insert and prune, all in one bulk scope.
pub async fn rollup_step(store: &dyn TierStore, step: &PlannedStep) -> Result<StepReport, StoreError> {
    let (Some(source), Some((from, to))) = (step.tier.spec().source, step.window) else {
        return Ok(StepReport {
            tier: step.tier,
            inserted: 0,
            pruned: 0,
        });
    };

    let mut bulk = store.start_bulk().await?;
    let records = bulk
        .find(source, &RecordFilter::half_open(from, to), SortOrder::Ascending)
        .await?;
    let rows: Vec<TierRecord> = aggregation::aggregate(&records, from, to)
        .into_values()
        .map(TierRecord::WithPeaks)
        .collect();
    bulk.insert(step.tier, &rows).await?;
    let pruned = retention::enforce(bulk.as_mut(), step.tier, step.cutoff).await?;
    bulk.end().await?;

    info!(
        tier = %step.tier,
        source = %source,
        source_records = records.len(),
        inserted = rows.len(),
        pruned,
        "rollup"
    );
    Ok(StepReport {
        tier: step.tier,
        inserted: rows.len(),
        pruned,
    })
}

/// Sends a message on `tx` at each VACUUM time (cron or fixed interval). Uses local time for cron.
pub async fn vacuum_scheduler(
    vacuum_schedule: Option<String>,
    vacuum_interval_secs: u64,
    tx: tokio::sync::mpsc::Sender<()>,
) {
    if let Some(ref cron_str) = vacuum_schedule {
        let Ok(schedule) = cron::Schedule::from_str(cron_str) else {
            warn!(cron = %cron_str, "invalid vacuum_schedule; VACUUM will not run");
            return;
        };
        loop {
            let now = chrono::Local::now();
            let next = schedule.after(&now).next();
            if let Some(next) = next {
                let delay = (next - now).to_std().unwrap_or(Duration::from_secs(1));
                tokio::time::sleep(delay).await;
                if tx.send(()).await.is_err() {
                    break;
                }
            } else {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
        }
    } else {
        let interval = Duration::from_secs(vacuum_interval_secs);
        loop {
            tokio::time::sleep(interval).await;
            if tx.send(()).await.is_err() {
                break;
            }
        }
    }
}
