// History writer and the minute-aligned sampling loop.
// One tick: sample, store minute records, then run whatever rollups the calendar asks for.
// Ticks run inside the loop body, so a slow cascade delays the next tick instead of overlapping it.

use chrono::{DateTime, Local, TimeZone, Timelike, Utc};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Duration, Instant, interval_at};

use crate::aggregation_worker::{
    self, CascadeError, CascadePolicy, StepReport, plan_tick, run_plan,
};
use crate::history_repo::retention;
use crate::history_repo::{SharedStore, StoreError, TierStore};
use crate::models::{Field, FieldKind, FieldValue, HistoricRecord, TierRecord};
use crate::sysinfo_repo::SampleSource;
use crate::tier::Tier;

const TICK_PERIOD: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub inserted: usize,
    pub pruned: u64,
    pub rollups: Vec<StepReport>,
}

/// Minute-tier records for the momentary quantities among `fields`.
pub fn minute_records(fields: &[Field]) -> Vec<TierRecord> {
    fields
        .iter()
        .filter(|f| f.kind.contains(FieldKind::MOMENTARY))
        .filter_map(|f| match &f.value {
            FieldValue::Quantity {
                magnitude,
                nr_decimals,
                unit,
            } => Some(TierRecord::Raw(HistoricRecord {
                field_name: f.name.clone(),
                timestamp: f.timestamp,
                qos: f.qos,
                magnitude: *magnitude,
                nr_decimals: *nr_decimals,
                unit: unit.clone(),
            })),
            FieldValue::Int { .. }
            | FieldValue::Bool { .. }
            | FieldValue::String { .. }
            | FieldValue::DateTime { .. } => None,
        })
        .collect()
}

/// `t` with seconds and sub-seconds zeroed. Truncates the instant in UTC, so
/// ambiguous local times (DST fall-back) still yield a tick. Assumes the zone's
/// offsets are whole minutes.
pub fn truncate_to_minute<Tz: TimeZone>(t: &DateTime<Tz>) -> Option<DateTime<Tz>> {
    let secs = t.timestamp();
    let minute = DateTime::from_timestamp(secs - secs.rem_euclid(60), 0)?;
    Some(minute.with_timezone(&t.timezone()))
}

/// Stores the minute records of tick `tp` and prunes the minute tier in one
/// bulk scope, then runs the cascade. A failure in any step ends the tick and
/// is returned; the next tick starts fresh.
pub fn save_history<'a, Tz: TimeZone>(
    store: &'a dyn TierStore,
    fields: &[Field],
    tp: &DateTime<Tz>,
    policy: &CascadePolicy,
) -> impl Future<Output = Result<TickReport, CascadeError>> + Send + use<'a, Tz> {
    let records = minute_records(fields);
    let minute_cutoff = retention::cutoff(Tier::Minute, tp, policy.retention.count(Tier::Minute));
    let plan = plan_tick(tp, policy);
    async move {
        let (inserted, pruned) = write_minutes(store, &records, minute_cutoff)
            .await
            .map_err(|source| CascadeError {
                tier: Tier::Minute,
                source,
            })?;
        let rollups = run_plan(store, &plan).await?;
        Ok(TickReport {
            inserted,
            pruned,
            rollups,
        })
    }
}

async fn write_minutes(
    store: &dyn TierStore,
    records: &[TierRecord],
    cutoff: Option<DateTime<Utc>>,
) -> Result<(usize, u64), StoreError> {
    let mut bulk = store.start_bulk().await?;
    bulk.insert(Tier::Minute, records).await?;
    let pruned = match cutoff {
        Some(cutoff) => retention::enforce(bulk.as_mut(), Tier::Minute, cutoff).await?,
        None => 0,
    };
    bulk.end().await?;
    Ok((records.len(), pruned))
}

/// Store, sample source, latest-sample publisher and shutdown for the worker.
pub struct WorkerDeps {
    pub store: SharedStore,
    pub source: Arc<dyn SampleSource>,
    /// Latest sampled fields, shared with readouts.
    pub latest_tx: Arc<watch::Sender<Arc<Vec<Field>>>>,
    pub shutdown_rx: oneshot::Receiver<()>,
}

pub struct WorkerConfig {
    pub policy: CascadePolicy,
    pub vacuum_schedule: Option<String>,
    pub vacuum_interval_secs: u64,
}

fn until_next_minute(now: &DateTime<Local>) -> Duration {
    let into_minute =
        u64::from(now.second()) * 1000 + u64::from(now.timestamp_subsec_millis().min(999));
    Duration::from_millis(60_000 - into_minute.min(59_999))
}

pub fn spawn(deps: WorkerDeps, config: WorkerConfig) -> tokio::task::JoinHandle<()> {
    let WorkerDeps {
        store,
        source,
        latest_tx,
        mut shutdown_rx,
    } = deps;
    let WorkerConfig {
        policy,
        vacuum_schedule,
        vacuum_interval_secs,
    } = config;

    tokio::spawn(async move {
        let start = Instant::now() + until_next_minute(&Local::now());
        let mut tick = interval_at(start, TICK_PERIOD);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let (vacuum_tx, mut vacuum_rx) = mpsc::channel::<()>(1);
        let vacuum_task = tokio::spawn(aggregation_worker::vacuum_scheduler(
            vacuum_schedule,
            vacuum_interval_secs,
            vacuum_tx,
        ));

        let mut last_tp: Option<DateTime<Local>> = None;

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let Some(tp) = truncate_to_minute(&Local::now()) else {
                        tracing::warn!(operation = "tick", "tick time out of range; tick skipped");
                        continue;
                    };
                    if last_tp.is_some_and(|last| tp <= last) {
                        tracing::debug!(tp = %tp, "minute already processed; tick skipped");
                        continue;
                    }
                    last_tp = Some(tp);

                    let fields = match source.sample(tp.with_timezone(&Utc)).await {
                        Ok(fields) => fields,
                        Err(e) => {
                            tracing::warn!(error = %e, operation = "sample", "sampling failed");
                            continue;
                        }
                    };
                    let fields = Arc::new(fields);
                    latest_tx.send_replace(fields.clone());

                    match save_history(store.as_ref(), &fields, &tp, &policy).await {
                        Ok(report) => tracing::debug!(
                            tp = %tp,
                            inserted = report.inserted,
                            pruned = report.pruned,
                            rollups = report.rollups.len(),
                            "history tick"
                        ),
                        Err(e) => tracing::warn!(
                            error = %e,
                            tier = %e.tier,
                            operation = "save_history",
                            "history tick aborted"
                        ),
                    }
                }
                Some(()) = vacuum_rx.recv() => {
                    match store.vacuum().await {
                        Ok(()) => tracing::info!(operation = "vacuum", "store vacuumed"),
                        Err(e) => tracing::warn!(error = %e, operation = "vacuum", "VACUUM failed"),
                    }
                }
                _ = &mut shutdown_rx => {
                    tracing::debug!("Worker shutting down");
                    break;
                }
            }
        }
        vacuum_task.abort();
    })
}
