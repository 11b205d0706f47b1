// Cascading historical readout: walk the tiers finest first and fall back to a
// coarser tier only for the part of [from, to] the finer one did not reach.

use chrono::{DateTime, Utc};
use std::ops::Bound;
use tracing::{debug, warn};

use crate::history_repo::{RecordFilter, SortOrder, StoreError, TierStore};
use crate::models::{Field, FieldKind, FieldValue, Peak, ThingError, TierRecord};
use crate::readout::ReadoutRequest;
use crate::tier::Tier;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadoutOutcome {
    /// The final "no more data" report was sent.
    Completed,
    /// A final error report was sent in place of the final data report.
    Failed(String),
    /// The requester went away; no final report was sent.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderState {
    /// Query `tier` for `[from, upper]` (or `[from, upper)`).
    Scan {
        tier: Tier,
        upper: Bound<DateTime<Utc>>,
    },
    Done,
    Cancelled,
}

enum TierScan {
    /// Timestamp of the oldest record reported, if any.
    Scanned(Option<DateTime<Utc>>),
    Cancelled,
}

pub struct HistoricalReader<'a> {
    store: &'a dyn TierStore,
    node_id: &'a str,
    batch_size: usize,
}

impl<'a> HistoricalReader<'a> {
    pub fn new(store: &'a dyn TierStore, node_id: &'a str, batch_size: usize) -> Self {
        Self {
            store,
            node_id,
            batch_size: batch_size.max(1),
        }
    }

    /// Streams the history of `[request.from(), request.to()]` as partial reports,
    /// newest first, and ends with one final report (data or error).
    pub async fn serve(&self, request: &dyn ReadoutRequest) -> ReadoutOutcome {
        let from = request.from();
        let mut state = ReaderState::Scan {
            tier: Tier::Minute,
            upper: Bound::Included(request.to()),
        };

        loop {
            state = match state {
                ReaderState::Scan { .. } | ReaderState::Done if request.is_cancelled() => {
                    ReaderState::Cancelled
                }
                ReaderState::Scan { tier, upper } => {
                    match self.scan_tier(request, tier, from, upper).await {
                        Ok(TierScan::Cancelled) => ReaderState::Cancelled,
                        Ok(TierScan::Scanned(last)) => next_state(tier, last, from),
                        Err(e) => {
                            warn!(error = %e, tier = %tier, operation = "history_readout", "historical readout failed");
                            let message = e.to_string();
                            request
                                .report_errors(
                                    true,
                                    vec![ThingError {
                                        node_id: self.node_id.to_string(),
                                        timestamp: Utc::now(),
                                        message: message.clone(),
                                    }],
                                )
                                .await;
                            return ReadoutOutcome::Failed(message);
                        }
                    }
                }
                ReaderState::Done => {
                    request.report_fields(true, Vec::new()).await;
                    return ReadoutOutcome::Completed;
                }
                ReaderState::Cancelled => {
                    debug!(operation = "history_readout", "readout cancelled");
                    return ReadoutOutcome::Cancelled;
                }
            };
        }
    }

    async fn scan_tier(
        &self,
        request: &dyn ReadoutRequest,
        tier: Tier,
        from: DateTime<Utc>,
        upper: Bound<DateTime<Utc>>,
    ) -> Result<TierScan, StoreError> {
        let filter = RecordFilter {
            start: Bound::Included(from),
            end: upper,
            field_name: request.field_name().map(str::to_string),
        };
        let records = self.store.find(tier, &filter, SortOrder::Descending).await?;

        let mut batch = Vec::with_capacity(self.batch_size + 2);
        let mut last = None;
        for rec in &records {
            push_fields(&mut batch, rec);
            if batch.len() >= self.batch_size {
                request
                    .report_fields(false, std::mem::take(&mut batch))
                    .await;
                if request.is_cancelled() {
                    return Ok(TierScan::Cancelled);
                }
            }
            last = Some(rec.timestamp());
        }
        if !batch.is_empty() {
            request.report_fields(false, batch).await;
        }
        debug!(tier = %tier, records = records.len(), "tier scanned");
        Ok(TierScan::Scanned(last))
    }
}

/// Moves on to the next coarser tier, below the oldest timestamp already
/// reported, while that timestamp is still after `from`.
fn next_state(tier: Tier, last: Option<DateTime<Utc>>, from: DateTime<Utc>) -> ReaderState {
    match (last, tier.coarser()) {
        (Some(last), Some(next)) if last > from => ReaderState::Scan {
            tier: next,
            upper: Bound::Excluded(last),
        },
        _ => ReaderState::Done,
    }
}

fn push_fields(out: &mut Vec<Field>, rec: &TierRecord) {
    let r = rec.record();
    out.push(Field {
        name: r.field_name.clone(),
        timestamp: r.timestamp,
        value: FieldValue::Quantity {
            magnitude: r.magnitude,
            nr_decimals: r.nr_decimals,
            unit: r.unit.clone(),
        },
        kind: FieldKind::HISTORICAL,
        qos: r.qos,
    });
    if let Some((min, max)) = rec.peaks() {
        out.push(peak_field(rec, "Min", min));
        out.push(peak_field(rec, "Max", max));
    }
}

// Peak fields carry the record's timestamp; the peak's own time stays in storage.
fn peak_field(rec: &TierRecord, suffix: &str, peak: &Peak) -> Field {
    let r = rec.record();
    Field {
        name: format!("{}, {}", r.field_name, suffix),
        timestamp: r.timestamp,
        value: FieldValue::Quantity {
            magnitude: peak.magnitude,
            nr_decimals: peak.nr_decimals,
            unit: peak.unit.clone(),
        },
        kind: FieldKind::HISTORICAL | FieldKind::PEAK,
        qos: r.qos,
    }
}
