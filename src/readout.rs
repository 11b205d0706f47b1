// Readout requests: what a caller asks for and how reports flow back to it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::history_reader::{HistoricalReader, ReadoutOutcome};
use crate::history_repo::TierStore;
use crate::models::{Field, FieldKind, FieldQoS, ThingError};

pub const DEVICE_ID_FIELD: &str = "Device ID";

/// A readout in progress. Reports are delivered in order; the last one has
/// `done == true` unless the request was cancelled.
#[async_trait]
pub trait ReadoutRequest: Send + Sync {
    fn from(&self) -> DateTime<Utc>;
    fn to(&self) -> DateTime<Utc>;
    fn is_kind_included(&self, kind: FieldKind) -> bool;

    /// Restricts the readout to one field.
    fn field_name(&self) -> Option<&str> {
        None
    }

    async fn report_fields(&self, done: bool, fields: Vec<Field>);
    async fn report_errors(&self, done: bool, errors: Vec<ThingError>);

    /// Set once the requester has gone away. Readers stop at the next check.
    fn is_cancelled(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ReadoutReport {
    Fields { done: bool, fields: Vec<Field> },
    Errors { done: bool, errors: Vec<ThingError> },
}

impl ReadoutReport {
    pub fn is_done(&self) -> bool {
        match self {
            ReadoutReport::Fields { done, .. } | ReadoutReport::Errors { done, .. } => *done,
        }
    }
}

/// What to read.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadoutParams {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub kinds: FieldKind,
    pub field_name: Option<String>,
}

/// A request whose reports go to an mpsc channel. Dropping the receiver
/// cancels the readout.
pub struct ChannelReadout {
    params: ReadoutParams,
    tx: mpsc::Sender<ReadoutReport>,
}

impl ChannelReadout {
    pub fn new(params: ReadoutParams, capacity: usize) -> (Self, mpsc::Receiver<ReadoutReport>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { params, tx }, rx)
    }
}

#[async_trait]
impl ReadoutRequest for ChannelReadout {
    fn from(&self) -> DateTime<Utc> {
        self.params.from
    }

    fn to(&self) -> DateTime<Utc> {
        self.params.to
    }

    fn is_kind_included(&self, kind: FieldKind) -> bool {
        self.params.kinds.intersects(kind)
    }

    fn field_name(&self) -> Option<&str> {
        self.params.field_name.as_deref()
    }

    async fn report_fields(&self, done: bool, fields: Vec<Field>) {
        // A closed channel shows up through is_cancelled.
        let _ = self.tx.send(ReadoutReport::Fields { done, fields }).await;
    }

    async fn report_errors(&self, done: bool, errors: Vec<ThingError>) {
        let _ = self.tx.send(ReadoutReport::Errors { done, errors }).await;
    }

    fn is_cancelled(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Full sensor readout: the device identity and latest sampled values first,
/// then, if historical values are requested, the history of `[from, to]`.
pub async fn read_sensor(
    request: &dyn ReadoutRequest,
    device_id: &str,
    latest: &[Field],
    store: &dyn TierStore,
    batch_size: usize,
) -> ReadoutOutcome {
    let read_history = request.is_kind_included(FieldKind::HISTORICAL);
    let mut fields = Vec::new();

    if request.is_kind_included(FieldKind::IDENTITY) {
        fields.push(Field::string(
            DEVICE_ID_FIELD,
            Utc::now(),
            device_id,
            FieldKind::IDENTITY,
            FieldQoS::AUTOMATIC_READOUT,
        ));
    }
    fields.extend(
        latest
            .iter()
            .filter(|f| request.is_kind_included(f.kind))
            .filter(|f| request.field_name().is_none_or(|name| name == f.name))
            .cloned(),
    );

    request.report_fields(!read_history, fields).await;
    if !read_history {
        return ReadoutOutcome::Completed;
    }
    if request.is_cancelled() {
        return ReadoutOutcome::Cancelled;
    }

    HistoricalReader::new(store, device_id, batch_size)
        .serve(request)
        .await
}
