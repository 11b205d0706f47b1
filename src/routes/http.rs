// GET handlers: version, latest fields, history readout

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};

use super::{AppState, HistoryQuery, REPORT_BUFFER};
use crate::readout::{ChannelReadout, ReadoutReport};

/// Package version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Package name (from Cargo.toml).
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// GET /version returns service name and version (from Cargo.toml at build time).
pub(super) async fn version_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": NAME,
        "version": VERSION,
    }))
}

/// GET /api/fields: latest sampled values.
pub(super) async fn fields_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.service.latest_fields().as_ref().clone())
}

/// GET /api/history runs a full readout and returns every report in order.
pub(super) async fn history_handler(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<ReadoutReport>>, (StatusCode, String)> {
    let params = query.into_params()?;
    let (request, mut rx) = ChannelReadout::new(params, REPORT_BUFFER);
    let service = state.service.clone();

    // The request is dropped when the readout finishes, which ends the collection.
    let readout = async move { service.readout(&request).await };
    let collect = async {
        let mut reports = Vec::new();
        while let Some(report) = rx.recv().await {
            reports.push(report);
        }
        reports
    };
    let (outcome, reports) = tokio::join!(readout, collect);
    tracing::debug!(?outcome, reports = reports.len(), "history readout served");
    Ok(Json(reports))
}
