// HTTP + WebSocket routes

mod http;
mod ws;

use axum::{Router, http::StatusCode, routing::get};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::models::FieldKind;
use crate::readout::ReadoutParams;
use crate::service::HistoryService;

pub use http::{NAME, VERSION};

/// Reports buffered between a readout and its HTTP/WS consumer.
const REPORT_BUFFER: usize = 16;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) service: Arc<HistoryService>,
}

/// `?from=..&to=..[&field=..][&kinds=momentary,historical]`
#[derive(Debug, Deserialize)]
pub(crate) struct HistoryQuery {
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    field: Option<String>,
    kinds: Option<String>,
}

impl HistoryQuery {
    fn into_params(self) -> Result<ReadoutParams, (StatusCode, String)> {
        let kinds = match self.kinds.as_deref() {
            None => FieldKind::ALL,
            Some(s) => FieldKind::parse_list(s)
                .ok_or_else(|| (StatusCode::BAD_REQUEST, format!("unknown field kind in {s:?}")))?,
        };
        Ok(ReadoutParams {
            from: self.from,
            to: self.to,
            kinds,
            field_name: self.field.filter(|f| !f.is_empty()),
        })
    }
}

pub fn app(service: Arc<HistoryService>) -> Router {
    let state = AppState { service };
    Router::new()
        .route("/version", get(http::version_handler)) // GET /version
        .route("/api/fields", get(http::fields_handler)) // GET /api/fields
        .route("/api/history", get(http::history_handler)) // GET /api/history
        .route("/ws/history", get(ws::ws_history)) // WS /ws/history
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}
