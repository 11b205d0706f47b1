// WebSocket history stream: one readout report per text message.
// Closing the socket cancels the readout.

use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant, timeout};

use super::{AppState, HistoryQuery, REPORT_BUFFER};
use crate::readout::{ChannelReadout, ReadoutParams, ReadoutReport};
use crate::service::HistoryService;

pub(super) const WS_PING_INTERVAL: Duration = Duration::from_secs(30);
pub(super) const WS_SEND_TIMEOUT: Duration = Duration::from_secs(10);

pub(super) async fn ws_history(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let params = match query.into_params() {
        Ok(p) => p,
        Err((status, message)) => return (status, message).into_response(),
    };
    let service = state.service.clone();
    ws.on_upgrade(move |socket| async move {
        if let Err(e) = stream_history(socket, service, params).await {
            tracing::info!("History stream error: {}", e);
        }
    })
}

async fn stream_history(
    mut socket: WebSocket,
    service: Arc<HistoryService>,
    params: ReadoutParams,
) -> anyhow::Result<()> {
    tracing::info!(from = %params.from, to = %params.to, "Client connected to history stream");
    let (request, mut rx) = ChannelReadout::new(params, REPORT_BUFFER);
    let readout = tokio::spawn(async move { service.readout(&request).await });

    let result = forward_reports(&mut socket, &mut rx).await;
    // Dropping the receiver cancels a readout still in progress.
    drop(rx);
    match readout.await {
        Ok(outcome) => tracing::debug!(?outcome, "history stream finished"),
        Err(e) => tracing::warn!(error = %e, "history readout task failed"),
    }
    let _ = socket.send(Message::Close(None)).await;
    result
}

async fn forward_reports(
    socket: &mut WebSocket,
    rx: &mut mpsc::Receiver<ReadoutReport>,
) -> anyhow::Result<()> {
    let mut ping_interval =
        tokio::time::interval_at(Instant::now() + WS_PING_INTERVAL, WS_PING_INTERVAL);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            report = rx.recv() => {
                let Some(report) = report else {
                    break;
                };
                let done = report.is_done();
                let json = serde_json::to_string(&report)?;
                let r = timeout(WS_SEND_TIMEOUT, socket.send(Message::Text(json.into()))).await;
                if r.is_err() || r.unwrap_or(Ok(())).is_err() || done {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                    Some(Ok(_)) => {}
                }
            }
            _ = ping_interval.tick() => {
                let r = timeout(WS_SEND_TIMEOUT, socket.send(Message::Ping(Bytes::new()))).await;
                if r.is_err() || r.unwrap_or(Ok(())).is_err() {
                    break;
                }
            }
        }
    }
    Ok(())
}
