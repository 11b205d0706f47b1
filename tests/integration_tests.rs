// Integration tests: HTTP and WebSocket endpoints

mod common;

use axum_test::TestServer;
use common::{StaticSource, at, insert, minute_series, momentary};
use sensor_history::aggregation_worker::CascadePolicy;
use sensor_history::history_repo::MemoryTierStore;
use sensor_history::models::Field;
use sensor_history::readout::{DEVICE_ID_FIELD, ReadoutReport};
use sensor_history::routes;
use sensor_history::service::{HistoryService, ServiceConfig};
use sensor_history::tier::Tier;
use std::sync::Arc;

const FROM: &str = "2024-05-06T08:00:00Z";
const TO: &str = "2024-05-06T09:00:00Z";

fn test_service(store: MemoryTierStore) -> Arc<HistoryService> {
    let source = StaticSource(vec![momentary("T", at(2024, 5, 6, 8, 0), 21.0, "°C")]);
    Arc::new(HistoryService::new(
        Arc::new(store),
        Arc::new(source),
        ServiceConfig {
            device_id: "sensor-1".into(),
            policy: CascadePolicy::default(),
            field_batch_size: 50,
            vacuum_schedule: None,
            vacuum_interval_secs: 86_400,
        },
    ))
}

async fn seeded_service() -> Arc<HistoryService> {
    let store = MemoryTierStore::new();
    insert(
        &store,
        Tier::Minute,
        &minute_series("T", at(2024, 5, 6, 8, 0), 5, |i| 20.0 + i as f64),
    )
    .await;
    let service = test_service(store);
    service.refresh_latest().await.unwrap();
    service
}

fn history_url(path: &str, extra: &str) -> String {
    format!("{path}?from={FROM}&to={TO}{extra}")
}

fn report_fields(report: &ReadoutReport) -> &[Field] {
    match report {
        ReadoutReport::Fields { fields, .. } => fields,
        ReadoutReport::Errors { errors, .. } => panic!("unexpected errors: {errors:?}"),
    }
}

#[tokio::test]
async fn test_version_endpoint() {
    let server = TestServer::try_new(routes::app(test_service(MemoryTierStore::new()))).unwrap();
    let response = server.get("/version").await;
    response.assert_status_ok();
    let json: serde_json::Value = response.json();
    assert_eq!(
        json.get("name").and_then(|v| v.as_str()),
        Some("sensor-history")
    );
    assert!(json.get("version").and_then(|v| v.as_str()).is_some());
}

#[tokio::test]
async fn test_fields_endpoint_returns_latest_sample() {
    let service = test_service(MemoryTierStore::new());
    let server = TestServer::try_new(routes::app(service.clone())).unwrap();

    let empty: Vec<Field> = server.get("/api/fields").await.json();
    assert!(empty.is_empty());

    service.refresh_latest().await.unwrap();
    let response = server.get("/api/fields").await;
    response.assert_status_ok();
    let fields: Vec<Field> = response.json();
    assert_eq!(fields.len(), 1);
    assert_eq!(fields[0].name, "T");
}

#[tokio::test]
async fn test_history_endpoint_returns_every_report() {
    let server = TestServer::try_new(routes::app(seeded_service().await)).unwrap();
    let response = server.get(&history_url("/api/history", "")).await;
    response.assert_status_ok();
    let reports: Vec<ReadoutReport> = response.json();

    assert_eq!(reports.len(), 3);
    let momentary = report_fields(&reports[0]);
    assert_eq!(momentary[0].name, DEVICE_ID_FIELD);
    assert_eq!(momentary[1].name, "T");
    let history = report_fields(&reports[1]);
    assert_eq!(history.len(), 5);
    assert_eq!(history[0].timestamp, at(2024, 5, 6, 8, 4));
    assert!(reports[2].is_done());
    assert!(report_fields(&reports[2]).is_empty());
}

#[tokio::test]
async fn test_history_endpoint_momentary_only() {
    let server = TestServer::try_new(routes::app(seeded_service().await)).unwrap();
    let response = server
        .get(&history_url("/api/history", "&kinds=momentary,identity"))
        .await;
    response.assert_status_ok();
    let reports: Vec<ReadoutReport> = response.json();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].is_done());
    assert_eq!(report_fields(&reports[0]).len(), 2);
}

#[tokio::test]
async fn test_history_endpoint_field_filter() {
    let server = TestServer::try_new(routes::app(seeded_service().await)).unwrap();
    let response = server
        .get(&history_url("/api/history", "&kinds=historical&field=Other"))
        .await;
    response.assert_status_ok();
    let reports: Vec<ReadoutReport> = response.json();
    assert!(reports.iter().all(|r| report_fields(r).is_empty()));
    assert!(reports.last().is_some_and(|r| r.is_done()));
}

#[tokio::test]
async fn test_history_endpoint_rejects_unknown_kind() {
    let server = TestServer::try_new(routes::app(seeded_service().await)).unwrap();
    let response = server
        .get(&history_url("/api/history", "&kinds=momentary,bogus"))
        .expect_failure()
        .await;
    response.assert_status_bad_request();
}

#[tokio::test]
async fn test_history_endpoint_requires_range() {
    let server = TestServer::try_new(routes::app(seeded_service().await)).unwrap();
    let response = server.get("/api/history").expect_failure().await;
    response.assert_status_bad_request();
}

// --- WebSocket tests (require http_transport + ws feature) ---

#[tokio::test]
async fn test_ws_history_streams_until_done() {
    let app = routes::app(seeded_service().await);
    let server = TestServer::builder().http_transport().try_build(app).unwrap();
    let mut ws = server
        .get_websocket(&history_url("/ws/history", "&kinds=historical"))
        .await
        .into_websocket()
        .await;

    let mut reports = Vec::new();
    loop {
        let report: ReadoutReport = serde_json::from_str(&ws.receive_text().await).unwrap();
        let done = report.is_done();
        reports.push(report);
        if done {
            break;
        }
    }
    let fields: usize = reports.iter().map(|r| report_fields(r).len()).sum();
    assert_eq!(fields, 5);
    assert_eq!(reports.iter().filter(|r| r.is_done()).count(), 1);
}
