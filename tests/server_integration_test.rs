// HTTP surface tests
//
// Drives the axum router with `oneshot` requests and watches the broadcast
// channel that feeds WebSocket clients.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use ppg_vitals::config::AppConfig;
use ppg_vitals::core::Sample;
use ppg_vitals::data::storage::CsvArchive;
use ppg_vitals::server::{router, AppState};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn pulse_body(len: usize) -> String {
    let samples: Vec<Sample> = (0..len)
        .map(|i| {
            let phase = (2.0 * std::f64::consts::PI * 1.2 * i as f64 / 50.0).sin();
            Sample::new(
                (20_000.0 + 300.0 * phase) as i64,
                (15_000.0 + 150.0 * phase) as i64,
            )
        })
        .collect();
    json!({
        "ir": samples.iter().map(|s| s.ir).collect::<Vec<_>>(),
        "red": samples.iter().map(|s| s.red).collect::<Vec<_>>(),
    })
    .to_string()
}

async fn post(state: &AppState, uri: &str, body: String) -> (StatusCode, Value) {
    let response = router(state.clone(), "/esp32Test")
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_ingest_broadcasts_ppg_data_envelope() {
    let dir = tempfile::tempdir().unwrap();
    let state = AppState::new(
        &AppConfig::default(),
        Arc::new(CsvArchive::new(dir.path(), "ppg_data")),
    );
    let mut rx = state.subscribe();

    let (status, body) = post(&state, "/esp32Test", pulse_body(81)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"message": "Data received successfully"}));

    let event = serde_json::to_value(rx.try_recv().unwrap()).unwrap();
    assert_eq!(event["event"], "ppg_data");
    assert_eq!(event["data"]["timestamps"].as_array().unwrap().len(), 81);
    assert!(event["data"].get("heart_rate_bpm").is_some());
    assert!(event["data"].get("spo2_percent").is_some());
}

#[tokio::test]
async fn test_relabel_over_http_writes_archive() {
    let dir = tempfile::tempdir().unwrap();
    let state = AppState::new(
        &AppConfig::default(),
        Arc::new(CsvArchive::new(dir.path(), "ppg_data")),
    );

    post(&state, "/esp32Test", pulse_body(30)).await;
    let (status, body) = post(
        &state,
        "/api/v1/relabel",
        json!({"label": "exercise"}).to_string(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["previous_label"], "default");
    assert_eq!(body["label"], "exercise");
    assert_eq!(body["archived_samples"], 30);
    let file = body["file"].as_str().unwrap();
    assert!(std::path::Path::new(file).exists());
}
