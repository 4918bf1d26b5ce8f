//! HTTP surface served on an ephemeral port over the in-memory job system

mod fixtures;
mod helpers;

use serde_json::{json, Value};
use std::time::Duration;
use uuid::Uuid;

use fixtures::*;
use helpers::*;
use raster_orchestrator::{app_state::AppState, routes};

/// Serve the router for `env` and return its base URL.
async fn spawn_api(env: &TestEnv) -> String {
    let state = AppState::new(env.service(fast_settings()));
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server error");
    });

    format!("http://{addr}")
}

async fn poll_until_finished(client: &reqwest::Client, base_url: &str, job_id: &str) -> Value {
    for _ in 0..200 {
        let body: Value = client
            .get(format!("{base_url}/api/v1/jobs/{job_id}"))
            .send()
            .await
            .expect("status request failed")
            .json()
            .await
            .expect("status body");
        if matches!(body["status"].as_str(), Some("success" | "failed" | "cancelled")) {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("job {job_id} did not finish");
}

#[tokio::test]
async fn test_submit_and_poll_job() {
    let env = TestEnv::new();
    env.add_raster(&ORTHO).await;
    let base_url = spawn_api(&env).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base_url}/api/v1/jobs"))
        .json(&json!({
            "operation_type": "reproject",
            "parameters": { "raster_path": "ortho.tif", "target_crs": "EPSG:4326" }
        }))
        .send()
        .await
        .expect("submit failed");
    assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);

    let submitted: Value = response.json().await.expect("submit body");
    assert_eq!(submitted["status"], "pending");
    let job_id = submitted["job_id"].as_str().expect("job_id").to_string();

    let finished = poll_until_finished(&client, &base_url, &job_id).await;
    assert_eq!(finished["status"], "success");
    assert_eq!(finished["found"], true);
    assert_eq!(finished["progress"], 100);
    assert_eq!(finished["result_path"], "ortho_reprojected_EPSG_4326.tif");
}

#[tokio::test]
async fn test_invalid_submissions_are_rejected() {
    let env = TestEnv::new();
    let base_url = spawn_api(&env).await;
    let client = reqwest::Client::new();

    let cases = [
        json!({ "operation_type": "sharpen", "parameters": {} }),
        json!({ "operation_type": "resample", "parameters": { "raster_path": "a.tif", "target_resolution": -1.0 } }),
        json!({ "operation_type": "mosaic", "parameters": { "raster_paths": ["a.tif"] } }),
        json!({ "operation_type": "clip", "parameters": { "raster_path": "a.tif" } }),
    ];

    for body in cases {
        let response = client
            .post(format!("{base_url}/api/v1/jobs"))
            .json(&body)
            .send()
            .await
            .expect("submit failed");
        assert_eq!(response.status(), reqwest::StatusCode::UNPROCESSABLE_ENTITY, "{body}");
        let error: Value = response.json().await.expect("error body");
        assert_eq!(error["error"]["kind"], "validation");
    }

    let listed: Value = client
        .get(format!("{base_url}/api/v1/jobs"))
        .send()
        .await
        .expect("list failed")
        .json()
        .await
        .expect("list body");
    assert_eq!(listed.as_array().map(Vec::len), Some(0));
}

#[tokio::test]
async fn test_unknown_job_is_404_with_view() {
    let env = TestEnv::new();
    let base_url = spawn_api(&env).await;
    let client = reqwest::Client::new();
    let id = Uuid::new_v4();

    let response = client
        .get(format!("{base_url}/api/v1/jobs/{id}"))
        .send()
        .await
        .expect("request failed");
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    let body: Value = response.json().await.expect("body");
    assert_eq!(body["found"], false);
    assert_eq!(body["job_id"], id.to_string());

    let cancel: Value = client
        .post(format!("{base_url}/api/v1/jobs/{id}/cancel"))
        .send()
        .await
        .expect("cancel failed")
        .json()
        .await
        .expect("cancel body");
    assert_eq!(cancel["accepted"], false);
}

#[tokio::test]
async fn test_preview_endpoints() {
    let env = TestEnv::new();
    env.add_raster(&ORTHO).await;
    let base_url = spawn_api(&env).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base_url}/api/v1/preview/resample"))
        .json(&json!({ "raster_path": "ortho.tif", "target_resolution": 0.5 }))
        .send()
        .await
        .expect("preview failed");
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let preview: Value = response.json().await.expect("preview body");
    assert_eq!(preview["operation_type"], "upsampling");
    assert_eq!(preview["new_width"], 2000);

    let response = client
        .post(format!("{base_url}/api/v1/preview/reproject"))
        .json(&json!({ "raster_path": "missing.tif", "target_crs": "EPSG:4326" }))
        .send()
        .await
        .expect("preview failed");
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

    let response = client
        .post(format!("{base_url}/api/v1/preview/sharpen"))
        .json(&json!({}))
        .send()
        .await
        .expect("preview failed");
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    // Previews never create jobs.
    assert_eq!(env.geo.calls().len(), 0);
}

#[tokio::test]
async fn test_health_and_workers() {
    let env = TestEnv::new();
    let base_url = spawn_api(&env).await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{base_url}/health"))
        .send()
        .await
        .expect("health failed");
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let health: Value = response.json().await.expect("health body");
    assert!(health["version"].is_string());
    assert!(matches!(health["status"].as_str(), Some("healthy" | "degraded")));

    let workers: Value = client
        .get(format!("{base_url}/api/v1/workers"))
        .send()
        .await
        .expect("workers failed")
        .json()
        .await
        .expect("workers body");
    assert_eq!(workers["registered_operation_types"].as_array().map(Vec::len), Some(4));
}
