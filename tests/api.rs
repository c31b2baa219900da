mod common;

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::Value;
use tower::ServiceExt;

use common::{endpoints, settle, Harness};
use locatrack::config::Config;
use locatrack::tracking::TrackingOptions;
use locatrack::web::{router, AppState};

const CONFIG: &str = r#"
tracking:
  endpoints:
    - url: https://collector.example
source:
  coordinates: "52.37, 4.89"
state:
  directory: /tmp/locatrack-api-test
web:
  bind: 127.0.0.1:0
api_keys:
  - key: operator
    name: operator
    permissions: [control_tracking, configure, read_status]
  - key: viewer
    name: viewer
    permissions: [read_status]
"#;

async fn app() -> (Harness, Router) {
    let h = Harness::new();
    h.controller
        .initialize(TrackingOptions {
            endpoints: endpoints(&["https://collector.example"]),
            ..Default::default()
        })
        .await
        .unwrap();
    let state = AppState {
        config: Arc::new(Config::from_yaml(CONFIG).unwrap()),
        controller: h.controller.clone(),
    };
    (h, router(state))
}

fn request(method: &str, uri: &str, key: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(key) = key {
        builder = builder.header("Authorization", format!("Bearer {}", key));
    }
    match body {
        Some(json) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn requests_need_a_known_key() {
    let (_h, app) = app().await;

    let (status, _) = send(&app, request("GET", "/api/tracking/status", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(
        &app,
        request("GET", "/api/tracking/status", Some("guess"), None),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid API key");
}

#[tokio::test]
async fn viewer_cannot_start_tracking() {
    let (h, app) = app().await;

    let (status, body) = send(
        &app,
        request("POST", "/api/tracking/start", Some("viewer"), None),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Insufficient permissions");
    assert_eq!(body["required"], "control_tracking");
    assert!(!h.controller.is_tracking());

    let (status, body) = send(
        &app,
        request("GET", "/api/tracking/status", Some("viewer"), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "stopped");
    assert_eq!(body["tracking_enabled"], false);
}

#[tokio::test(start_paused = true)]
async fn operator_controls_lifecycle() {
    let (h, app) = app().await;

    let (status, body) = send(
        &app,
        request("POST", "/api/tracking/start", Some("operator"), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "tracking");
    assert_eq!(body["session"]["endpoints"][0]["url"], "https://collector.example");

    let (status, body) = send(
        &app,
        request(
            "PUT",
            "/api/tracking/config",
            Some("operator"),
            Some(serde_json::json!({ "dispatch_interval_secs": 60, "accuracy": "balanced" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session"]["dispatch_interval_secs"], 60);
    assert_eq!(body["session"]["accuracy"], "balanced");

    let (status, body) = send(
        &app,
        request("GET", "/api/dispatch/jobs", Some("viewer"), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["period_secs"], 60);

    h.source.push(3.0).await;
    settle().await;
    let (status, body) = send(
        &app,
        request("POST", "/api/dispatch/run", Some("operator"), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["drained"], 1);
    assert_eq!(body["delivered"][0], "https://collector.example");

    let (status, body) = send(
        &app,
        request("POST", "/api/tracking/stop", Some("operator"), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "stopped");

    let (status, body) = send(
        &app,
        request("POST", "/api/dispatch/run", Some("operator"), None),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "no_dispatch_job");
}

#[tokio::test]
async fn config_update_is_validated() {
    let (_h, app) = app().await;

    let (status, _) = send(
        &app,
        request(
            "PUT",
            "/api/tracking/config",
            Some("operator"),
            Some(serde_json::json!({})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &app,
        request(
            "PUT",
            "/api/tracking/config",
            Some("operator"),
            Some(serde_json::json!({ "capture_interval_secs": 0 })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_failed");
}

#[tokio::test]
async fn permission_errors_map_to_conflict() {
    let (h, app) = app().await;
    h.source.set_location_on(false);

    let (status, body) = send(
        &app,
        request("POST", "/api/tracking/start", Some("operator"), None),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "location_disabled");

    h.source.set_location_on(true);
    let (status, body) = send(
        &app,
        request("GET", "/api/location/current", Some("viewer"), None),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "no_location");
}
