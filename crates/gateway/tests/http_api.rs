//! End-to-end tests of the HTTP surface, driven through `tower::ServiceExt`
//! without binding a socket.

mod common;

use std::sync::Arc;

use af_domain::config::SupervisorConfig;
use af_gateway::{api, bootstrap};
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

async fn app(dir: &std::path::Path) -> Router {
    let config = common::config(dir, SupervisorConfig::default());
    let state = bootstrap::build_app_state(Arc::new(config)).await.unwrap();
    bootstrap::spawn_background_tasks(&state);
    api::router().with_state(state)
}

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(b) => builder
            .header("content-type", "application/json")
            .body(Body::from(b.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, value)
}

async fn seeded(dir: &std::path::Path) -> Router {
    let app = app(dir).await;
    let (s, _) = call(
        &app,
        Method::POST,
        "/v1/tenants",
        Some(json!({"tenant_id": "acme", "display_name": "Acme", "created_by": "ops"})),
    )
    .await;
    assert_eq!(s, StatusCode::CREATED);
    let (s, _) = call(
        &app,
        Method::PUT,
        "/v1/templates/models/echo",
        Some(json!({"config_id": "echo", "provider": "dev", "model_id": "echo-1"})),
    )
    .await;
    assert_eq!(s, StatusCode::OK);
    let (s, _) = call(
        &app,
        Method::PUT,
        "/v1/templates/agents/analyst",
        Some(json!({
            "agent_id": "analyst",
            "name": "Analyst",
            "system_prompt": "You analyse {{region}}.",
            "default_model": "echo"
        })),
    )
    .await;
    assert_eq!(s, StatusCode::OK);
    let (s, body) = call(
        &app,
        Method::POST,
        "/v1/tenants/acme/instances",
        Some(json!({"instance_id": "inst-1", "agent_id": "analyst", "variables": {"region": "apac"}})),
    )
    .await;
    assert_eq!(s, StatusCode::CREATED, "{body}");
    assert_eq!(body["name"], "Analyst");
    app
}

#[tokio::test]
async fn health_reports_adapters() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(dir.path()).await;
    let (s, body) = call(&app, Method::GET, "/v1/health", None).await;
    assert_eq!(s, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["adapters"][0]["id"], "dev");
    assert_eq!(body["active_runs"], 0);
}

#[tokio::test]
async fn sync_run_through_the_api() {
    let dir = tempfile::tempdir().unwrap();
    let app = seeded(dir.path()).await;

    let (s, run) = call(
        &app,
        Method::POST,
        "/v1/tenants/acme/runs",
        Some(json!({"instance_id": "inst-1", "input": "hello", "async": false})),
    )
    .await;
    assert_eq!(s, StatusCode::OK, "{run}");
    assert_eq!(run["state"], "completed");
    assert_eq!(run["result"]["system_prompt"], "You analyse apac.");
    let run_id = run["run_id"].as_str().unwrap().to_owned();

    let (s, fetched) = call(&app, Method::GET, &format!("/v1/tenants/acme/runs/{run_id}"), None).await;
    assert_eq!(s, StatusCode::OK);
    assert_eq!(fetched["state"], "completed");

    let (s, list) = call(&app, Method::GET, "/v1/tenants/acme/runs?state=completed", None).await;
    assert_eq!(s, StatusCode::OK);
    assert_eq!(list["total"], 1);

    let (_, usage) = call(&app, Method::GET, "/v1/tenants/acme/usage", None).await;
    assert_eq!(usage["total_calls"], 1);
    assert!(usage["by_model"]["dev:echo-1"].is_object());

    let (_, audit) = call(
        &app,
        Method::GET,
        &format!("/v1/tenants/acme/audit?entity_id={run_id}"),
        None,
    )
    .await;
    assert_eq!(audit["count"], 3);

    let (_, dash) = call(&app, Method::GET, "/v1/tenants/acme/dashboard", None).await;
    assert_eq!(dash["instances"], 1);
    assert_eq!(dash["runs"]["by_state"]["completed"], 1);

    // Cancelling a finished run is an acknowledged no-op.
    let (s, ack) = call(
        &app,
        Method::POST,
        &format!("/v1/tenants/acme/runs/{run_id}/cancel"),
        None,
    )
    .await;
    assert_eq!(s, StatusCode::OK);
    assert_eq!(ack["cancelled"], false);
    assert_eq!(ack["state"], "completed");
}

#[tokio::test]
async fn events_for_finished_run_is_a_single_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let app = seeded(dir.path()).await;
    let (_, run) = call(
        &app,
        Method::POST,
        "/v1/tenants/acme/runs",
        Some(json!({"instance_id": "inst-1", "input": "hi", "async": false})),
    )
    .await;
    let run_id = run["run_id"].as_str().unwrap();

    let (s, body) = call(
        &app,
        Method::GET,
        &format!("/v1/tenants/acme/runs/{run_id}/events"),
        None,
    )
    .await;
    assert_eq!(s, StatusCode::OK);
    let text = body.as_str().unwrap();
    assert_eq!(text.matches("event: run.snapshot").count(), 1);
    assert!(text.contains("\"state\":\"completed\""));
}

#[tokio::test]
async fn error_statuses() {
    let dir = tempfile::tempdir().unwrap();
    let app = seeded(dir.path()).await;

    let (s, _) = call(
        &app,
        Method::POST,
        "/v1/tenants",
        Some(json!({"tenant_id": "acme", "display_name": "Again"})),
    )
    .await;
    assert_eq!(s, StatusCode::CONFLICT);

    let (s, _) = call(&app, Method::GET, "/v1/tenants/ghost/instances", None).await;
    assert_eq!(s, StatusCode::NOT_FOUND);

    let (s, _) = call(&app, Method::GET, "/v1/templates/widgets", None).await;
    assert_eq!(s, StatusCode::BAD_REQUEST);

    let (s, _) = call(
        &app,
        Method::PUT,
        "/v1/templates/models/other",
        Some(json!({"config_id": "echo", "provider": "dev", "model_id": "x"})),
    )
    .await;
    assert_eq!(s, StatusCode::BAD_REQUEST);

    let (s, _) = call(
        &app,
        Method::POST,
        "/v1/tenants/acme/instances",
        Some(json!({"agent_id": "missing"})),
    )
    .await;
    assert_eq!(s, StatusCode::NOT_FOUND);

    let (s, _) = call(
        &app,
        Method::GET,
        &format!("/v1/tenants/acme/runs/{}", uuid::Uuid::new_v4()),
        None,
    )
    .await;
    assert_eq!(s, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn instance_patch_is_audited_with_before_and_after() {
    let dir = tempfile::tempdir().unwrap();
    let app = seeded(dir.path()).await;

    let (s, after) = call(
        &app,
        Method::PATCH,
        "/v1/tenants/acme/instances/inst-1",
        Some(json!({"name": "Renamed", "updated_by": "ops"})),
    )
    .await;
    assert_eq!(s, StatusCode::OK);
    assert_eq!(after["name"], "Renamed");

    let (_, audit) = call(
        &app,
        Method::GET,
        "/v1/tenants/acme/audit?entity_type=instance&action=update",
        None,
    )
    .await;
    let entry = &audit["entries"][0];
    assert_eq!(entry["actor"], "ops");
    assert_eq!(entry["detail"]["before"]["name"], "Analyst");
    assert_eq!(entry["detail"]["after"]["name"], "Renamed");
}

#[tokio::test]
async fn template_lookup_and_category_filter() {
    let dir = tempfile::tempdir().unwrap();
    let app = seeded(dir.path()).await;
    for (id, category) in [("triage", "support"), ("forecast", "finance")] {
        let (s, _) = call(
            &app,
            Method::PUT,
            &format!("/v1/templates/agents/{id}"),
            Some(json!({
                "agent_id": id,
                "name": id,
                "category": category,
                "default_model": "echo"
            })),
        )
        .await;
        assert_eq!(s, StatusCode::OK);
    }

    let (s, body) = call(&app, Method::GET, "/v1/templates/agents/triage", None).await;
    assert_eq!(s, StatusCode::OK);
    assert_eq!(body["kind"], "agent");
    assert_eq!(body["entry"]["category"], "support");

    let (s, _) = call(&app, Method::GET, "/v1/templates/agents/nobody", None).await;
    assert_eq!(s, StatusCode::NOT_FOUND);

    let (_, list) = call(&app, Method::GET, "/v1/templates/agents?category=finance", None).await;
    assert_eq!(list["count"], 1);
    assert_eq!(list["templates"][0]["entry"]["agent_id"], "forecast");

    let (_, all) = call(&app, Method::GET, "/v1/templates/agents", None).await;
    assert_eq!(all["count"], 3);

    let (_, models) = call(&app, Method::GET, "/v1/templates/models?provider=dev", None).await;
    assert_eq!(models["count"], 1);
    let (_, none) = call(&app, Method::GET, "/v1/templates/models?provider=other", None).await;
    assert_eq!(none["count"], 0);
}
