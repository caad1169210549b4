use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use lastprice_core::config::{Config, Environment, DEFAULT_PAID_API_BASE_URL, DEFAULT_STRIPE_API_BASE_URL};
use lastprice_duckdb::DuckDbBackend;
use lastprice_server::app::build_app;
use lastprice_server::state::AppState;

fn test_config() -> Config {
    Config {
        port: 0,
        data_dir: "/tmp/lastprice-test".to_string(),
        duckdb_memory_limit: "256MB".to_string(),
        environment: Environment::Test,
        control_weight: 0.5,
        cors_origins: vec![],
        pricing_catalog: None,
        paid_api_base_url: DEFAULT_PAID_API_BASE_URL.to_string(),
        stripe_api_base_url: DEFAULT_STRIPE_API_BASE_URL.to_string(),
        encryption_key: None,
        paid_api_key: None,
        stripe_secret_key: None,
    }
}

async fn setup() -> (Arc<AppState>, axum::Router) {
    let db = DuckDbBackend::open_in_memory().expect("in-memory DuckDB");
    let state = Arc::new(AppState::new(db, test_config()).expect("state"));
    let app = build_app(Arc::clone(&state));
    (state, app)
}

async fn json_body(response: axum::http::Response<Body>) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("parse JSON")
}

async fn get(app: &axum::Router, uri: &str) -> axum::http::Response<Body> {
    let request = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("build request");
    app.clone().oneshot(request).await.expect("request")
}

async fn send_json(
    app: &axum::Router,
    method: &str,
    uri: &str,
    body: Value,
) -> axum::http::Response<Body> {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("build request");
    app.clone().oneshot(request).await.expect("request")
}

/// Create a tenant routed to the in-process manual adapter.
async fn create_manual_tenant(app: &axum::Router) -> String {
    let response = send_json(
        app,
        "POST",
        "/api/tenants",
        json!({ "name": "Acme", "plan": "starter", "provider": "manual" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let json = json_body(response).await;
    json["data"]["id"].as_str().expect("tenant id").to_string()
}

// ============================================================
// Pricing: deterministic, sticky assignment
// ============================================================
#[tokio::test]
async fn test_pricing_assigns_and_returns_variant_pricing() {
    let (_state, app) = setup().await;

    let response = get(&app, "/api/experiments/exp_pricing_test/pricing?userId=u1").await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert!(json.get("data").is_none());
    assert_eq!(json["userId"], "u1");
    assert_eq!(json["experimentId"], "exp_pricing_test");
    assert_eq!(json["variant"], "experiment");
    assert_eq!(json["pricing"]["plan"], "Premium");
    assert_eq!(json["pricing"]["price"], 39.99);
    assert_eq!(json["pricing"]["features"].as_array().map(Vec::len), Some(4));

    let json = json_body(get(&app, "/api/experiments/exp_pricing_test/pricing?userId=u2").await).await;
    assert_eq!(json["variant"], "control");
    assert_eq!(json["pricing"]["plan"], "Standard");
    assert_eq!(json["pricing"]["price"], 29.99);
}

#[tokio::test]
async fn test_repeated_pricing_counts_one_view() {
    let (_state, app) = setup().await;

    for _ in 0..3 {
        let json = json_body(get(&app, "/api/experiments/exp_pricing_test/pricing?userId=u1").await).await;
        assert_eq!(json["variant"], "experiment");
    }

    let json = json_body(get(&app, "/api/experiments/exp_pricing_test/results").await).await;
    let data = &json["data"];
    assert_eq!(data["experiment"]["views"], 1);
    assert_eq!(data["control"]["views"], 0);
    assert_eq!(data["summary"]["totalViews"], 1);
}

#[tokio::test]
async fn test_pricing_requires_user_id() {
    let (_state, app) = setup().await;
    let response = get(&app, "/api/experiments/exp_pricing_test/pricing").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert_eq!(json["error"]["code"], "validation_error");
    assert!(json["error"]["field"].is_null());
}

#[tokio::test]
async fn test_pricing_with_unknown_tenant_is_404_and_assigns_nothing() {
    let (_state, app) = setup().await;
    let response = get(
        &app,
        "/api/experiments/exp_pricing_test/pricing?userId=u1&tenantId=tnt_missing",
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let json = json_body(get(&app, "/api/experiments/exp_pricing_test/results").await).await;
    assert_eq!(json["data"]["status"], "not_found");
}

// ============================================================
// Conversions
// ============================================================
#[tokio::test]
async fn test_convert_without_assignment_is_404() {
    let (_state, app) = setup().await;
    let response = send_json(
        &app,
        "POST",
        "/api/experiments/exp_pricing_test/convert",
        json!({ "userId": "never-seen", "revenue": 10.0 }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = json_body(response).await;
    assert_eq!(json["error"]["code"], "not_found");
}

#[tokio::test]
async fn test_convert_defaults_revenue_to_variant_price() {
    let (_state, app) = setup().await;
    get(&app, "/api/experiments/exp_pricing_test/pricing?userId=u2").await;

    let response = send_json(
        &app,
        "POST",
        "/api/experiments/exp_pricing_test/convert",
        json!({ "userId": "u2" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["variant"], "control");
    assert_eq!(json["revenue"], 29.99);
    assert_eq!(json["results"]["control"]["conversions"], 1);
    assert_eq!(json["results"]["control"]["conversionRate"], 1.0);
    assert_eq!(json["results"]["control"]["arpu"], 29.99);
}

#[tokio::test]
async fn test_convert_rejects_negative_revenue() {
    let (_state, app) = setup().await;
    get(&app, "/api/experiments/exp_pricing_test/pricing?userId=u1").await;

    let response = send_json(
        &app,
        "POST",
        "/api/experiments/exp_pricing_test/convert",
        json!({ "userId": "u1", "revenue": -5.0 }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = json_body(get(&app, "/api/experiments/exp_pricing_test/results").await).await;
    assert_eq!(json["data"]["summary"]["totalConversions"], 0);
}

#[tokio::test]
async fn test_results_aggregate_both_variants() {
    let (_state, app) = setup().await;
    for user in ["u1", "u2", "u3"] {
        get(&app, &format!("/api/experiments/exp_pricing_test/pricing?userId={user}")).await;
    }
    // u1 is in the experiment variant, u2 and u3 in control.
    send_json(
        &app,
        "POST",
        "/api/experiments/exp_pricing_test/convert",
        json!({ "userId": "u1", "revenue": 40.0 }),
    )
    .await;
    send_json(
        &app,
        "POST",
        "/api/experiments/exp_pricing_test/convert",
        json!({ "userId": "u2", "revenue": 30.0 }),
    )
    .await;

    let json = json_body(get(&app, "/api/experiments/exp_pricing_test/results").await).await;
    let data = &json["data"];
    assert_eq!(data["experimentId"], "exp_pricing_test");
    assert_eq!(data["control"]["views"], 2);
    assert_eq!(data["control"]["conversionRate"], 0.5);
    assert_eq!(data["experiment"]["views"], 1);
    assert_eq!(data["experiment"]["conversionRate"], 1.0);
    assert_eq!(data["summary"]["totalRevenue"], 70.0);
    assert_eq!(data["summary"]["conversionRateDiff"], 0.5);
    assert_eq!(data["summary"]["arpuDiff"], 10.0);
}

#[tokio::test]
async fn test_results_for_unknown_experiment_is_not_found_sentinel() {
    let (_state, app) = setup().await;
    let response = get(&app, "/api/experiments/exp_nobody/results").await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["data"]["experimentId"], "exp_nobody");
    assert_eq!(json["data"]["status"], "not_found");
    assert_eq!(json["data"]["message"], "No data available for this experiment");
}

#[tokio::test]
async fn test_assignments_and_reset() {
    let (_state, app) = setup().await;
    for user in ["u1", "u2"] {
        get(&app, &format!("/api/experiments/exp_pricing_test/pricing?userId={user}")).await;
    }

    let json = json_body(get(&app, "/api/experiments/exp_pricing_test/assignments").await).await;
    assert_eq!(json["pagination"]["total"], 2);
    let users: Vec<&str> = json["data"]
        .as_array()
        .expect("array")
        .iter()
        .filter_map(|a| a["userId"].as_str())
        .collect();
    assert!(users.contains(&"u1") && users.contains(&"u2"));

    let request = Request::builder()
        .method("DELETE")
        .uri("/api/experiments/exp_pricing_test")
        .body(Body::empty())
        .expect("build request");
    let response = app.clone().oneshot(request).await.expect("request");
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["data"]["removedAssignments"], 2);

    let json = json_body(get(&app, "/api/experiments/exp_pricing_test/results").await).await;
    assert_eq!(json["data"]["status"], "not_found");
}

// ============================================================
// Tenant metering from experiment traffic
// ============================================================
#[tokio::test]
async fn test_pricing_and_convert_meter_tenant_usage() {
    let (state, app) = setup().await;
    let tenant_id = create_manual_tenant(&app).await;

    let response = get(
        &app,
        &format!("/api/experiments/exp_pricing_test/pricing?userId=u1&tenantId={tenant_id}"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send_json(
        &app,
        "POST",
        "/api/experiments/exp_pricing_test/convert",
        json!({ "userId": "u1", "tenantId": tenant_id, "revenue": 39.99 }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(get(&app, &format!("/api/tenants/{tenant_id}/usage")).await).await;
    assert_eq!(json["data"]["apiCalls"], 1);
    assert_eq!(json["data"]["signals"], 1);
    assert_eq!(json["data"]["totalUsage"], 2);

    // Signal and conversion reach the manual adapter in the background.
    let tenant = state.tenants.get_tenant(&tenant_id).await.expect("tenant");
    let adapter = state.providers.manual_adapter(&tenant).await;
    for _ in 0..100 {
        if adapter.record_count().await == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(adapter.record_count().await, 2);
}
