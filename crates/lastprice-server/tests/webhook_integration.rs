use std::sync::Arc;

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

fn setup() -> axum::Router {
    let db = DuckDbBackend::open_in_memory().expect("in-memory DuckDB");
    build_app(Arc::new(AppState::new(db, test_config()).expect("state")))
}

async fn body_bytes(response: axum::http::Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes()
        .to_vec()
}

async fn get_json(app: &axum::Router, uri: &str) -> Value {
    let request = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("build request");
    let response = app.clone().oneshot(request).await.expect("request");
    serde_json::from_slice(&body_bytes(response).await).expect("parse JSON")
}

async fn post_webhook(app: &axum::Router, event: Value) -> axum::http::Response<Body> {
    let request = Request::builder()
        .method("POST")
        .uri("/webhooks/paid")
        .header("content-type", "application/json")
        .body(Body::from(event.to_string()))
        .expect("build request");
    app.clone().oneshot(request).await.expect("request")
}

async fn total_conversions(app: &axum::Router) -> Value {
    get_json(app, "/api/experiments/exp_pricing_test/results").await["data"]["summary"]
        ["totalConversions"]
        .clone()
}

#[tokio::test]
async fn test_subscription_created_tracks_conversion() {
    let app = setup();
    // u2 lands in control.
    get_json(&app, "/api/experiments/exp_pricing_test/pricing?userId=u2").await;

    let response = post_webhook(
        &app,
        json!({
            "type": "subscription.created",
            "data": {
                "customer_id": "u2",
                "amount": 49.0,
                "metadata": { "experiment_id": "exp_pricing_test" }
            }
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, b"OK");

    let json = get_json(&app, "/api/experiments/exp_pricing_test/results").await;
    assert_eq!(json["data"]["control"]["conversions"], 1);
    assert_eq!(json["data"]["control"]["revenue"], 49.0);
}

#[tokio::test]
async fn test_plan_amount_and_camel_case_customer_are_accepted() {
    let app = setup();
    get_json(&app, "/api/experiments/exp_pricing_test/pricing?userId=u1").await;

    let response = post_webhook(
        &app,
        json!({
            "type": "subscription.created",
            "data": {
                "customerId": "u1",
                "plan": { "amount": 39.99 },
                "metadata": { "experiment_id": "exp_pricing_test" }
            }
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = get_json(&app, "/api/experiments/exp_pricing_test/results").await;
    assert_eq!(json["data"]["experiment"]["conversions"], 1);
    assert_eq!(json["data"]["experiment"]["revenue"], 39.99);
}

#[tokio::test]
async fn test_unattributable_events_are_acknowledged_and_skipped() {
    let app = setup();
    get_json(&app, "/api/experiments/exp_pricing_test/pricing?userId=u2").await;

    let skipped = [
        // no customer
        json!({ "type": "subscription.created",
                "data": { "amount": 49.0, "metadata": { "experiment_id": "exp_pricing_test" } } }),
        // zero, negative and non-numeric amounts
        json!({ "type": "subscription.created",
                "data": { "customer_id": "u2", "amount": 0,
                          "metadata": { "experiment_id": "exp_pricing_test" } } }),
        json!({ "type": "subscription.created",
                "data": { "customer_id": "u2", "amount": -10.0,
                          "metadata": { "experiment_id": "exp_pricing_test" } } }),
        json!({ "type": "subscription.created",
                "data": { "customer_id": "u2", "amount": "49",
                          "metadata": { "experiment_id": "exp_pricing_test" } } }),
        // other event types
        json!({ "type": "payment.failed",
                "data": { "customer_id": "u2", "amount": 49.0,
                          "metadata": { "experiment_id": "exp_pricing_test" } } }),
        // customer never assigned
        json!({ "type": "subscription.created",
                "data": { "customer_id": "nobody", "amount": 49.0,
                          "metadata": { "experiment_id": "exp_pricing_test" } } }),
    ];
    for event in skipped {
        let response = post_webhook(&app, event).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    assert_eq!(total_conversions(&app).await, 0);
}

#[tokio::test]
async fn test_payload_without_data_is_rejected() {
    let app = setup();
    let response = post_webhook(&app, json!({ "type": "subscription.created" })).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json: Value = serde_json::from_slice(&body_bytes(response).await).expect("parse JSON");
    assert_eq!(json["error"]["code"], "validation_error");
}
