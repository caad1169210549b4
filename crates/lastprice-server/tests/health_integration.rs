use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
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

async fn json_body(response: axum::http::Response<Body>) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("parse JSON")
}

#[tokio::test]
async fn test_health_returns_200_when_db_reachable() {
    let db = DuckDbBackend::open_in_memory().expect("in-memory DuckDB");
    let state = Arc::new(AppState::new(db, test_config()).expect("state"));
    let app = build_app(state);

    let request = Request::builder()
        .method("GET")
        .uri("/health")
        .body(Body::empty())
        .expect("build request");

    let response = app.oneshot(request).await.expect("request");
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(json["environment"], "test");
}

#[tokio::test]
async fn test_state_rejects_missing_encryption_key_in_production() {
    let db = DuckDbBackend::open_in_memory().expect("in-memory DuckDB");
    let config = Config {
        environment: Environment::Production,
        ..test_config()
    };
    assert!(AppState::new(db, config).is_err());
}

#[tokio::test]
async fn test_state_rejects_invalid_pricing_catalog() {
    let db = DuckDbBackend::open_in_memory().expect("in-memory DuckDB");
    let config = Config {
        pricing_catalog: Some("{\"control\":{}}".to_string()),
        ..test_config()
    };
    assert!(AppState::new(db, config).is_err());
}

#[tokio::test]
async fn test_cors_allows_any_origin_by_default() {
    let db = DuckDbBackend::open_in_memory().expect("in-memory DuckDB");
    let app = build_app(Arc::new(AppState::new(db, test_config()).expect("state")));

    let request = Request::builder()
        .method("GET")
        .uri("/health")
        .header("origin", "https://shop.example")
        .body(Body::empty())
        .expect("build request");
    let response = app.oneshot(request).await.expect("request");
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok()),
        Some("*")
    );
}
