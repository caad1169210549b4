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

const KEY: &str = "pk_live_0123456789abcdefghij";

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
        encryption_key: Some("integration-test-encryption-key".to_string()),
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

async fn body_text(response: axum::http::Response<Body>) -> String {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    String::from_utf8(bytes.to_vec()).expect("utf-8")
}

async fn call(app: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> axum::http::Response<Body> {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string())),
        None => builder.body(Body::empty()),
    }
    .expect("build request");
    app.clone().oneshot(request).await.expect("request")
}

async fn create_tenant(app: &axum::Router, body: Value) -> Value {
    let response = call(app, "POST", "/api/tenants", Some(body)).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    json_body(response).await["data"].clone()
}

// ============================================================
// Create / read
// ============================================================
#[tokio::test]
async fn test_create_tenant_applies_defaults() {
    let (_state, app) = setup().await;
    let data = create_tenant(&app, json!({ "name": "  Acme  " })).await;

    assert!(data["id"].as_str().expect("id").starts_with("tnt_"));
    assert_eq!(data["name"], "Acme");
    assert_eq!(data["plan"], "free");
    assert_eq!(data["mode"], "managed");
    assert_eq!(data["defaultProvider"], "paid-ai");
    assert_eq!(data["usageLimit"], 1000);
    assert_eq!(data["currentUsage"], 0);
    assert_eq!(data["hasCredential"], false);
    assert!(data.get("credentialHint").is_none());
    assert!(data.get("encryptedCredential").is_none());
}

#[tokio::test]
async fn test_create_byok_tenant_never_echoes_credential() {
    let (_state, app) = setup().await;
    let response = call(
        &app,
        "POST",
        "/api/tenants",
        Some(json!({ "name": "Byok Co", "plan": "pro", "mode": "byok", "credential": KEY })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let text = body_text(response).await;
    assert!(!text.contains(KEY));

    let json: Value = serde_json::from_str(&text).expect("parse JSON");
    let data = &json["data"];
    assert_eq!(data["mode"], "byok");
    assert_eq!(data["hasCredential"], true);
    assert_eq!(data["credentialHint"], "pk_l...ghij");
    assert_eq!(data["usageLimit"], 100000);

    let id = data["id"].as_str().expect("id");
    let text = body_text(call(&app, "GET", &format!("/api/tenants/{id}"), None).await).await;
    assert!(!text.contains(KEY));
    assert!(!text.contains("credentialHint"));
}

#[tokio::test]
async fn test_create_byok_without_credential_is_rejected() {
    let (_state, app) = setup().await;
    let response = call(
        &app,
        "POST",
        "/api/tenants",
        Some(json!({ "name": "Byok Co", "mode": "byok" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert_eq!(json["error"]["code"], "validation_error");

    let json = json_body(call(&app, "GET", "/api/tenants", None).await).await;
    assert_eq!(json["pagination"]["total"], 0);
}

#[tokio::test]
async fn test_create_rejects_blank_name_and_bad_webhook() {
    let (_state, app) = setup().await;
    let response = call(&app, "POST", "/api/tenants", Some(json!({ "name": "   " }))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = call(
        &app,
        "POST",
        "/api/tenants",
        Some(json!({ "name": "Acme", "webhookUrl": "ftp://hooks.example" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_get_unknown_tenant_is_404() {
    let (_state, app) = setup().await;
    let response = call(&app, "GET", "/api/tenants/tnt_missing", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = json_body(response).await;
    assert_eq!(json["error"]["code"], "not_found");
}

// ============================================================
// List
// ============================================================
#[tokio::test]
async fn test_list_filters_and_paginates() {
    let (_state, app) = setup().await;
    for (name, plan) in [("A", "free"), ("B", "starter"), ("C", "starter"), ("D", "pro")] {
        create_tenant(&app, json!({ "name": name, "plan": plan })).await;
    }

    let json = json_body(call(&app, "GET", "/api/tenants?plan=starter", None).await).await;
    assert_eq!(json["pagination"]["total"], 2);
    assert_eq!(json["data"].as_array().map(Vec::len), Some(2));

    let json = json_body(call(&app, "GET", "/api/tenants?limit=3&offset=0", None).await).await;
    assert_eq!(json["pagination"]["total"], 4);
    assert_eq!(json["pagination"]["limit"], 3);
    assert_eq!(json["pagination"]["has_more"], true);
    assert_eq!(json["data"].as_array().map(Vec::len), Some(3));

    let json = json_body(call(&app, "GET", "/api/tenants?limit=3&offset=3", None).await).await;
    assert_eq!(json["pagination"]["has_more"], false);
    assert_eq!(json["data"].as_array().map(Vec::len), Some(1));

    let json = json_body(call(&app, "GET", "/api/tenants?mode=byok", None).await).await;
    assert_eq!(json["pagination"]["total"], 0);

    let response = call(&app, "GET", "/api/tenants?plan=platinum", None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ============================================================
// Update / plan / delete
// ============================================================
#[tokio::test]
async fn test_update_tenant_profile() {
    let (_state, app) = setup().await;
    let id = create_tenant(&app, json!({ "name": "Acme" })).await["id"]
        .as_str()
        .expect("id")
        .to_string();

    let response = call(
        &app,
        "PATCH",
        &format!("/api/tenants/{id}"),
        Some(json!({ "name": "Acme Corp", "defaultProvider": "stripe", "webhookUrl": "https://hooks.example/lp" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["data"]["name"], "Acme Corp");
    assert_eq!(json["data"]["defaultProvider"], "stripe");
    assert_eq!(json["data"]["webhookUrl"], "https://hooks.example/lp");

    let json = json_body(
        call(&app, "PATCH", &format!("/api/tenants/{id}"), Some(json!({ "webhookUrl": "" }))).await,
    )
    .await;
    assert!(json["data"]["webhookUrl"].is_null());
    assert_eq!(json["data"]["name"], "Acme Corp");
}

#[tokio::test]
async fn test_change_plan_updates_limit() {
    let (_state, app) = setup().await;
    let id = create_tenant(&app, json!({ "name": "Acme" })).await["id"]
        .as_str()
        .expect("id")
        .to_string();

    let response = call(
        &app,
        "PUT",
        &format!("/api/tenants/{id}/plan"),
        Some(json!({ "plan": "enterprise" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["data"]["plan"], "enterprise");
    assert_eq!(json["data"]["usageLimit"], 999999999);
}

#[tokio::test]
async fn test_delete_tenant() {
    let (_state, app) = setup().await;
    let id = create_tenant(&app, json!({ "name": "Acme" })).await["id"]
        .as_str()
        .expect("id")
        .to_string();

    let response = call(&app, "DELETE", &format!("/api/tenants/{id}"), None).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = call(&app, "GET", &format!("/api/tenants/{id}"), None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let response = call(&app, "DELETE", &format!("/api/tenants/{id}"), None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ============================================================
// Mode and credential lifecycle
// ============================================================
#[tokio::test]
async fn test_mode_switch_and_credential_lifecycle() {
    let (state, app) = setup().await;
    let id = create_tenant(&app, json!({ "name": "Acme" })).await["id"]
        .as_str()
        .expect("id")
        .to_string();

    // byok needs a credential.
    let response = call(
        &app,
        "PUT",
        &format!("/api/tenants/{id}/mode"),
        Some(json!({ "mode": "byok" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = call(
        &app,
        "PUT",
        &format!("/api/tenants/{id}/mode"),
        Some(json!({ "mode": "byok", "credential": KEY, "baseUrl": "https://paid.internal/v1/" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["data"]["mode"], "byok");
    assert_eq!(json["data"]["credentialHint"], "pk_l...ghij");
    assert_eq!(json["data"]["credentialBaseUrl"], "https://paid.internal/v1");

    let credential = state
        .tenants
        .credential(&id)
        .await
        .expect("credential")
        .expect("byok credential");
    assert_eq!(credential.api_key, KEY);

    // Too short to be a provider key.
    let response = call(
        &app,
        "PUT",
        &format!("/api/tenants/{id}/credential"),
        Some(json!({ "credential": "short" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let rotated = "sk_live_rotated_key_987654321";
    let response = call(
        &app,
        "PUT",
        &format!("/api/tenants/{id}/credential"),
        Some(json!({ "credential": rotated })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["data"]["credentialHint"], "sk_l...4321");
    // Base URL survives rotation.
    assert_eq!(json["data"]["credentialBaseUrl"], "https://paid.internal/v1");
    let credential = state
        .tenants
        .credential(&id)
        .await
        .expect("credential")
        .expect("byok credential");
    assert_eq!(credential.api_key, rotated);

    let response = call(&app, "DELETE", &format!("/api/tenants/{id}/credential"), None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["data"]["mode"], "managed");
    assert_eq!(json["data"]["hasCredential"], false);
    assert!(json["data"]["credentialBaseUrl"].is_null());
    assert!(state.tenants.credential(&id).await.expect("credential").is_none());
}
