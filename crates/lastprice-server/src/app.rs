use std::sync::Arc;

use axum::{
    http::HeaderValue,
    routing::{delete, get, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{routes, state::AppState};

/// Any origin unless `LASTPRICE_CORS_ORIGINS` lists specific ones.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "ignoring unparseable CORS origin");
                None
            }
        })
        .collect();
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if allowed.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(AllowOrigin::list(allowed))
    }
}

/// Construct the Axum [`Router`] with all routes and middleware attached.
///
/// Middleware is applied in outer-to-inner order (outermost runs first on
/// request, last on response):
///
/// 1. `TraceLayer`: structured request/response logging via `tracing`.
/// 2. `CorsLayer`: pricing pages call the experiment endpoints from the browser.
pub fn build_app(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.cors_origins);
    Router::new()
        .route("/health", get(routes::health::health))
        // Experiments
        .route(
            "/api/experiments/{experiment_id}",
            delete(routes::experiments::reset_experiment),
        )
        .route(
            "/api/experiments/{experiment_id}/pricing",
            get(routes::experiments::get_pricing),
        )
        .route(
            "/api/experiments/{experiment_id}/convert",
            post(routes::experiments::convert),
        )
        .route(
            "/api/experiments/{experiment_id}/results",
            get(routes::experiments::get_results),
        )
        .route(
            "/api/experiments/{experiment_id}/assignments",
            get(routes::experiments::list_assignments),
        )
        // Tenants
        .route(
            "/api/tenants",
            post(routes::tenants::create_tenant).get(routes::tenants::list_tenants),
        )
        .route(
            "/api/tenants/{id}",
            get(routes::tenants::get_tenant)
                .patch(routes::tenants::update_tenant)
                .delete(routes::tenants::delete_tenant),
        )
        .route("/api/tenants/{id}/mode", put(routes::tenants::switch_mode))
        .route(
            "/api/tenants/{id}/credential",
            put(routes::tenants::rotate_credential).delete(routes::tenants::remove_credential),
        )
        .route("/api/tenants/{id}/plan", put(routes::tenants::change_plan))
        // Usage and billing
        .route(
            "/api/tenants/{id}/usage",
            post(routes::usage::track_usage).get(routes::usage::get_usage_summary),
        )
        .route(
            "/api/tenants/{id}/usage/records",
            get(routes::usage::list_usage_records),
        )
        .route(
            "/api/tenants/{id}/usage/reset",
            post(routes::usage::reset_usage),
        )
        .route("/api/tenants/{id}/invoice", get(routes::usage::get_invoice))
        .route(
            "/api/tenants/{id}/provider/metrics",
            get(routes::usage::get_provider_metrics),
        )
        // Plans
        .route("/api/plans", get(routes::plans::list_plans))
        .route("/api/plans/recommend", get(routes::plans::recommend))
        // Provider webhooks
        .route("/webhooks/paid", post(routes::webhooks::paid_webhook))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
