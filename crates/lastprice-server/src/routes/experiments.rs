use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use lastprice_core::adapter::{ConversionData, SignalData, SignalEventType};
use lastprice_core::experiment::{ConversionInput, ExperimentReport};
use lastprice_core::properties::{validate_properties, Properties, PropertyValue};
use lastprice_core::tenant::Tenant;
use lastprice_core::usage::UsageType;

use crate::{error::AppError, state::AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingQuery {
    pub user_id: Option<String>,
    pub tenant_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertRequest {
    pub user_id: String,
    pub tenant_id: Option<String>,
    pub revenue: Option<f64>,
    pub currency: Option<String>,
    #[serde(default)]
    pub metadata: Properties,
}

fn required_user(user_id: Option<&str>) -> Result<&str, AppError> {
    match user_id.map(str::trim) {
        Some(u) if !u.is_empty() => Ok(u),
        _ => Err(AppError::BadRequest("userId is required".to_string())),
    }
}

async fn optional_tenant(state: &AppState, tenant_id: Option<&str>) -> Result<Option<Tenant>, AppError> {
    match tenant_id.filter(|t| !t.trim().is_empty()) {
        Some(id) => Ok(Some(state.tenants.get_tenant(id).await?)),
        None => Ok(None),
    }
}

/// `GET /api/experiments/:experiment_id/pricing?userId=&tenantId=`: Assign
/// the user and return the pricing of their variant.
///
/// With a tenant, one `api_call` usage unit is recorded and a `view` signal
/// goes to the tenant's provider in the background.
#[tracing::instrument(skip(state, query))]
pub async fn get_pricing(
    State(state): State<Arc<AppState>>,
    Path(experiment_id): Path<String>,
    Query(query): Query<PricingQuery>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = required_user(query.user_id.as_deref())?;
    let tenant = optional_tenant(&state, query.tenant_id.as_deref()).await?;

    let variant = state
        .experiments
        .assign_variant(user_id, &experiment_id, None)
        .await?;
    let pricing = state.catalog.for_variant(variant);

    if let Some(tenant) = tenant {
        let metadata = Properties::from([
            ("endpoint".to_string(), PropertyValue::from("pricing")),
            ("experimentId".to_string(), PropertyValue::from(experiment_id.as_str())),
            ("variant".to_string(), PropertyValue::from(variant.as_str())),
        ]);
        state
            .usage
            .track_usage(&tenant.id, UsageType::ApiCall, Some(metadata))
            .await?;

        let signal = SignalData {
            order_id: user_id.to_string(),
            experiment_id: experiment_id.clone(),
            variant_id: variant.as_str().to_string(),
            event_type: SignalEventType::View,
            properties: Properties::from([
                ("plan".to_string(), PropertyValue::from(pricing.plan.as_str())),
                ("price".to_string(), PropertyValue::from(pricing.price)),
            ]),
            timestamp: Utc::now(),
        };
        state.providers.dispatch_signal(tenant, signal);
    }

    // Top-level body, no `data` envelope.
    Ok(Json(json!({
        "userId": user_id,
        "experimentId": experiment_id,
        "variant": variant,
        "pricing": pricing,
    })))
}

/// `POST /api/experiments/:experiment_id/convert`: Record a conversion for
/// an assigned user. Revenue defaults to the price of the user's variant.
#[tracing::instrument(skip(state, req))]
pub async fn convert(
    State(state): State<Arc<AppState>>,
    Path(experiment_id): Path<String>,
    Json(req): Json<ConvertRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = required_user(Some(&req.user_id))?;
    validate_properties(&req.metadata)?;
    let tenant = optional_tenant(&state, req.tenant_id.as_deref()).await?;

    let variant = state
        .experiments
        .get_variant(user_id, &experiment_id)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!(
                "user {user_id} has no assignment in experiment {experiment_id}"
            ))
        })?;
    let revenue = req
        .revenue
        .unwrap_or_else(|| state.catalog.for_variant(variant).price);

    let counters = state
        .experiments
        .track_conversion(
            user_id,
            &experiment_id,
            ConversionInput {
                revenue: Some(revenue),
            },
        )
        .await?;

    if let Some(tenant) = tenant {
        let metadata = Properties::from([
            ("action".to_string(), PropertyValue::from("conversion")),
            ("experimentId".to_string(), PropertyValue::from(experiment_id.as_str())),
            ("variant".to_string(), PropertyValue::from(variant.as_str())),
            ("revenue".to_string(), PropertyValue::from(revenue)),
        ]);
        state
            .usage
            .track_usage(&tenant.id, UsageType::Signal, Some(metadata))
            .await?;

        let conversion = ConversionData {
            order_id: user_id.to_string(),
            experiment_id: experiment_id.clone(),
            variant_id: variant.as_str().to_string(),
            revenue,
            currency: req.currency.clone(),
            metadata: req.metadata.clone(),
            timestamp: Utc::now(),
        };
        state.providers.dispatch_conversion(tenant, conversion);
    }

    Ok(Json(json!({
        "success": true,
        "userId": user_id,
        "experimentId": experiment_id,
        "variant": variant,
        "revenue": revenue,
        "results": ExperimentReport::from_counters(&counters),
    })))
}

/// `GET /api/experiments/:experiment_id/results`: Per-variant report, or a
/// `not_found` body (still 200) when nobody has been assigned yet.
pub async fn get_results(
    State(state): State<Arc<AppState>>,
    Path(experiment_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let results = state.experiments.get_experiment_results(&experiment_id).await?;
    Ok(Json(json!({ "data": results })))
}

/// `GET /api/experiments/:experiment_id/assignments`: Every assignment, oldest first.
pub async fn list_assignments(
    State(state): State<Arc<AppState>>,
    Path(experiment_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let assignments = state.experiments.list_assignments(&experiment_id).await?;
    let total = assignments.len();
    Ok(Json(json!({
        "data": assignments,
        "pagination": { "total": total }
    })))
}

/// `DELETE /api/experiments/:experiment_id`: Drop assignments and counters.
pub async fn reset_experiment(
    State(state): State<Arc<AppState>>,
    Path(experiment_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let removed = state.experiments.reset_experiment(&experiment_id).await?;
    Ok(Json(json!({
        "data": {
            "experimentId": experiment_id,
            "removedAssignments": removed,
        }
    })))
}
