use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use lastprice_core::adapter::DateRange;
use lastprice_core::properties::Properties;
use lastprice_core::usage::UsageType;

use super::parse_period;
use crate::{error::AppError, state::AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackUsageRequest {
    pub usage_type: UsageType,
    pub count: Option<i64>,
    pub metadata: Option<Properties>,
}

#[derive(Debug, Deserialize)]
pub struct PeriodQuery {
    pub start: Option<String>,
    pub end: Option<String>,
}

/// `POST /api/tenants/:id/usage`: Record usage units (default 1).
pub async fn track_usage(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
    Json(req): Json<TrackUsageRequest>,
) -> Result<impl IntoResponse, AppError> {
    let record = match req.count {
        None => {
            state
                .usage
                .track_usage(&tenant_id, req.usage_type, req.metadata)
                .await?
        }
        Some(count) => {
            state
                .usage
                .track_batch(&tenant_id, req.usage_type, count, req.metadata)
                .await?
        }
    };
    let tenant = state.tenants.get_tenant(&tenant_id).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "data": {
                "record": record,
                "currentUsage": tenant.current_usage,
                "usageLimit": tenant.usage_limit,
                "limitExceeded": tenant.current_usage >= tenant.usage_limit,
            }
        })),
    ))
}

/// `GET /api/tenants/:id/usage?start=&end=`: Usage summary for a window.
pub async fn get_usage_summary(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
    Query(query): Query<PeriodQuery>,
) -> Result<impl IntoResponse, AppError> {
    let (start, end) = parse_period(query.start.as_deref(), query.end.as_deref())?;
    let summary = state.usage.get_usage_summary(&tenant_id, start, end).await?;
    Ok(Json(json!({ "data": summary })))
}

/// `GET /api/tenants/:id/usage/records?start=&end=`: Raw usage records, oldest first.
pub async fn list_usage_records(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
    Query(query): Query<PeriodQuery>,
) -> Result<impl IntoResponse, AppError> {
    let (start, end) = parse_period(query.start.as_deref(), query.end.as_deref())?;
    let records = state
        .usage
        .list_usage_records(&tenant_id, Some(start), Some(end))
        .await?;
    let total = records.len();
    Ok(Json(json!({
        "data": records,
        "pagination": { "total": total }
    })))
}

/// `POST /api/tenants/:id/usage/reset`: Start a new billing cycle.
///
/// Only the running counter is zeroed; usage records stay for invoicing.
pub async fn reset_usage(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state.tenants.reset_usage(&tenant_id).await?;
    let remaining = state.tenants.remaining_usage(&tenant_id).await?;
    Ok(Json(json!({
        "data": {
            "tenantId": tenant_id,
            "currentUsage": 0,
            "remainingUsage": remaining,
        }
    })))
}

/// `GET /api/tenants/:id/invoice?start=&end=`: Invoice for a billing window.
pub async fn get_invoice(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
    Query(query): Query<PeriodQuery>,
) -> Result<impl IntoResponse, AppError> {
    let (start, end) = parse_period(query.start.as_deref(), query.end.as_deref())?;
    let invoice = state
        .billing
        .calculate_monthly_bill(&tenant_id, start, end)
        .await?;
    Ok(Json(json!({ "data": invoice })))
}

/// `GET /api/tenants/:id/provider/metrics?start=&end=`: Metrics as reported
/// by the tenant's billing provider.
#[tracing::instrument(skip(state, query))]
pub async fn get_provider_metrics(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
    Query(query): Query<PeriodQuery>,
) -> Result<impl IntoResponse, AppError> {
    let (start, end) = parse_period(query.start.as_deref(), query.end.as_deref())?;
    let range = DateRange::new(start, end)?;
    let tenant = state.tenants.get_tenant(&tenant_id).await?;
    let adapter = state.providers.adapter_for(&tenant).await?;
    let metrics = adapter.usage_metrics(range).await?;
    Ok(Json(json!({
        "data": {
            "tenantId": tenant.id,
            "provider": adapter.provider(),
            "mode": adapter.mode(),
            "metrics": metrics,
        }
    })))
}
