use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use lastprice_core::tenant::{
    CreateTenant, Plan, Provider, Tenant, TenantFilter, TenantMode, UpdateTenant,
};
use lastprice_core::vault::mask_credential;

use crate::{error::AppError, state::AppState};

/// Public shape of a tenant. The encrypted credential never leaves the server.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantView {
    pub id: String,
    pub name: String,
    pub plan: Plan,
    pub mode: TenantMode,
    pub default_provider: Provider,
    pub has_credential: bool,
    pub credential_base_url: Option<String>,
    pub usage_limit: u64,
    pub current_usage: u64,
    pub remaining_usage: u64,
    pub webhook_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Tenant> for TenantView {
    fn from(t: &Tenant) -> Self {
        Self {
            id: t.id.clone(),
            name: t.name.clone(),
            plan: t.plan,
            mode: t.mode,
            default_provider: t.default_provider,
            has_credential: t.has_credential(),
            credential_base_url: t.credential_base_url.clone(),
            usage_limit: t.usage_limit,
            current_usage: t.current_usage,
            remaining_usage: t.usage_limit.saturating_sub(t.current_usage),
            webhook_url: t.webhook_url.clone(),
            created_at: t.created_at,
            updated_at: t.updated_at,
        }
    }
}

/// Tenant body plus the masked hint of a credential submitted with this request.
fn with_hint(tenant: &Tenant, credential: Option<&str>) -> serde_json::Value {
    let mut data = json!(TenantView::from(tenant));
    if let (Some(credential), Some(obj)) = (credential, data.as_object_mut()) {
        obj.insert(
            "credentialHint".to_string(),
            json!(mask_credential(credential.trim())),
        );
    }
    data
}

#[derive(Debug, Deserialize)]
pub struct ListTenantsQuery {
    pub plan: Option<String>,
    pub mode: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchModeRequest {
    pub mode: TenantMode,
    pub credential: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotateCredentialRequest {
    pub credential: String,
    pub base_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChangePlanRequest {
    pub plan: Plan,
}

/// `POST /api/tenants`: Create a tenant (managed by default).
pub async fn create_tenant(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateTenant>,
) -> Result<impl IntoResponse, AppError> {
    let submitted = req
        .credential
        .clone()
        .filter(|_| req.mode == Some(TenantMode::Byok));
    let tenant = state.tenants.create_tenant(req).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "data": with_hint(&tenant, submitted.as_deref()) })),
    ))
}

/// `GET /api/tenants`: List tenants, newest first.
pub async fn list_tenants(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListTenantsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let plan = query
        .plan
        .as_deref()
        .map(str::parse::<Plan>)
        .transpose()?;
    let mode = query
        .mode
        .as_deref()
        .map(str::parse::<TenantMode>)
        .transpose()?;
    let filter = TenantFilter::new(plan, mode, query.limit, query.offset);
    let (limit, offset) = (filter.limit, filter.offset);

    let page = state.tenants.list_tenants(filter).await?;
    let has_more = offset + (page.tenants.len() as i64) < page.total;
    let tenants: Vec<TenantView> = page.tenants.iter().map(TenantView::from).collect();

    Ok(Json(json!({
        "data": tenants,
        "pagination": {
            "total": page.total,
            "limit": limit,
            "offset": offset,
            "has_more": has_more,
        }
    })))
}

/// `GET /api/tenants/:id`: Get one tenant.
pub async fn get_tenant(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let tenant = state.tenants.get_tenant(&tenant_id).await?;
    Ok(Json(json!({ "data": TenantView::from(&tenant) })))
}

/// `PATCH /api/tenants/:id`: Update name, default provider or webhook.
pub async fn update_tenant(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
    Json(req): Json<UpdateTenant>,
) -> Result<impl IntoResponse, AppError> {
    let tenant = state.tenants.update_tenant(&tenant_id, req).await?;
    Ok(Json(json!({ "data": TenantView::from(&tenant) })))
}

/// `DELETE /api/tenants/:id`: Delete a tenant and its usage history.
pub async fn delete_tenant(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state.tenants.delete_tenant(&tenant_id).await?;
    state.providers.forget(&tenant_id).await;
    Ok(StatusCode::NO_CONTENT)
}

/// `PUT /api/tenants/:id/mode`: Switch between managed and byok.
pub async fn switch_mode(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
    Json(req): Json<SwitchModeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let tenant = state
        .tenants
        .switch_mode(&tenant_id, req.mode, req.credential.as_deref(), req.base_url)
        .await?;
    // The manual adapter caches the mode it was built with.
    state.providers.forget(&tenant_id).await;
    let submitted = req.credential.as_deref().filter(|_| req.mode == TenantMode::Byok);
    Ok(Json(json!({ "data": with_hint(&tenant, submitted) })))
}

/// `PUT /api/tenants/:id/credential`: Rotate the provider credential.
pub async fn rotate_credential(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
    Json(req): Json<RotateCredentialRequest>,
) -> Result<impl IntoResponse, AppError> {
    let tenant = state
        .tenants
        .rotate_credential(&tenant_id, &req.credential, req.base_url)
        .await?;
    state.providers.forget(&tenant_id).await;
    Ok(Json(
        json!({ "data": with_hint(&tenant, Some(req.credential.as_str())) }),
    ))
}

/// `DELETE /api/tenants/:id/credential`: Remove the credential; back to managed.
pub async fn remove_credential(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let tenant = state.tenants.remove_credential(&tenant_id).await?;
    state.providers.forget(&tenant_id).await;
    Ok(Json(json!({ "data": TenantView::from(&tenant) })))
}

/// `PUT /api/tenants/:id/plan`: Change plan; the usage limit follows.
pub async fn change_plan(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
    Json(req): Json<ChangePlanRequest>,
) -> Result<impl IntoResponse, AppError> {
    let tenant = state.tenants.change_plan(&tenant_id, req.plan).await?;
    Ok(Json(json!({ "data": TenantView::from(&tenant) })))
}
