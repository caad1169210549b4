use axum::{extract::Query, response::IntoResponse, Json};
use serde::Deserialize;
use serde_json::json;

use lastprice_core::billing::{all_plans, recommend_plan};

use crate::error::AppError;

#[derive(Debug, Deserialize)]
pub struct RecommendQuery {
    pub usage: Option<i64>,
}

/// `GET /api/plans`: The plan table.
pub async fn list_plans() -> impl IntoResponse {
    Json(json!({ "data": all_plans() }))
}

/// `GET /api/plans/recommend?usage=N`: Cheapest viable plan for a projected monthly usage.
pub async fn recommend(Query(query): Query<RecommendQuery>) -> Result<impl IntoResponse, AppError> {
    let usage = match query.usage {
        Some(u) if u >= 0 => u as u64,
        Some(_) => {
            return Err(AppError::BadRequest(
                "usage must be a non-negative integer".to_string(),
            ))
        }
        None => return Err(AppError::BadRequest("usage is required".to_string())),
    };
    Ok(Json(json!({ "data": recommend_plan(usage) })))
}
