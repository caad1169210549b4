use std::sync::Arc;

use axum::{extract::State, Json};
use serde_json::Value;
use tracing::{info, warn};

use lastprice_core::experiment::ConversionInput;
use lastprice_core::CoreError;

use crate::{error::AppError, state::AppState};

/// Experiment credited when a webhook carries no `metadata.experiment_id`.
pub const DEFAULT_WEBHOOK_EXPERIMENT_ID: &str = "pricing_test_001";

const SUBSCRIPTION_CREATED: &str = "subscription.created";

fn text_field<'a>(data: &'a Value, pointer: &str) -> Option<&'a str> {
    data.pointer(pointer)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Positive finite amount from `data.amount`, else `data.plan.amount`.
fn subscription_amount(data: &Value) -> Option<f64> {
    let raw = match data.get("amount") {
        Some(v) if !v.is_null() && v.as_f64() != Some(0.0) => v,
        _ => data.pointer("/plan/amount")?,
    };
    raw.as_f64().filter(|a| a.is_finite() && *a > 0.0)
}

/// `POST /webhooks/paid`: Paid.ai subscription events become conversions.
///
/// Events that cannot be attributed are acknowledged with 200 and skipped,
/// so the provider does not redeliver them.
pub async fn paid_webhook(
    State(state): State<Arc<AppState>>,
    Json(event): Json<Value>,
) -> Result<&'static str, AppError> {
    let data = event
        .get("data")
        .filter(|d| d.is_object())
        .ok_or_else(|| AppError::BadRequest("Invalid webhook payload".to_string()))?;
    let event_type = event.get("type").and_then(Value::as_str).unwrap_or_default();

    let Some(customer_id) =
        text_field(data, "/customer_id").or_else(|| text_field(data, "/customerId"))
    else {
        warn!(event_type, "webhook received without customer_id");
        return Ok("OK");
    };
    let experiment_id =
        text_field(data, "/metadata/experiment_id").unwrap_or(DEFAULT_WEBHOOK_EXPERIMENT_ID);

    if event_type != SUBSCRIPTION_CREATED {
        info!(event_type, customer_id, "webhook event ignored");
        return Ok("OK");
    }

    let Some(amount) = subscription_amount(data) else {
        warn!(customer_id, experiment_id, "invalid amount in subscription webhook");
        return Ok("OK");
    };

    match state
        .experiments
        .track_conversion(
            customer_id,
            experiment_id,
            ConversionInput {
                revenue: Some(amount),
            },
        )
        .await
    {
        Ok(_) => {
            info!(customer_id, experiment_id, revenue = amount, "conversion tracked from webhook");
        }
        Err(e @ (CoreError::NotFound(_) | CoreError::InvalidArgument(_))) => {
            warn!(customer_id, experiment_id, error = %e, "webhook conversion not tracked");
        }
        Err(e) => return Err(e.into()),
    }
    Ok("OK")
}
