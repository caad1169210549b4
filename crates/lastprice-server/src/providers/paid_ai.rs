use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::SecondsFormat;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use lastprice_core::adapter::{
    validate_conversion_data, validate_signal_data, BillingAdapter, ConversionData, DateRange,
    ExperimentMetrics, SignalData, UsageMetrics,
};
use lastprice_core::properties::Properties;
use lastprice_core::tenant::{Provider, TenantMode};
use lastprice_core::{CoreError, CoreResult};

use super::{endpoint, status_error, transport_error};

const WRITE_TIMEOUT: Duration = Duration::from_secs(10);
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Paid.ai signals API.
pub struct PaidAiAdapter {
    client: Client,
    api_key: String,
    base_url: String,
    tenant_id: String,
    mode: TenantMode,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RemoteExperimentMetrics {
    signals: u64,
    conversions: u64,
    revenue: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RemoteMetrics {
    total_signals: u64,
    total_conversions: u64,
    total_revenue: f64,
    by_experiment: BTreeMap<String, RemoteExperimentMetrics>,
}

impl From<RemoteMetrics> for UsageMetrics {
    fn from(m: RemoteMetrics) -> Self {
        Self {
            total_signals: m.total_signals,
            total_conversions: m.total_conversions,
            total_revenue: m.total_revenue,
            by_experiment: m
                .by_experiment
                .into_iter()
                .map(|(id, e)| {
                    (
                        id,
                        ExperimentMetrics {
                            signals: e.signals,
                            conversions: e.conversions,
                            revenue: e.revenue,
                        },
                    )
                })
                .collect(),
        }
    }
}

/// User-supplied properties first, then the fixed fields, so a caller can
/// never overwrite `experiment_id`, `tenant_id` and friends.
///
/// This reverses the precedence of the existing Paid.ai payloads, where user
/// properties were spread last and won on key collisions.
fn merged_properties(user: &Properties, fixed: Vec<(&str, Value)>) -> CoreResult<Map<String, Value>> {
    let mut map = Map::new();
    for (key, value) in user {
        map.insert(key.clone(), serde_json::to_value(value)?);
    }
    for (key, value) in fixed {
        map.insert(key.to_string(), value);
    }
    Ok(map)
}

impl PaidAiAdapter {
    pub fn new(
        client: Client,
        api_key: &str,
        base_url: &str,
        tenant_id: &str,
        mode: TenantMode,
    ) -> CoreResult<Self> {
        if api_key.trim().is_empty() {
            return Err(CoreError::invalid("Paid.ai API key is required"));
        }
        Ok(Self {
            client,
            api_key: api_key.to_string(),
            base_url: base_url.to_string(),
            tenant_id: tenant_id.to_string(),
            mode,
        })
    }

    fn signal_payload(&self, data: &SignalData) -> CoreResult<Value> {
        let properties = merged_properties(
            &data.properties,
            vec![
                ("experiment_id", json!(data.experiment_id)),
                ("variant_id", json!(data.variant_id)),
                ("event_type", json!(data.event_type.as_str())),
                ("tenant_id", json!(self.tenant_id)),
                ("mode", json!(self.mode.as_str())),
                (
                    "timestamp",
                    json!(data.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)),
                ),
            ],
        )?;
        Ok(json!({
            "order_id": data.order_id,
            "event_type": "ab_test",
            "properties": properties,
        }))
    }

    fn conversion_payload(&self, data: &ConversionData) -> CoreResult<Value> {
        let properties = merged_properties(
            &data.metadata,
            vec![
                ("experiment_id", json!(data.experiment_id)),
                ("variant_id", json!(data.variant_id)),
                ("revenue", json!(data.revenue)),
                ("currency", json!(data.currency.as_deref().unwrap_or("USD"))),
                ("tenant_id", json!(self.tenant_id)),
                ("mode", json!(self.mode.as_str())),
                (
                    "timestamp",
                    json!(data.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)),
                ),
            ],
        )?;
        Ok(json!({
            "order_id": data.order_id,
            "event_type": "conversion",
            "properties": properties,
        }))
    }

    async fn post_signal(&self, payload: &Value) -> CoreResult<()> {
        let url = endpoint(&self.base_url, "signals")?;
        let resp = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .timeout(WRITE_TIMEOUT)
            .json(payload)
            .send()
            .await
            .map_err(|e| transport_error(Provider::PaidAi, e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error(Provider::PaidAi, status, error_message(status, &body)));
        }
        Ok(())
    }
}

/// `message` from a Paid.ai error body, or the raw status and body.
fn error_message(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| format!("HTTP {status}: {body}"))
}

#[async_trait]
impl BillingAdapter for PaidAiAdapter {
    fn provider(&self) -> Provider {
        Provider::PaidAi
    }

    fn mode(&self) -> TenantMode {
        self.mode
    }

    async fn emit_signal(&self, data: &SignalData) -> CoreResult<()> {
        validate_signal_data(data)?;
        let payload = self.signal_payload(data)?;
        self.post_signal(&payload).await?;
        debug!(tenant_id = %self.tenant_id, experiment_id = %data.experiment_id, "paid.ai signal sent");
        Ok(())
    }

    async fn track_conversion(&self, data: &ConversionData) -> CoreResult<()> {
        validate_conversion_data(data)?;
        let payload = self.conversion_payload(data)?;
        self.post_signal(&payload).await?;
        debug!(tenant_id = %self.tenant_id, experiment_id = %data.experiment_id, "paid.ai conversion sent");
        Ok(())
    }

    async fn usage_metrics(&self, range: DateRange) -> CoreResult<UsageMetrics> {
        let mut url = endpoint(&self.base_url, "metrics")?;
        url.query_pairs_mut()
            .append_pair("start_date", &range.start.to_rfc3339_opts(SecondsFormat::Millis, true))
            .append_pair("end_date", &range.end.to_rfc3339_opts(SecondsFormat::Millis, true))
            .append_pair("tenant_id", &self.tenant_id);

        let resp = self
            .client
            .get(url)
            .bearer_auth(&self.api_key)
            .timeout(READ_TIMEOUT)
            .send()
            .await
            .map_err(|e| transport_error(Provider::PaidAi, e))?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(UsageMetrics::default());
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error(Provider::PaidAi, status, error_message(status, &body)));
        }
        let metrics: RemoteMetrics = resp
            .json()
            .await
            .map_err(|e| transport_error(Provider::PaidAi, e))?;
        Ok(metrics.into())
    }
}
