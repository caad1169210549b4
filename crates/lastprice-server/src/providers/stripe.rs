use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::SecondsFormat;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use lastprice_core::adapter::{
    validate_conversion_data, validate_signal_data, BillingAdapter, ConversionData, DateRange,
    SignalData, UsageMetrics,
};
use lastprice_core::tenant::{Provider, TenantMode};
use lastprice_core::{CoreError, CoreResult};

use super::{endpoint, status_error, transport_error};

const READ_TIMEOUT: Duration = Duration::from_secs(30);
const PAGE_SIZE: &str = "100";
const MAX_PAGES: usize = 20;

/// Stripe as a revenue source.
///
/// Signals and conversions are only logged; Stripe holds no experiment
/// events. Metrics come from succeeded charges tagged with
/// `metadata.experiment_id`.
pub struct StripeAdapter {
    client: Client,
    secret_key: String,
    base_url: String,
    tenant_id: String,
    mode: TenantMode,
}

#[derive(Debug, Deserialize)]
struct Charge {
    id: String,
    /// Minor currency units.
    amount: i64,
    status: String,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ChargeList {
    data: Vec<Charge>,
    #[serde(default)]
    has_more: bool,
}

impl StripeAdapter {
    pub fn new(
        client: Client,
        secret_key: &str,
        base_url: &str,
        tenant_id: &str,
        mode: TenantMode,
    ) -> CoreResult<Self> {
        if secret_key.trim().is_empty() {
            return Err(CoreError::invalid("Stripe secret key is required"));
        }
        Ok(Self {
            client,
            secret_key: secret_key.to_string(),
            base_url: base_url.to_string(),
            tenant_id: tenant_id.to_string(),
            mode,
        })
    }

    async fn charges_page(
        &self,
        range: DateRange,
        starting_after: Option<&str>,
    ) -> CoreResult<ChargeList> {
        let mut url = endpoint(&self.base_url, "charges")?;
        {
            let mut qs = url.query_pairs_mut();
            qs.append_pair("created[gte]", &range.start.timestamp().to_string());
            qs.append_pair("created[lte]", &range.end.timestamp().to_string());
            qs.append_pair("limit", PAGE_SIZE);
            if let Some(cursor) = starting_after {
                qs.append_pair("starting_after", cursor);
            }
        }

        let resp = self
            .client
            .get(url)
            .bearer_auth(&self.secret_key)
            .timeout(READ_TIMEOUT)
            .send()
            .await
            .map_err(|e| transport_error(Provider::Stripe, e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| {
                    v.pointer("/error/message")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .unwrap_or_else(|| format!("HTTP {status}: {body}"));
            return Err(status_error(Provider::Stripe, status, message));
        }
        resp.json()
            .await
            .map_err(|e| transport_error(Provider::Stripe, e))
    }
}

fn aggregate(metrics: &mut UsageMetrics, charges: &[Charge]) {
    for charge in charges.iter().filter(|c| c.status == "succeeded") {
        let revenue = charge.amount as f64 / 100.0;
        match charge.metadata.get("experiment_id") {
            Some(experiment_id) => metrics.add_conversion(experiment_id, revenue),
            None => {
                metrics.total_conversions += 1;
                metrics.total_revenue += revenue;
            }
        }
    }
}

#[async_trait]
impl BillingAdapter for StripeAdapter {
    fn provider(&self) -> Provider {
        Provider::Stripe
    }

    fn mode(&self) -> TenantMode {
        self.mode
    }

    async fn emit_signal(&self, data: &SignalData) -> CoreResult<()> {
        validate_signal_data(data)?;
        info!(
            tenant_id = %self.tenant_id,
            order_id = %data.order_id,
            experiment_id = %data.experiment_id,
            variant_id = %data.variant_id,
            event_type = data.event_type.as_str(),
            timestamp = %data.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            "stripe signal"
        );
        Ok(())
    }

    async fn track_conversion(&self, data: &ConversionData) -> CoreResult<()> {
        validate_conversion_data(data)?;
        info!(
            tenant_id = %self.tenant_id,
            order_id = %data.order_id,
            experiment_id = %data.experiment_id,
            variant_id = %data.variant_id,
            revenue = data.revenue,
            currency = data.currency.as_deref().unwrap_or("USD"),
            timestamp = %data.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            "stripe conversion"
        );
        Ok(())
    }

    async fn usage_metrics(&self, range: DateRange) -> CoreResult<UsageMetrics> {
        let mut metrics = UsageMetrics::default();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_PAGES {
            let page = self.charges_page(range, cursor.as_deref()).await?;
            aggregate(&mut metrics, &page.data);
            match page.data.last() {
                Some(last) if page.has_more => cursor = Some(last.id.clone()),
                _ => return Ok(metrics),
            }
        }
        warn!(tenant_id = %self.tenant_id, pages = MAX_PAGES, "stripe charge listing truncated");
        Ok(metrics)
    }
}
