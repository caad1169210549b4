//! Billing and analytics provider abstraction.
//!
//! Network-backed providers live in the server crate; the manual adapter
//! here keeps everything in process.

use std::collections::{BTreeMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{CoreError, CoreResult};
use crate::properties::{validate_properties, Properties};
use crate::tenant::{Provider, TenantMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalEventType {
    View,
    Conversion,
    Custom,
}

impl SignalEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Conversion => "conversion",
            Self::Custom => "custom",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalData {
    pub order_id: String,
    pub experiment_id: String,
    pub variant_id: String,
    pub event_type: SignalEventType,
    #[serde(default)]
    pub properties: Properties,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionData {
    pub order_id: String,
    pub experiment_id: String,
    pub variant_id: String,
    pub revenue: f64,
    pub currency: Option<String>,
    #[serde(default)]
    pub metadata: Properties,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> CoreResult<Self> {
        if start > end {
            return Err(CoreError::invalid("date range start is after its end"));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentMetrics {
    pub signals: u64,
    pub conversions: u64,
    pub revenue: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetrics {
    pub total_signals: u64,
    pub total_conversions: u64,
    pub total_revenue: f64,
    pub by_experiment: BTreeMap<String, ExperimentMetrics>,
}

impl UsageMetrics {
    pub fn add_signal(&mut self, experiment_id: &str) {
        self.total_signals += 1;
        self.by_experiment
            .entry(experiment_id.to_string())
            .or_default()
            .signals += 1;
    }

    pub fn add_conversion(&mut self, experiment_id: &str, revenue: f64) {
        self.total_conversions += 1;
        self.total_revenue += revenue;
        let entry = self
            .by_experiment
            .entry(experiment_id.to_string())
            .or_default();
        entry.conversions += 1;
        entry.revenue += revenue;
    }
}

/// A destination for experiment signals and conversions.
///
/// Implementations validate their input with [`validate_signal_data`] /
/// [`validate_conversion_data`] before any side effect.
#[async_trait]
pub trait BillingAdapter: Send + Sync + 'static {
    fn provider(&self) -> Provider;
    fn mode(&self) -> TenantMode;
    async fn emit_signal(&self, data: &SignalData) -> CoreResult<()>;
    async fn track_conversion(&self, data: &ConversionData) -> CoreResult<()>;
    async fn usage_metrics(&self, range: DateRange) -> CoreResult<UsageMetrics>;
}

fn require_non_empty(field: &str, value: &str) -> CoreResult<()> {
    if value.trim().is_empty() {
        return Err(CoreError::invalid(format!(
            "invalid {field}: must be a non-empty string"
        )));
    }
    Ok(())
}

pub fn validate_signal_data(data: &SignalData) -> CoreResult<()> {
    require_non_empty("orderId", &data.order_id)?;
    require_non_empty("experimentId", &data.experiment_id)?;
    require_non_empty("variantId", &data.variant_id)?;
    validate_properties(&data.properties)
}

pub fn validate_conversion_data(data: &ConversionData) -> CoreResult<()> {
    require_non_empty("orderId", &data.order_id)?;
    require_non_empty("experimentId", &data.experiment_id)?;
    require_non_empty("variantId", &data.variant_id)?;
    if !data.revenue.is_finite() || data.revenue < 0.0 {
        return Err(CoreError::invalid(
            "invalid revenue: must be a non-negative number",
        ));
    }
    validate_properties(&data.metadata)
}

#[derive(Debug, Clone)]
enum ManualRecord {
    Signal(SignalData),
    Conversion(ConversionData),
}

impl ManualRecord {
    fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Signal(s) => s.timestamp,
            Self::Conversion(c) => c.timestamp,
        }
    }
}

/// Records kept per manual adapter before the oldest are evicted.
pub const MANUAL_RECORD_CAPACITY: usize = 10_000;

/// Keeps the most recent signals and conversions in memory; no network egress.
pub struct ManualAdapter {
    tenant_id: String,
    mode: TenantMode,
    capacity: usize,
    records: Mutex<VecDeque<ManualRecord>>,
}

impl ManualAdapter {
    pub fn new(tenant_id: impl Into<String>, mode: TenantMode) -> Self {
        Self::with_capacity(tenant_id, mode, MANUAL_RECORD_CAPACITY)
    }

    /// A capacity of zero is raised to one.
    pub fn with_capacity(tenant_id: impl Into<String>, mode: TenantMode, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            tenant_id: tenant_id.into(),
            mode,
            capacity,
            records: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
        }
    }

    async fn push(&self, record: ManualRecord) {
        let mut records = self.records.lock().await;
        if records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub async fn record_count(&self) -> usize {
        self.records.lock().await.len()
    }
}

#[async_trait]
impl BillingAdapter for ManualAdapter {
    fn provider(&self) -> Provider {
        Provider::Manual
    }

    fn mode(&self) -> TenantMode {
        self.mode
    }

    async fn emit_signal(&self, data: &SignalData) -> CoreResult<()> {
        validate_signal_data(data)?;
        self.push(ManualRecord::Signal(data.clone())).await;
        debug!(
            tenant_id = %self.tenant_id,
            experiment_id = %data.experiment_id,
            event_type = data.event_type.as_str(),
            "manual signal recorded"
        );
        Ok(())
    }

    async fn track_conversion(&self, data: &ConversionData) -> CoreResult<()> {
        validate_conversion_data(data)?;
        self.push(ManualRecord::Conversion(data.clone())).await;
        debug!(
            tenant_id = %self.tenant_id,
            experiment_id = %data.experiment_id,
            revenue = data.revenue,
            "manual conversion recorded"
        );
        Ok(())
    }

    async fn usage_metrics(&self, range: DateRange) -> CoreResult<UsageMetrics> {
        let records = self.records.lock().await;
        let mut metrics = UsageMetrics::default();
        for record in records.iter().filter(|r| range.contains(r.timestamp())) {
            match record {
                ManualRecord::Signal(s) => metrics.add_signal(&s.experiment_id),
                ManualRecord::Conversion(c) => metrics.add_conversion(&c.experiment_id, c.revenue),
            }
        }
        Ok(metrics)
    }
}
