use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::billing::plan_pricing;
use crate::error::{CoreError, CoreResult};
use crate::properties::{validate_properties, Properties};
use crate::tenant::{Plan, Tenant, TenantStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageType {
    Signal,
    ApiCall,
}

impl UsageType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Signal => "signal",
            Self::ApiCall => "api_call",
        }
    }
}

impl fmt::Display for UsageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UsageType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "signal" => Ok(Self::Signal),
            "api_call" => Ok(Self::ApiCall),
            other => Err(CoreError::invalid(format!("unknown usage type '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub id: String,
    pub tenant_id: String,
    pub usage_type: UsageType,
    pub count: u64,
    pub metadata: Properties,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    pub tenant_id: String,
    pub plan: Plan,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub signals: u64,
    pub api_calls: u64,
    pub total_usage: u64,
    pub limit: u64,
    pub overage: u64,
    pub overage_charges: f64,
}

/// Append-only usage log.
#[async_trait]
pub trait UsageLog: Send + Sync + 'static {
    /// Append `record` and add its count to the tenant's `current_usage` in
    /// one transaction. Returns `false` (writing nothing) for an unknown tenant.
    async fn append_usage(&self, record: &UsageRecord) -> anyhow::Result<bool>;

    /// Records with `start <= timestamp <= end`, oldest first. Open bounds are unbounded.
    async fn usage_records(
        &self,
        tenant_id: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> anyhow::Result<Vec<UsageRecord>>;
}

/// Reduce a tenant's records into a summary for `[start, end]`. Records
/// outside the window are ignored, so input order does not matter.
pub fn summarize(
    tenant: &Tenant,
    records: &[UsageRecord],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> UsageSummary {
    let mut signals = 0u64;
    let mut api_calls = 0u64;
    for record in records
        .iter()
        .filter(|r| r.tenant_id == tenant.id && r.timestamp >= start && r.timestamp <= end)
    {
        match record.usage_type {
            UsageType::Signal => signals += record.count,
            UsageType::ApiCall => api_calls += record.count,
        }
    }

    let total_usage = signals + api_calls;
    let overage = total_usage.saturating_sub(tenant.usage_limit);
    UsageSummary {
        tenant_id: tenant.id.clone(),
        plan: tenant.plan,
        period_start: start,
        period_end: end,
        signals,
        api_calls,
        total_usage,
        limit: tenant.usage_limit,
        overage,
        overage_charges: overage_charges(tenant.plan, overage),
    }
}

pub fn overage_charges(plan: Plan, overage: u64) -> f64 {
    if overage == 0 {
        return 0.0;
    }
    overage as f64 / 1000.0 * plan_pricing(plan).overage_rate_per_1000
}

#[derive(Clone)]
pub struct UsageTracker {
    tenants: Arc<dyn TenantStore>,
    log: Arc<dyn UsageLog>,
}

impl UsageTracker {
    pub fn new(tenants: Arc<dyn TenantStore>, log: Arc<dyn UsageLog>) -> Self {
        Self { tenants, log }
    }

    async fn tenant(&self, tenant_id: &str) -> CoreResult<Tenant> {
        self.tenants
            .get_tenant(tenant_id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("tenant {tenant_id}")))
    }

    pub async fn track_usage(
        &self,
        tenant_id: &str,
        usage_type: UsageType,
        metadata: Option<Properties>,
    ) -> CoreResult<UsageRecord> {
        self.track_usage_at(tenant_id, usage_type, 1, metadata, Utc::now())
            .await
    }

    pub async fn track_batch(
        &self,
        tenant_id: &str,
        usage_type: UsageType,
        count: i64,
        metadata: Option<Properties>,
    ) -> CoreResult<UsageRecord> {
        if count <= 0 {
            return Err(CoreError::invalid(format!(
                "usage count must be positive, got {count}"
            )));
        }
        self.track_usage_at(tenant_id, usage_type, count as u64, metadata, Utc::now())
            .await
    }

    /// Record usage with an explicit timestamp, e.g. when back-filling.
    pub async fn track_usage_at(
        &self,
        tenant_id: &str,
        usage_type: UsageType,
        count: u64,
        metadata: Option<Properties>,
        timestamp: DateTime<Utc>,
    ) -> CoreResult<UsageRecord> {
        if count == 0 {
            return Err(CoreError::invalid("usage count must be positive, got 0"));
        }
        let metadata = metadata.unwrap_or_default();
        validate_properties(&metadata)?;

        let record = UsageRecord {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            usage_type,
            count,
            metadata,
            timestamp,
        };
        if !self.log.append_usage(&record).await? {
            return Err(CoreError::not_found(format!("tenant {tenant_id}")));
        }
        debug!(tenant_id, usage_type = %usage_type, count, "usage recorded");
        Ok(record)
    }

    pub async fn get_usage_summary(
        &self,
        tenant_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CoreResult<UsageSummary> {
        if start > end {
            return Err(CoreError::invalid("usage window start is after its end"));
        }
        let tenant = self.tenant(tenant_id).await?;
        let records = self.log.usage_records(tenant_id, Some(start), Some(end)).await?;
        Ok(summarize(&tenant, &records, start, end))
    }

    pub async fn list_usage_records(
        &self,
        tenant_id: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> CoreResult<Vec<UsageRecord>> {
        if let (Some(start), Some(end)) = (start, end) {
            if start > end {
                return Err(CoreError::invalid("usage window start is after its end"));
            }
        }
        self.tenant(tenant_id).await?;
        Ok(self.log.usage_records(tenant_id, start, end).await?)
    }
}
