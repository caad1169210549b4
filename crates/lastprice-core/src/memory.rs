//! In-process stores for tests and embedding without a database.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::assign::Variant;
use crate::experiment::{Assignment, ExperimentCounters, ExperimentStore};
use crate::tenant::{Tenant, TenantFilter, TenantStore};
use crate::usage::{UsageLog, UsageRecord};

#[derive(Default)]
struct Inner {
    tenants: HashMap<String, Tenant>,
    usage: Vec<UsageRecord>,
    assignments: Vec<Assignment>,
    counters: HashMap<String, ExperimentCounters>,
}

/// Implements every store trait behind one lock, so multi-table writes are atomic.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TenantStore for MemoryStore {
    async fn insert_tenant(&self, tenant: &Tenant) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.tenants.contains_key(&tenant.id) {
            anyhow::bail!("tenant {} already exists", tenant.id);
        }
        inner.tenants.insert(tenant.id.clone(), tenant.clone());
        Ok(())
    }

    async fn get_tenant(&self, id: &str) -> anyhow::Result<Option<Tenant>> {
        Ok(self.inner.lock().await.tenants.get(id).cloned())
    }

    async fn list_tenants(&self, filter: &TenantFilter) -> anyhow::Result<(Vec<Tenant>, i64)> {
        let inner = self.inner.lock().await;
        let mut matching: Vec<Tenant> = inner
            .tenants
            .values()
            .filter(|t| filter.plan.map_or(true, |p| t.plan == p))
            .filter(|t| filter.mode.map_or(true, |m| t.mode == m))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        let total = matching.len() as i64;
        let page = matching
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .collect();
        Ok((page, total))
    }

    async fn save_tenant(&self, tenant: &Tenant) -> anyhow::Result<bool> {
        let mut inner = self.inner.lock().await;
        let Some(existing) = inner.tenants.get_mut(&tenant.id) else {
            return Ok(false);
        };
        let current_usage = existing.current_usage;
        *existing = Tenant {
            current_usage,
            ..tenant.clone()
        };
        Ok(true)
    }

    async fn increment_usage(&self, id: &str, amount: u64) -> anyhow::Result<Option<u64>> {
        let mut inner = self.inner.lock().await;
        Ok(inner.tenants.get_mut(id).map(|t| {
            t.current_usage += amount;
            t.current_usage
        }))
    }

    async fn reset_usage(&self, id: &str) -> anyhow::Result<bool> {
        let mut inner = self.inner.lock().await;
        Ok(match inner.tenants.get_mut(id) {
            Some(t) => {
                t.current_usage = 0;
                t.updated_at = Utc::now();
                true
            }
            None => false,
        })
    }

    async fn delete_tenant(&self, id: &str) -> anyhow::Result<bool> {
        let mut inner = self.inner.lock().await;
        if inner.tenants.remove(id).is_none() {
            return Ok(false);
        }
        inner.usage.retain(|r| r.tenant_id != id);
        Ok(true)
    }
}

#[async_trait]
impl UsageLog for MemoryStore {
    async fn append_usage(&self, record: &UsageRecord) -> anyhow::Result<bool> {
        let mut inner = self.inner.lock().await;
        let Some(tenant) = inner.tenants.get_mut(&record.tenant_id) else {
            return Ok(false);
        };
        tenant.current_usage += record.count;
        inner.usage.push(record.clone());
        Ok(true)
    }

    async fn usage_records(
        &self,
        tenant_id: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> anyhow::Result<Vec<UsageRecord>> {
        let inner = self.inner.lock().await;
        let mut records: Vec<UsageRecord> = inner
            .usage
            .iter()
            .filter(|r| r.tenant_id == tenant_id)
            .filter(|r| start.map_or(true, |s| r.timestamp >= s))
            .filter(|r| end.map_or(true, |e| r.timestamp <= e))
            .cloned()
            .collect();
        records.sort_by_key(|r| r.timestamp);
        Ok(records)
    }
}

#[async_trait]
impl ExperimentStore for MemoryStore {
    async fn get_assignment(
        &self,
        experiment_id: &str,
        user_id: &str,
    ) -> anyhow::Result<Option<Variant>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .assignments
            .iter()
            .find(|a| a.experiment_id == experiment_id && a.user_id == user_id)
            .map(|a| a.variant))
    }

    async fn assign_if_absent(
        &self,
        experiment_id: &str,
        user_id: &str,
        variant: Variant,
    ) -> anyhow::Result<Variant> {
        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner
            .assignments
            .iter()
            .find(|a| a.experiment_id == experiment_id && a.user_id == user_id)
        {
            return Ok(existing.variant);
        }
        inner.assignments.push(Assignment {
            experiment_id: experiment_id.to_string(),
            user_id: user_id.to_string(),
            variant,
            assigned_at: Utc::now(),
        });
        inner
            .counters
            .entry(experiment_id.to_string())
            .or_insert_with(|| ExperimentCounters::empty(experiment_id))
            .variant_mut(variant)
            .views += 1;
        Ok(variant)
    }

    async fn record_conversion(
        &self,
        experiment_id: &str,
        user_id: &str,
        revenue: f64,
    ) -> anyhow::Result<Option<ExperimentCounters>> {
        let mut inner = self.inner.lock().await;
        let Some(variant) = inner
            .assignments
            .iter()
            .find(|a| a.experiment_id == experiment_id && a.user_id == user_id)
            .map(|a| a.variant)
        else {
            return Ok(None);
        };
        let Some(counters) = inner.counters.get_mut(experiment_id) else {
            return Ok(None);
        };
        let slot = counters.variant_mut(variant);
        slot.conversions += 1;
        slot.revenue += revenue;
        Ok(Some(counters.clone()))
    }

    async fn get_counters(
        &self,
        experiment_id: &str,
    ) -> anyhow::Result<Option<ExperimentCounters>> {
        Ok(self.inner.lock().await.counters.get(experiment_id).cloned())
    }

    async fn list_assignments(&self, experiment_id: &str) -> anyhow::Result<Vec<Assignment>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .assignments
            .iter()
            .filter(|a| a.experiment_id == experiment_id)
            .cloned()
            .collect())
    }

    async fn reset_experiment(&self, experiment_id: &str) -> anyhow::Result<u64> {
        let mut inner = self.inner.lock().await;
        let before = inner.assignments.len();
        inner.assignments.retain(|a| a.experiment_id != experiment_id);
        inner.counters.remove(experiment_id);
        Ok((before - inner.assignments.len()) as u64)
    }
}
