use anyhow::Result;
use async_trait::async_trait;
use duckdb::Connection;

use lastprice_core::tenant::{Tenant, TenantFilter, TenantStore};

use crate::backend::{from_millis, to_millis};
use crate::DuckDbBackend;

const TENANT_COLUMNS: &str = "id, name, plan, mode, encrypted_credential, credential_base_url, \
     usage_limit, current_usage, default_provider, webhook_url, created_at_ms, updated_at_ms";

/// Raw column values; enum parsing happens outside the row closure so
/// unknown values surface as errors instead of DuckDB conversion failures.
struct TenantRow {
    id: String,
    name: String,
    plan: String,
    mode: String,
    encrypted_credential: Option<String>,
    credential_base_url: Option<String>,
    usage_limit: i64,
    current_usage: i64,
    default_provider: String,
    webhook_url: Option<String>,
    created_at_ms: i64,
    updated_at_ms: i64,
}

impl TenantRow {
    fn from_row(row: &duckdb::Row<'_>) -> duckdb::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            plan: row.get(2)?,
            mode: row.get(3)?,
            encrypted_credential: row.get(4)?,
            credential_base_url: row.get(5)?,
            usage_limit: row.get(6)?,
            current_usage: row.get(7)?,
            default_provider: row.get(8)?,
            webhook_url: row.get(9)?,
            created_at_ms: row.get(10)?,
            updated_at_ms: row.get(11)?,
        })
    }

    fn into_tenant(self) -> Result<Tenant> {
        Ok(Tenant {
            id: self.id,
            name: self.name,
            plan: self.plan.parse()?,
            mode: self.mode.parse()?,
            encrypted_credential: self.encrypted_credential,
            credential_base_url: self.credential_base_url,
            usage_limit: u64::try_from(self.usage_limit)?,
            current_usage: u64::try_from(self.current_usage)?,
            default_provider: self.default_provider.parse()?,
            webhook_url: self.webhook_url,
            created_at: from_millis(self.created_at_ms),
            updated_at: from_millis(self.updated_at_ms),
        })
    }
}

fn select_tenant(conn: &Connection, id: &str) -> Result<Option<Tenant>> {
    let mut stmt = conn.prepare(&format!("SELECT {TENANT_COLUMNS} FROM tenants WHERE id = ?1"))?;
    let mut rows = stmt.query(duckdb::params![id])?;
    let tenant = match rows.next()? {
        Some(row) => Some(TenantRow::from_row(row)?.into_tenant()?),
        None => None,
    };
    Ok(tenant)
}

#[async_trait]
impl TenantStore for DuckDbBackend {
    async fn insert_tenant(&self, tenant: &Tenant) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO tenants (id, name, plan, mode, encrypted_credential, credential_base_url, \
             usage_limit, current_usage, default_provider, webhook_url, created_at_ms, updated_at_ms) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            duckdb::params![
                tenant.id,
                tenant.name,
                tenant.plan.as_str(),
                tenant.mode.as_str(),
                tenant.encrypted_credential,
                tenant.credential_base_url,
                i64::try_from(tenant.usage_limit)?,
                i64::try_from(tenant.current_usage)?,
                tenant.default_provider.as_str(),
                tenant.webhook_url,
                to_millis(tenant.created_at),
                to_millis(tenant.updated_at),
            ],
        )?;
        Ok(())
    }

    async fn get_tenant(&self, id: &str) -> Result<Option<Tenant>> {
        let conn = self.conn.lock().await;
        select_tenant(&conn, id)
    }

    async fn list_tenants(&self, filter: &TenantFilter) -> Result<(Vec<Tenant>, i64)> {
        let conn = self.conn.lock().await;

        let mut clauses: Vec<String> = Vec::new();
        let mut params: Vec<Box<dyn duckdb::types::ToSql>> = Vec::new();
        if let Some(plan) = filter.plan {
            params.push(Box::new(plan.as_str().to_string()));
            clauses.push(format!("plan = ?{}", params.len()));
        }
        if let Some(mode) = filter.mode {
            params.push(Box::new(mode.as_str().to_string()));
            clauses.push(format!("mode = ?{}", params.len()));
        }
        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };

        let total: i64 = {
            let param_refs: Vec<&dyn duckdb::types::ToSql> =
                params.iter().map(|p| p.as_ref()).collect();
            conn.prepare(&format!("SELECT COUNT(*) FROM tenants{where_sql}"))?
                .query_row(param_refs.as_slice(), |row| row.get(0))?
        };

        params.push(Box::new(filter.limit));
        let limit_idx = params.len();
        params.push(Box::new(filter.offset));
        let offset_idx = params.len();
        let sql = format!(
            "SELECT {TENANT_COLUMNS} FROM tenants{where_sql} \
             ORDER BY created_at_ms DESC, id ASC LIMIT ?{limit_idx} OFFSET ?{offset_idx}"
        );

        let param_refs: Vec<&dyn duckdb::types::ToSql> =
            params.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(param_refs.as_slice(), TenantRow::from_row)?;

        let mut tenants = Vec::new();
        for row in rows {
            tenants.push(row?.into_tenant()?);
        }
        Ok((tenants, total))
    }

    async fn save_tenant(&self, tenant: &Tenant) -> Result<bool> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE tenants SET name = ?1, plan = ?2, mode = ?3, encrypted_credential = ?4, \
             credential_base_url = ?5, usage_limit = ?6, default_provider = ?7, webhook_url = ?8, \
             updated_at_ms = ?9 WHERE id = ?10",
            duckdb::params![
                tenant.name,
                tenant.plan.as_str(),
                tenant.mode.as_str(),
                tenant.encrypted_credential,
                tenant.credential_base_url,
                i64::try_from(tenant.usage_limit)?,
                tenant.default_provider.as_str(),
                tenant.webhook_url,
                to_millis(tenant.updated_at),
                tenant.id,
            ],
        )?;
        Ok(changed > 0)
    }

    async fn increment_usage(&self, id: &str, amount: u64) -> Result<Option<u64>> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE tenants SET current_usage = current_usage + ?1 WHERE id = ?2",
            duckdb::params![i64::try_from(amount)?, id],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        let usage: i64 = conn
            .prepare("SELECT current_usage FROM tenants WHERE id = ?1")?
            .query_row(duckdb::params![id], |row| row.get(0))?;
        Ok(Some(u64::try_from(usage)?))
    }

    async fn reset_usage(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE tenants SET current_usage = 0, updated_at_ms = ?1 WHERE id = ?2",
            duckdb::params![to_millis(chrono::Utc::now()), id],
        )?;
        Ok(changed > 0)
    }

    async fn delete_tenant(&self, id: &str) -> Result<bool> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let exists: i64 = tx
            .prepare("SELECT COUNT(*) FROM tenants WHERE id = ?1")?
            .query_row(duckdb::params![id], |row| row.get(0))?;
        if exists == 0 {
            return Ok(false);
        }

        // Usage rows first, then the tenant.
        tx.execute(
            "DELETE FROM usage_records WHERE tenant_id = ?1",
            duckdb::params![id],
        )?;
        tx.execute("DELETE FROM tenants WHERE id = ?1", duckdb::params![id])?;
        tx.commit()?;
        tracing::info!(tenant_id = %id, "tenant and usage records deleted");
        Ok(true)
    }
}
