use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use lastprice_core::usage::{UsageLog, UsageRecord};

use crate::backend::{from_millis, to_millis};
use crate::DuckDbBackend;

struct UsageRow {
    id: String,
    tenant_id: String,
    usage_type: String,
    count: i64,
    metadata: String,
    recorded_at_ms: i64,
}

impl UsageRow {
    fn into_record(self) -> Result<UsageRecord> {
        Ok(UsageRecord {
            id: self.id,
            tenant_id: self.tenant_id,
            usage_type: self.usage_type.parse()?,
            count: u64::try_from(self.count)?,
            metadata: serde_json::from_str(&self.metadata)?,
            timestamp: from_millis(self.recorded_at_ms),
        })
    }
}

#[async_trait]
impl UsageLog for DuckDbBackend {
    async fn append_usage(&self, record: &UsageRecord) -> Result<bool> {
        let metadata = serde_json::to_string(&record.metadata)?;
        let count = i64::try_from(record.count)?;

        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let changed = tx.execute(
            "UPDATE tenants SET current_usage = current_usage + ?1 WHERE id = ?2",
            duckdb::params![count, record.tenant_id],
        )?;
        if changed == 0 {
            return Ok(false);
        }
        tx.execute(
            "INSERT INTO usage_records (id, tenant_id, usage_type, unit_count, metadata, recorded_at_ms) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            duckdb::params![
                record.id,
                record.tenant_id,
                record.usage_type.as_str(),
                count,
                metadata,
                to_millis(record.timestamp),
            ],
        )?;
        tx.commit()?;
        Ok(true)
    }

    async fn usage_records(
        &self,
        tenant_id: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<UsageRecord>> {
        let conn = self.conn.lock().await;

        let mut sql = String::from(
            "SELECT id, tenant_id, usage_type, unit_count, metadata, recorded_at_ms \
             FROM usage_records WHERE tenant_id = ?1",
        );
        let mut params: Vec<Box<dyn duckdb::types::ToSql>> = vec![Box::new(tenant_id.to_string())];
        if let Some(start) = start {
            params.push(Box::new(to_millis(start)));
            sql.push_str(&format!(" AND recorded_at_ms >= ?{}", params.len()));
        }
        if let Some(end) = end {
            params.push(Box::new(to_millis(end)));
            sql.push_str(&format!(" AND recorded_at_ms <= ?{}", params.len()));
        }
        sql.push_str(" ORDER BY recorded_at_ms ASC, id ASC");

        let param_refs: Vec<&dyn duckdb::types::ToSql> =
            params.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(param_refs.as_slice(), |row| {
            Ok(UsageRow {
                id: row.get(0)?,
                tenant_id: row.get(1)?,
                usage_type: row.get(2)?,
                count: row.get(3)?,
                metadata: row.get(4)?,
                recorded_at_ms: row.get(5)?,
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?.into_record()?);
        }
        Ok(records)
    }
}
